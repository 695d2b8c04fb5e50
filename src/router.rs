//! Conditional router
//!
//! Planner → {Portfolio, Market, Validator} → {Market, Validator} → Validator.
//! Collaboration and Deliberation can be spliced onto the edges into the
//! Validator. The graph is acyclic and every node runs at most once, so a
//! request visits at most `NodeKind::ALL.len()` nodes.

use crate::classifier::IntentClassifier;
use crate::config::RouteOptions;
use crate::error::OrchestrationError;
use crate::nodes::Nodes;
use crate::state::{NodeKind, WorkflowState};
use crate::Result;
use tracing::{debug, info};

/// Where to go after `from`; `None` ends the request
pub fn next_node(
    from: NodeKind,
    state: &WorkflowState,
    options: RouteOptions,
    team_available: bool,
) -> Option<NodeKind> {
    let (needs_portfolio, needs_market) = state
        .intent()
        .map(|i| (i.needs_portfolio, i.needs_market))
        .unwrap_or((false, false));

    match from {
        NodeKind::Planner if needs_portfolio => Some(NodeKind::Portfolio),
        NodeKind::Planner if needs_market => Some(NodeKind::Market),
        NodeKind::Planner => Some(before_validation(state, options, team_available)),
        NodeKind::Portfolio if needs_market => Some(NodeKind::Market),
        NodeKind::Portfolio => Some(before_validation(state, options, team_available)),
        NodeKind::Market if options.collaboration && wants_collaboration(state) => {
            Some(NodeKind::Collaboration)
        }
        NodeKind::Market | NodeKind::Collaboration => {
            Some(before_validation(state, options, team_available))
        }
        NodeKind::Deliberation => Some(NodeKind::Validator),
        NodeKind::Validator => None,
    }
}

fn wants_collaboration(state: &WorkflowState) -> bool {
    (state.has_portfolio_data() && state.has_market_data())
        || IntentClassifier::needs_collaboration(&state.query().text)
}

fn before_validation(
    state: &WorkflowState,
    options: RouteOptions,
    team_available: bool,
) -> NodeKind {
    let requested = state
        .intent()
        .map(|i| i.deep_analysis.is_some())
        .unwrap_or(false);
    if requested && options.deep_analysis && team_available {
        NodeKind::Deliberation
    } else {
        NodeKind::Validator
    }
}

/// Run the graph from the planner, one node at a time
pub async fn drive(
    nodes: &Nodes,
    mut state: WorkflowState,
    options: RouteOptions,
) -> Result<WorkflowState> {
    let mut current = Some(NodeKind::Planner);
    let mut steps = 0;

    while let Some(node) = current {
        if steps >= NodeKind::ALL.len() {
            return Err(OrchestrationError::StateViolation(format!(
                "route exceeded {} nodes",
                NodeKind::ALL.len()
            )));
        }
        steps += 1;

        debug!(request_id = %state.request_id(), node = ?node, "Running node");
        let update = nodes.run(node, &state).await?;
        state = state.apply(node, update)?;

        current = next_node(node, &state, options, nodes.has_deliberation());
        if let Some(next) = current {
            info!(request_id = %state.request_id(), from = %node, to = %next, "Route transition");
            state.record(format!("ROUTE: {} -> {}", node, next));
        }
    }

    Ok(state)
}
