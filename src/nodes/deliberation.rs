//! Deliberation node: hands one security to the round-robin team

use super::{prompts, WorkflowNode};
use crate::deliberation::{DeliberationEngine, DeliberationOutcome};
use crate::error::OrchestrationError;
use crate::models::PromptMode;
use crate::state::{NodeKind, StateUpdate, WorkflowState};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct DeliberationNode {
    engine: Arc<DeliberationEngine>,
}

impl DeliberationNode {
    pub fn new(engine: Arc<DeliberationEngine>) -> Self {
        Self { engine }
    }
}

/// Section appended to the answer built so far
pub fn render_outcome(outcome: &DeliberationOutcome) -> String {
    let decision = &outcome.decision;
    let mut out = format!(
        "Deep analysis of {}: {} (confidence {}%)\n\n{}",
        outcome.symbol, decision.recommendation, decision.confidence, outcome.summary
    );

    let plan = &outcome.execution_plan;
    if let Some(shares) = plan.max_shares_at_stop {
        out.push_str(&format!(
            "\n\nRisk sizing: risking {}% of ${:.2} (${:.2}) allows up to {} shares at the stop-loss.",
            plan.risk_per_trade_pct, plan.portfolio_value, plan.risk_budget, shares
        ));
    }
    out
}

#[async_trait]
impl WorkflowNode for DeliberationNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Deliberation
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let symbol = state
            .intent()
            .and_then(|i| i.deep_analysis.clone())
            .ok_or_else(|| OrchestrationError::StateViolation("deliberation routed without a target".to_string()))?;

        let outcome = self.engine.analyze(&symbol, &state.query().text).await;

        info!(
            request_id = %state.request_id(),
            ticker = %symbol,
            recommendation = %outcome.decision.recommendation,
            confidence = outcome.decision.confidence,
            "Deliberation outcome ready"
        );

        let mut combined = state.response().map(prompts::strip_disclaimer).unwrap_or_default();
        if !combined.is_empty() {
            combined.push_str("\n\n");
        }
        combined.push_str(&render_outcome(&outcome));

        let mut update = StateUpdate::new()
            .trace(format!(
                "DELIBERATE: {} -> {} ({}%) after {} messages, ended by {:?}",
                symbol,
                outcome.decision.recommendation,
                outcome.decision.confidence,
                outcome.transcript.messages.len(),
                outcome.transcript.termination
            ))
            .response(prompts::finalize(PromptMode::Advisory, &combined));
        update.deliberation = Some(outcome);
        Ok(update)
    }
}
