//! Typed workflow state
//!
//! One `WorkflowState` is created per request and threaded through the
//! router. Nodes never mutate it directly: they return a `StateUpdate`, and
//! `apply` checks that each field is written only by the node that owns it,
//! that no node runs twice, and that the validator only appends to the answer.

use crate::deliberation::DeliberationOutcome;
use crate::error::OrchestrationError;
use crate::models::{Holding, Intent, Query, QuoteMap, Snippet, ValidationVerdict};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Closed set of graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Planner,
    Portfolio,
    Market,
    Collaboration,
    Deliberation,
    Validator,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Planner,
        NodeKind::Portfolio,
        NodeKind::Market,
        NodeKind::Collaboration,
        NodeKind::Deliberation,
        NodeKind::Validator,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Planner => "planner",
            NodeKind::Portfolio => "portfolio",
            NodeKind::Market => "market",
            NodeKind::Collaboration => "collaboration",
            NodeKind::Deliberation => "deliberation",
            NodeKind::Validator => "validator",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioData {
    pub client_found: bool,
    pub holdings: Vec<Holding>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketData {
    pub quotes: QuoteMap,
    pub news: Vec<Snippet>,
    pub knowledge: Vec<Snippet>,
}

/// Locally computed return figures for one holding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldingMetrics {
    pub symbol: String,
    pub quantity: f64,
    pub cost_basis: f64,
    pub current_price: Option<f64>,
    pub market_value: Option<f64>,
    pub gain: Option<f64>,
    pub gain_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollaborationData {
    pub metrics: Vec<HoldingMetrics>,
    pub total_cost: f64,
    pub total_value: Option<f64>,
}

/// Changes a node proposes; fields left `None` are untouched
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub intent: Option<Intent>,
    pub portfolio: Option<PortfolioData>,
    pub market: Option<MarketData>,
    pub collaboration: Option<CollaborationData>,
    pub deliberation: Option<DeliberationOutcome>,
    pub response: Option<String>,
    pub verdict: Option<ValidationVerdict>,
    pub missing_data: Vec<String>,
    pub trace: Vec<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response(mut self, text: impl Into<String>) -> Self {
        self.response = Some(text.into());
        self
    }

    pub fn trace(mut self, line: impl Into<String>) -> Self {
        self.trace.push(line.into());
        self
    }

    pub fn missing(mut self, item: impl Into<String>) -> Self {
        self.missing_data.push(item.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    request_id: String,
    query: Query,
    intent: Option<Intent>,
    portfolio: Option<PortfolioData>,
    market: Option<MarketData>,
    collaboration: Option<CollaborationData>,
    deliberation: Option<DeliberationOutcome>,
    response: Option<String>,
    verdict: Option<ValidationVerdict>,
    missing_data: Vec<String>,
    trace: Vec<String>,
    visited: Vec<NodeKind>,
}

impl WorkflowState {
    pub fn new(query: Query) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            query,
            intent: None,
            portfolio: None,
            market: None,
            collaboration: None,
            deliberation: None,
            response: None,
            verdict: None,
            missing_data: Vec::new(),
            trace: Vec::new(),
            visited: Vec::new(),
        }
    }

    /// Merge a node's update after checking ownership rules
    pub fn apply(mut self, node: NodeKind, update: StateUpdate) -> Result<Self> {
        if self.visited.contains(&node) {
            return Err(violation(node, "node already ran for this request"));
        }

        set_owned(&mut self.intent, update.intent, node, NodeKind::Planner, "intent")?;
        set_owned(&mut self.portfolio, update.portfolio, node, NodeKind::Portfolio, "portfolio")?;
        set_owned(&mut self.market, update.market, node, NodeKind::Market, "market")?;
        set_owned(
            &mut self.collaboration,
            update.collaboration,
            node,
            NodeKind::Collaboration,
            "collaboration",
        )?;
        set_owned(
            &mut self.deliberation,
            update.deliberation,
            node,
            NodeKind::Deliberation,
            "deliberation",
        )?;
        set_owned(&mut self.verdict, update.verdict, node, NodeKind::Validator, "verdict")?;

        if let Some(text) = update.response {
            if node == NodeKind::Validator {
                let current = self.response.as_deref().unwrap_or("");
                if !text.starts_with(current) {
                    return Err(violation(node, "validator may only append to the response"));
                }
            }
            self.response = Some(text);
        }

        for item in update.missing_data {
            if !self.missing_data.contains(&item) {
                self.missing_data.push(item);
            }
        }
        self.trace.extend(update.trace);
        self.visited.push(node);
        Ok(self)
    }

    /// Append a routing note to the trace
    pub fn record(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.intent.as_ref()
    }

    pub fn portfolio(&self) -> Option<&PortfolioData> {
        self.portfolio.as_ref()
    }

    pub fn market(&self) -> Option<&MarketData> {
        self.market.as_ref()
    }

    pub fn collaboration(&self) -> Option<&CollaborationData> {
        self.collaboration.as_ref()
    }

    pub fn deliberation(&self) -> Option<&DeliberationOutcome> {
        self.deliberation.as_ref()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn verdict(&self) -> Option<&ValidationVerdict> {
        self.verdict.as_ref()
    }

    pub fn missing_data(&self) -> &[String] {
        &self.missing_data
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn visited(&self) -> &[NodeKind] {
        &self.visited
    }

    pub fn has_visited(&self, node: NodeKind) -> bool {
        self.visited.contains(&node)
    }

    /// Holdings gathered so far, empty if the portfolio node did not run
    pub fn holdings(&self) -> &[Holding] {
        self.portfolio
            .as_ref()
            .map(|p| p.holdings.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_portfolio_data(&self) -> bool {
        !self.holdings().is_empty()
    }

    pub fn has_market_data(&self) -> bool {
        self.market
            .as_ref()
            .map(|m| m.quotes.values().any(|q| q.quote().is_some()))
            .unwrap_or(false)
    }
}

fn set_owned<T>(
    slot: &mut Option<T>,
    value: Option<T>,
    writer: NodeKind,
    owner: NodeKind,
    field: &str,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if writer != owner {
        return Err(violation(writer, &format!("{} is owned by the {} node", field, owner)));
    }
    if slot.is_some() {
        return Err(violation(writer, &format!("{} was already written", field)));
    }
    *slot = Some(value);
    Ok(())
}

fn violation(node: NodeKind, detail: &str) -> OrchestrationError {
    OrchestrationError::StateViolation(format!("{}: {}", node, detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PromptMode;

    fn state() -> WorkflowState {
        WorkflowState::new(Query::new("What stocks do I own?", "CLT-001"))
    }

    fn intent() -> Intent {
        Intent {
            needs_portfolio: true,
            needs_market: false,
            mode: PromptMode::Informational,
            deep_analysis: None,
            symbols: vec![],
        }
    }

    #[test]
    fn test_owner_can_write_its_field() {
        let update = StateUpdate {
            intent: Some(intent()),
            ..StateUpdate::new()
        }
        .response("plan text")
        .trace("PLAN: portfolio");

        let s = state().apply(NodeKind::Planner, update).unwrap();
        assert!(s.intent().is_some());
        assert_eq!(s.response(), Some("plan text"));
        assert_eq!(s.visited(), &[NodeKind::Planner]);
    }

    #[test]
    fn test_foreign_field_write_is_rejected() {
        let update = StateUpdate {
            intent: Some(intent()),
            ..StateUpdate::new()
        };
        let err = state().apply(NodeKind::Market, update).unwrap_err();
        assert!(matches!(err, OrchestrationError::StateViolation(_)));
    }

    #[test]
    fn test_node_cannot_run_twice() {
        let s = state().apply(NodeKind::Market, StateUpdate::new()).unwrap();
        assert!(s.apply(NodeKind::Market, StateUpdate::new()).is_err());
    }

    #[test]
    fn test_validator_is_append_only() {
        let s = state()
            .apply(NodeKind::Portfolio, StateUpdate::new().response("You own AAPL."))
            .unwrap();

        let rewritten = s
            .clone()
            .apply(NodeKind::Validator, StateUpdate::new().response("You own MSFT."));
        assert!(rewritten.is_err());

        let appended = s
            .apply(
                NodeKind::Validator,
                StateUpdate::new().response("You own AAPL.\n\n---\nNote: caveat"),
            )
            .unwrap();
        assert!(appended.response().unwrap().starts_with("You own AAPL."));
    }

    #[test]
    fn test_missing_data_is_deduplicated() {
        let s = state()
            .apply(NodeKind::Portfolio, StateUpdate::new().missing("quote:NVDA"))
            .unwrap()
            .apply(NodeKind::Market, StateUpdate::new().missing("quote:NVDA"))
            .unwrap();
        assert_eq!(s.missing_data(), &["quote:NVDA".to_string()]);
    }
}
