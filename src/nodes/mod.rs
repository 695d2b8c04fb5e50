//! Agent nodes
//!
//! Each node reads the typed state and returns a `StateUpdate`; the router
//! applies it. Specialist nodes make at most one inference call. Degradable
//! failures (upstream data, inference) become labeled partial answers and
//! missing-data entries; anything else propagates.

use crate::config::EngineConfig;
use crate::deliberation::DeliberationEngine;
use crate::error::OrchestrationError;
use crate::llm::InferenceClient;
use crate::models::PromptMode;
use crate::readers::Readers;
use crate::state::{NodeKind, StateUpdate, WorkflowState};
use crate::validator::ResponseValidator;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod collaboration;
pub mod deliberation;
pub mod market;
pub mod planner;
pub mod portfolio;
pub mod prompts;
pub mod validator;

pub use collaboration::{compute_metrics, CollaborationNode};
pub use deliberation::DeliberationNode;
pub use market::MarketNode;
pub use planner::{parse_plan, PlannerNode};
pub use portfolio::PortfolioNode;
pub use validator::ValidatorNode;

/// One stage of the workflow graph
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    fn kind(&self) -> NodeKind;

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate>;
}

/// The closed set of nodes for one engine
pub struct Nodes {
    planner: PlannerNode,
    portfolio: PortfolioNode,
    market: MarketNode,
    collaboration: CollaborationNode,
    deliberation: Option<DeliberationNode>,
    validator: ValidatorNode,
}

impl Nodes {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        readers: Readers,
        config: &EngineConfig,
        validator: ResponseValidator,
        deliberation: Option<Arc<DeliberationEngine>>,
    ) -> Self {
        let temperature = config.llm.temperature;
        Self {
            planner: PlannerNode::new(
                inference.clone(),
                config.validator.identifier_denylist.clone(),
                temperature,
            ),
            portfolio: PortfolioNode::new(inference.clone(), readers.clone(), temperature),
            market: MarketNode::new(inference.clone(), readers, temperature),
            collaboration: CollaborationNode::new(inference, temperature),
            deliberation: deliberation.map(DeliberationNode::new),
            validator: ValidatorNode::new(validator),
        }
    }

    pub fn has_deliberation(&self) -> bool {
        self.deliberation.is_some()
    }

    pub fn get(&self, kind: NodeKind) -> Option<&dyn WorkflowNode> {
        match kind {
            NodeKind::Planner => Some(&self.planner),
            NodeKind::Portfolio => Some(&self.portfolio),
            NodeKind::Market => Some(&self.market),
            NodeKind::Collaboration => Some(&self.collaboration),
            NodeKind::Deliberation => self.deliberation.as_ref().map(|n| n as &dyn WorkflowNode),
            NodeKind::Validator => Some(&self.validator),
        }
    }

    pub async fn run(&self, kind: NodeKind, state: &WorkflowState) -> Result<StateUpdate> {
        let node = self.get(kind).ok_or_else(|| {
            OrchestrationError::Configuration(format!("no {} node is configured", kind))
        })?;
        node.run(state).await
    }
}

/// Mode for the current request; informational until the planner says otherwise
pub(crate) fn mode_of(state: &WorkflowState) -> PromptMode {
    state
        .intent()
        .map(|i| i.mode)
        .unwrap_or(PromptMode::Informational)
}
