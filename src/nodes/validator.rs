//! Validator node: scores the answer and appends a caveat when it is weak

use super::WorkflowNode;
use crate::state::{NodeKind, StateUpdate, WorkflowState};
use crate::validator::{ResponseValidator, ValidationContext};
use crate::Result;
use async_trait::async_trait;

pub struct ValidatorNode {
    validator: ResponseValidator,
}

impl ValidatorNode {
    pub fn new(validator: ResponseValidator) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl WorkflowNode for ValidatorNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Validator
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let ctx = ValidationContext::from_state(state);
        let verdict = self.validator.validate(&ctx);

        let mut update = StateUpdate::new().trace(format!(
            "VALIDATE: valid={} confidence={:.2} issues={}",
            verdict.valid,
            verdict.confidence,
            verdict.issues.len()
        ));
        if let Some(caveated) = self.validator.with_caveat(ctx.response, &verdict) {
            update = update.response(caveated);
        }
        update.missing_data = verdict.missing_data.clone();
        update.verdict = Some(verdict);
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidatorConfig;
    use crate::models::Query;
    use crate::validator::create_default_validator;

    #[tokio::test]
    async fn test_caveat_keeps_original_as_prefix() {
        let node = ValidatorNode::new(create_default_validator(ValidatorConfig::default()).unwrap());
        let mut planned = StateUpdate::new().response("I don't have access to that, unable to provide details.");
        planned.intent = Some(crate::models::Intent {
            needs_portfolio: false,
            needs_market: false,
            mode: crate::models::PromptMode::Informational,
            deep_analysis: None,
            symbols: vec![],
        });
        let state = WorkflowState::new(Query::new("What is an index fund?", "CLT-001"))
            .apply(NodeKind::Planner, planned)
            .unwrap();

        let update = node.run(&state).await.unwrap();
        let state = state.apply(NodeKind::Validator, update).unwrap();

        let verdict = state.verdict().unwrap();
        assert!(verdict.confidence < 0.7);
        let response = state.response().unwrap();
        assert!(response.starts_with("I don't have access to that"));
        assert!(response.contains("Note: This response may have limitations."));
    }
}
