//! Portfolio node: answers from the client's holdings

use super::{mode_of, prompts, WorkflowNode};
use crate::llm::InferenceClient;
use crate::readers::Readers;
use crate::state::{NodeKind, PortfolioData, StateUpdate, WorkflowState};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PortfolioNode {
    inference: Arc<dyn InferenceClient>,
    readers: Readers,
    temperature: f32,
}

impl PortfolioNode {
    pub fn new(inference: Arc<dyn InferenceClient>, readers: Readers, temperature: f32) -> Self {
        Self {
            inference,
            readers,
            temperature,
        }
    }
}

#[async_trait]
impl WorkflowNode for PortfolioNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Portfolio
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let query = state.query();
        let mode = mode_of(state);
        let mut update = StateUpdate::new();

        let data = match self.readers.load_holdings(&query.client_id).await {
            Ok(Some(holdings)) => PortfolioData {
                client_found: true,
                holdings,
            },
            Ok(None) => {
                warn!(client_id = %query.client_id, "No portfolio on file");
                update = update.missing(format!("portfolio for client {}", query.client_id));
                PortfolioData {
                    client_found: false,
                    holdings: Vec::new(),
                }
            }
            Err(e) if e.is_degradable() => {
                warn!(client_id = %query.client_id, error = %e, "Portfolio reader unavailable");
                update = update.missing("portfolio holdings");
                PortfolioData {
                    client_found: false,
                    holdings: Vec::new(),
                }
            }
            Err(e) => return Err(e),
        };

        info!(
            request_id = %state.request_id(),
            client_found = data.client_found,
            holdings = data.holdings.len(),
            "Portfolio data gathered"
        );
        update = update.trace(format!("DATA: portfolio with {} holdings", data.holdings.len()));

        let formatted = prompts::format_holdings(&data.holdings);
        let prompt = prompts::portfolio_prompt(mode, &query.text, &query.history, &formatted);

        let response = match self.inference.complete(&prompt, self.temperature).await {
            Ok(text) => prompts::finalize(mode, &text),
            Err(e) if e.is_degradable() => {
                warn!(error = %e, "Portfolio inference failed; returning raw data");
                update = update.trace("DATA: portfolio analysis degraded (model unavailable)");
                format!(
                    "[Portfolio analysis unavailable: {}]\nHere is the portfolio data on file:\n{}",
                    e, formatted
                )
            }
            Err(e) => return Err(e),
        };

        update.portfolio = Some(data);
        Ok(update.response(response))
    }
}
