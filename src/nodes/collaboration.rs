//! Collaboration node: joins holdings with live prices
//!
//! Return figures are computed here, before the model sees them, so the
//! answer quotes local arithmetic instead of estimating it.

use super::{mode_of, prompts, WorkflowNode};
use crate::llm::InferenceClient;
use crate::models::{Holding, QuoteMap};
use crate::state::{CollaborationData, HoldingMetrics, NodeKind, StateUpdate, WorkflowState};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-holding cost, value and return. The total value is only reported
/// when every holding could be priced.
pub fn compute_metrics(holdings: &[Holding], quotes: &QuoteMap) -> CollaborationData {
    let metrics: Vec<HoldingMetrics> = holdings
        .iter()
        .map(|h| {
            let cost_basis = h.cost_basis();
            let price = quotes.get(&h.symbol).and_then(|r| r.quote()).map(|q| q.price);
            let market_value = price.map(|p| p * h.quantity);
            let gain = market_value.map(|v| v - cost_basis);
            let gain_pct = gain.and_then(|g| (cost_basis > 0.0).then(|| g * 100.0 / cost_basis));
            HoldingMetrics {
                symbol: h.symbol.clone(),
                quantity: h.quantity,
                cost_basis,
                current_price: price,
                market_value,
                gain,
                gain_pct,
            }
        })
        .collect();

    let total_cost = metrics.iter().map(|m| m.cost_basis).sum();
    let total_value = metrics
        .iter()
        .map(|m| m.market_value)
        .sum::<Option<f64>>();

    CollaborationData {
        metrics,
        total_cost,
        total_value,
    }
}

pub struct CollaborationNode {
    inference: Arc<dyn InferenceClient>,
    temperature: f32,
}

impl CollaborationNode {
    pub fn new(inference: Arc<dyn InferenceClient>, temperature: f32) -> Self {
        Self {
            inference,
            temperature,
        }
    }
}

#[async_trait]
impl WorkflowNode for CollaborationNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Collaboration
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let query = state.query();
        let mode = mode_of(state);
        let empty = QuoteMap::new();
        let quotes = state.market().map(|m| &m.quotes).unwrap_or(&empty);

        let data = compute_metrics(state.holdings(), quotes);
        let priced = data.metrics.iter().filter(|m| m.current_price.is_some()).count();
        info!(
            request_id = %state.request_id(),
            holdings = data.metrics.len(),
            priced,
            "Position metrics computed"
        );

        let mut update = StateUpdate::new().trace(format!(
            "DATA: metrics computed for {}/{} holdings",
            priced,
            data.metrics.len()
        ));

        let formatted = prompts::format_metrics(&data);
        let prior = state.response();
        let prompt = prompts::collaboration_prompt(mode, &query.text, &formatted, prior);

        let response = match self.inference.complete(&prompt, self.temperature).await {
            Ok(text) => prompts::finalize(mode, &text),
            Err(e) if e.is_degradable() => {
                warn!(error = %e, "Collaboration inference failed; returning computed metrics");
                update = update.trace("DATA: impact analysis degraded (model unavailable)");
                let mut partial = prior.map(prompts::strip_disclaimer).unwrap_or_default();
                if !partial.is_empty() {
                    partial.push_str("\n\n");
                }
                partial.push_str(&format!("[Impact analysis unavailable: {}]\nPosition metrics:\n{}", e, formatted));
                prompts::finalize(mode, &partial)
            }
            Err(e) => return Err(e),
        };

        update.collaboration = Some(data);
        Ok(update.response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Quote, QuoteResult};

    fn holding(symbol: &str, qty: f64, price: f64) -> Holding {
        Holding {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            asset_class: "Equity".to_string(),
            sector: "Technology".to_string(),
            quantity: qty,
            purchase_price: price,
            purchase_date: None,
        }
    }

    fn priced(symbol: &str, price: f64) -> (String, QuoteResult) {
        (
            symbol.to_string(),
            QuoteResult::Available(Quote {
                symbol: symbol.to_string(),
                price,
                prior_close: None,
                day_change_pct: None,
                week52_low: None,
                week52_high: None,
                sector: None,
            }),
        )
    }

    #[test]
    fn test_metrics_from_cost_basis_and_price() {
        let holdings = vec![holding("AAPL", 10.0, 150.0), holding("MSFT", 4.0, 250.0)];
        let quotes: QuoteMap = vec![priced("AAPL", 180.0), priced("MSFT", 200.0)].into_iter().collect();

        let data = compute_metrics(&holdings, &quotes);

        let aapl = &data.metrics[0];
        assert_eq!(aapl.market_value, Some(1800.0));
        assert_eq!(aapl.gain, Some(300.0));
        assert_eq!(aapl.gain_pct, Some(20.0));
        let msft = &data.metrics[1];
        assert_eq!(msft.gain, Some(-200.0));
        assert_eq!(data.total_cost, 2500.0);
        assert_eq!(data.total_value, Some(2600.0));
    }

    #[test]
    fn test_total_value_withheld_when_a_price_is_missing() {
        let holdings = vec![holding("AAPL", 10.0, 150.0), holding("ZZZ", 1.0, 10.0)];
        let mut quotes: QuoteMap = vec![priced("AAPL", 180.0)].into_iter().collect();
        quotes.insert(
            "ZZZ".to_string(),
            QuoteResult::Unavailable {
                error: "not found".to_string(),
            },
        );

        let data = compute_metrics(&holdings, &quotes);
        assert_eq!(data.metrics[1].current_price, None);
        assert_eq!(data.total_value, None);
        assert!(prompts::format_metrics(&data).contains("current price unavailable"));
    }
}
