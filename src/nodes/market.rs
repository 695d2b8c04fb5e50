//! Market node: quotes, headlines and reference material

use super::{mode_of, prompts, WorkflowNode};
use crate::llm::InferenceClient;
use crate::models::QuoteResult;
use crate::readers::Readers;
use crate::state::{MarketData, NodeKind, StateUpdate, WorkflowState};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MarketNode {
    inference: Arc<dyn InferenceClient>,
    readers: Readers,
    temperature: f32,
}

impl MarketNode {
    pub fn new(inference: Arc<dyn InferenceClient>, readers: Readers, temperature: f32) -> Self {
        Self {
            inference,
            readers,
            temperature,
        }
    }

    /// Holdings first, then symbols named in the query
    fn symbols(state: &WorkflowState) -> Vec<String> {
        let mut symbols: Vec<String> = state.holdings().iter().map(|h| h.symbol.clone()).collect();
        if let Some(intent) = state.intent() {
            for s in &intent.symbols {
                if !symbols.contains(s) {
                    symbols.push(s.clone());
                }
            }
        }
        symbols
    }
}

#[async_trait]
impl WorkflowNode for MarketNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Market
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let query = state.query();
        let mode = mode_of(state);
        let symbols = Self::symbols(state);
        let mut update = StateUpdate::new();

        let quotes = self.readers.quotes(&symbols).await;
        let news = self.readers.news_for(&symbols).await;
        let knowledge = self.readers.knowledge_for(&query.text).await;

        let mut available = 0;
        for (symbol, result) in &quotes {
            match result {
                QuoteResult::Available(_) => available += 1,
                QuoteResult::Unavailable { .. } => update = update.missing(format!("{} quote", symbol)),
            }
        }

        info!(
            request_id = %state.request_id(),
            requested = quotes.len(),
            available,
            news = news.len(),
            knowledge = knowledge.len(),
            "Market data gathered"
        );
        update = update.trace(format!(
            "DATA: market quotes {}/{} available, {} news, {} reference snippets",
            available,
            quotes.len(),
            news.len(),
            knowledge.len()
        ));

        let mut formatted = prompts::format_quotes(&quotes);
        formatted.push_str(&prompts::format_snippets("RECENT NEWS", &news));
        formatted.push_str(&prompts::format_snippets("REFERENCE MATERIAL", &knowledge));

        let prior = state.response();
        let prompt = prompts::market_prompt(mode, &query.text, &formatted, prior);

        let response = match self.inference.complete(&prompt, self.temperature).await {
            Ok(text) => prompts::finalize(mode, &text),
            Err(e) if e.is_degradable() => {
                warn!(error = %e, "Market inference failed; returning raw data");
                update = update.trace("DATA: market analysis degraded (model unavailable)");
                let mut partial = prior.map(prompts::strip_disclaimer).unwrap_or_default();
                if !partial.is_empty() {
                    partial.push_str("\n\n");
                }
                partial.push_str(&format!(
                    "[Market analysis unavailable: {}]\nCurrent market data:\n{}",
                    e, formatted
                ));
                prompts::finalize(mode, &partial)
            }
            Err(e) => return Err(e),
        };

        update.market = Some(MarketData {
            quotes,
            news,
            knowledge,
        });
        Ok(update.response(response))
    }
}
