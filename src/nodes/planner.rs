//! Planner node: decides which data the question needs

use super::prompts;
use super::WorkflowNode;
use crate::classifier::{deep_analysis_target, IntentClassifier};
use crate::llm::InferenceClient;
use crate::models::Intent;
use crate::state::{NodeKind, StateUpdate, WorkflowState};
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

lazy_static! {
    static ref PORTFOLIO_FLAG: Regex =
        Regex::new(r"(?i)Portfolio\s+Data\s+Needed\s*:?\**\s*(YES|NO)\b").expect("portfolio flag pattern is valid");
    static ref MARKET_FLAG: Regex =
        Regex::new(r"(?i)Market\s+Data\s+Needed\s*:?\**\s*(YES|NO)\b").expect("market flag pattern is valid");
    static ref DIRECT_ANSWER: Regex =
        Regex::new(r"(?is)Direct\s+Answer\s*:\**\s*(.+)$").expect("direct answer pattern is valid");
}

const FALLBACK_ANSWER: &str = "I can answer questions about your holdings and about current \
market data for specific securities. Could you tell me a little more about what you would like to know?";

/// Structured fields read from the planner's reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanReply {
    pub portfolio: Option<bool>,
    pub market: Option<bool>,
    pub direct_answer: Option<String>,
}

pub fn parse_plan(reply: &str) -> PlanReply {
    let flag = |re: &Regex| {
        re.captures(reply)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().eq_ignore_ascii_case("YES"))
    };

    let direct_answer = DIRECT_ANSWER
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|a| !a.is_empty() && !a.starts_with('<') && !a.eq_ignore_ascii_case("n/a"));

    PlanReply {
        portfolio: flag(&PORTFOLIO_FLAG),
        market: flag(&MARKET_FLAG),
        direct_answer,
    }
}

pub struct PlannerNode {
    inference: Arc<dyn InferenceClient>,
    denylist: Vec<String>,
    temperature: f32,
}

impl PlannerNode {
    pub fn new(inference: Arc<dyn InferenceClient>, denylist: Vec<String>, temperature: f32) -> Self {
        Self {
            inference,
            denylist,
            temperature,
        }
    }
}

#[async_trait]
impl WorkflowNode for PlannerNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Planner
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let query = state.query();
        let text = query.text.as_str();
        let symbols = IntentClassifier::identifiers(text, &self.denylist);
        let mode = IntentClassifier::mode(text);

        let prompt = prompts::planner_prompt(text, &query.history);
        let reply = match self.inference.complete(&prompt, self.temperature).await {
            Ok(reply) => Some(parse_plan(&reply)),
            Err(e) if e.is_degradable() => {
                warn!(request_id = %state.request_id(), error = %e, "Planner inference failed; using keywords");
                None
            }
            Err(e) => return Err(e),
        };

        let from_model = reply
            .as_ref()
            .filter(|r| r.portfolio == Some(true) || r.market == Some(true));

        let (needs_portfolio, needs_market, source) = match from_model {
            Some(r) => (r.portfolio == Some(true), r.market == Some(true), "model"),
            None => (
                IntentClassifier::needs_portfolio(text),
                IntentClassifier::needs_market(text) || !symbols.is_empty(),
                "keywords",
            ),
        };

        let deep_analysis = deep_analysis_target(text, mode, &symbols);
        let intent = Intent {
            needs_portfolio,
            needs_market,
            mode,
            deep_analysis,
            symbols,
        };

        info!(
            request_id = %state.request_id(),
            needs_portfolio,
            needs_market,
            mode = ?mode,
            source,
            "Plan ready"
        );

        let mut update = StateUpdate::new().trace(format!(
            "PLAN: portfolio={} market={} mode={:?} ({})",
            yes_no(needs_portfolio),
            yes_no(needs_market),
            mode,
            source
        ));
        if let Some(symbol) = &intent.deep_analysis {
            update = update.trace(format!("PLAN: deep analysis requested for {}", symbol));
        }

        // Nothing to look up: the planner answers directly
        if !needs_portfolio && !needs_market {
            let answer = reply
                .and_then(|r| r.direct_answer)
                .unwrap_or_else(|| FALLBACK_ANSWER.to_string());
            update = update.response(prompts::finalize(mode, &answer));
        }

        update.intent = Some(intent);
        Ok(update)
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
