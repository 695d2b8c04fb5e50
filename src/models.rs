//! Core data models for the portfolio intelligence engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

//
// ================= Query =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior exchange, owned by the caller's session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: None,
        }
    }
}

/// Inbound request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub client_id: String,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

impl Query {
    pub fn new(text: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            client_id: client_id.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryTurn>) -> Self {
        self.history = history;
        self
    }
}

//
// ================= Reader Data =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub asset_class: String,
    pub sector: String,
    pub quantity: f64,
    pub purchase_price: f64,
    pub purchase_date: Option<NaiveDate>,
}

impl Holding {
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.purchase_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub prior_close: Option<f64>,
    pub day_change_pct: Option<f64>,
    pub week52_low: Option<f64>,
    pub week52_high: Option<f64>,
    pub sector: Option<String>,
}

impl Quote {
    /// Fixed unit price for cash positions
    pub fn cash() -> Self {
        Self {
            symbol: "CASH".to_string(),
            price: 1.0,
            prior_close: Some(1.0),
            day_change_pct: Some(0.0),
            week52_low: None,
            week52_high: None,
            sector: Some("Cash".to_string()),
        }
    }
}

/// Per-ticker outcome of a batch lookup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuoteResult {
    Available(Quote),
    Unavailable { error: String },
}

impl QuoteResult {
    pub fn quote(&self) -> Option<&Quote> {
        match self {
            QuoteResult::Available(q) => Some(q),
            QuoteResult::Unavailable { .. } => None,
        }
    }
}

/// Ticker -> lookup outcome, ordered for stable prompts
pub type QuoteMap = BTreeMap<String, QuoteResult>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnippetKind {
    News,
    Filing,
    Knowledge,
}

/// Ranked short text with attribution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    pub kind: SnippetKind,
    pub subject: String,
    pub text: String,
    pub source: String,
    pub score: f32,
}

//
// ================= Intent =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    Informational,
    Advisory,
}

/// Planner output driving the router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    pub needs_portfolio: bool,
    pub needs_market: bool,
    pub mode: PromptMode,
    /// Security selected for round-robin deliberation
    pub deep_analysis: Option<String>,
    /// Symbols named in the query
    pub symbols: Vec<String>,
}

//
// ================= Decision =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Wait,
    Avoid,
    Sell,
    StrongSell,
}

impl Recommendation {
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            Recommendation::Avoid | Recommendation::Sell | Recommendation::StrongSell
        )
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Recommendation::Buy | Recommendation::StrongBuy)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::Buy => "BUY",
            Recommendation::Hold => "HOLD",
            Recommendation::Wait => "WAIT",
            Recommendation::Avoid => "AVOID",
            Recommendation::Sell => "SELL",
            Recommendation::StrongSell => "STRONG_SELL",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timeline {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionParams {
    pub entry_price: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub position_size_pct: Option<f64>,
    pub timeline: Option<Timeline>,
}

impl ExecutionParams {
    pub fn is_empty(&self) -> bool {
        self.entry_price.is_none()
            && self.target_price.is_none()
            && self.stop_loss.is_none()
            && self.position_size_pct.is_none()
            && self.timeline.is_none()
    }
}

/// Where the recommendation label was found
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Anchor,
    KeywordScan,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub recommendation: Recommendation,
    /// 0..=100
    pub confidence: u8,
    pub execution: Option<ExecutionParams>,
    pub source: ExtractionSource,
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    TooShort,
    VaguePhrase,
    HoldingsNotMentioned,
    MissingNumbers,
    UngroundedIdentifier,
    NumericDeviation,
    /// A figure attributed to a security with no data behind it
    UnsupportedFigure,
    Contradiction,
    MissingData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub detail: String,
    /// Soft warnings are reported but do not block
    pub blocking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub confidence: f64,
    pub issues: Vec<ValidationIssue>,
    pub clarification: Option<String>,
    pub missing_data: Vec<String>,
}

//
// ================= Response =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentFlags {
    pub portfolio_used: bool,
    pub market_used: bool,
    pub collaboration_used: bool,
    pub deliberation_used: bool,
    pub validator_used: bool,
}

/// What the engine hands back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub request_id: String,
    pub response: String,
    pub plan: Option<Intent>,
    pub trace: Vec<String>,
    pub flags: AgentFlags,
    pub decision: Option<Decision>,
    pub validated: bool,
    pub confidence: f64,
    pub needs_clarification: bool,
    pub clarification: Option<String>,
    /// Data the answer had to go without
    #[serde(default)]
    pub missing_data: Vec<String>,
    pub execution_time_ms: u64,
}

impl EngineResponse {
    /// Generic envelope returned when a request fails unexpectedly
    pub fn failure(request_id: String) -> Self {
        Self {
            request_id,
            response: "I'm sorry, I couldn't complete that request right now. Please try again in a moment."
                .to_string(),
            plan: None,
            trace: vec!["ERROR: request failed".to_string()],
            flags: AgentFlags::default(),
            decision: None,
            validated: false,
            confidence: 0.0,
            needs_clarification: false,
            clarification: None,
            missing_data: Vec::new(),
            execution_time_ms: 0,
        }
    }
}
