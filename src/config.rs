//! Engine configuration
//!
//! Every tunable lives here and is loaded from the environment (with `.env`
//! support). Defaults are usable without any environment at all.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Inference endpoint settings (OpenAI-compatible chat completions)
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Bounded exponential backoff applied to inference and reader calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the computed delay added or removed at random
    pub jitter: f64,
}

impl RetryPolicy {
    /// Single attempt, no sleeping. Used by tests and scripted clients.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Data-gathering limits for reader fan-out
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub batch_concurrency: usize,
    pub news_ticker_limit: usize,
    pub snippet_limit: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 4,
            news_ticker_limit: 2,
            snippet_limit: 3,
        }
    }
}

/// Round-robin deliberation limits
#[derive(Debug, Clone)]
pub struct DeliberationConfig {
    pub sentinel: String,
    /// Raw message ceiling, tool sub-messages included
    pub max_messages: usize,
    /// Ceiling on counted turns
    pub max_turns: usize,
    pub portfolio_value: f64,
    pub risk_per_trade_pct: f64,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            sentinel: "FINAL_ANALYSIS_COMPLETE".to_string(),
            max_messages: 40,
            max_turns: 20,
            portfolio_value: 100_000.0,
            risk_per_trade_pct: 2.0,
        }
    }
}

/// Patterns used by the decision extractor. Each pattern must expose the
/// value in capture group 1.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub recommendation_anchor: String,
    pub confidence_anchors: Vec<String>,
    pub entry_anchor: String,
    pub target_anchor: String,
    pub stop_loss_anchor: String,
    pub position_size_anchor: String,
    pub timeline_anchor: String,
    pub noise_markers: Vec<String>,
    pub default_confidence: u8,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            recommendation_anchor: r"(?i)RECOMMENDATION:\**\s*([A-Z][A-Z_ \t'\-]*)".to_string(),
            confidence_anchors: vec![
                r"(?i)CONFIDENCE(?:\s+LEVEL)?:\**\s*(\d{1,3}(?:\.\d+)?\s*(?:/\s*10|%)?)".to_string(),
            ],
            entry_anchor: r"(?i)Entry(?:\s+Price)?:\**\s*\$?\s*(\d+(?:,\d{3})*(?:\.\d+)?)".to_string(),
            target_anchor: r"(?i)Target(?:\s+Price)?:\**\s*\$?\s*(\d+(?:,\d{3})*(?:\.\d+)?)".to_string(),
            stop_loss_anchor: r"(?i)Stop[\s\-]?Loss:\**\s*\$?\s*(\d+(?:,\d{3})*(?:\.\d+)?)".to_string(),
            position_size_anchor: r"(?i)Position\s+Size:\**\s*(\d+(?:\.\d+)?)\s*%".to_string(),
            timeline_anchor: r"(?i)Timeline:\**\s*(SHORT[\s\-]TERM|MEDIUM[\s\-]TERM|LONG[\s\-]TERM)".to_string(),
            noise_markers: vec![
                "FINAL_ANALYSIS_COMPLETE".to_string(),
                "RISK_ANALYSIS_COMPLETE".to_string(),
                "MARKET_DATA_COMPLETE".to_string(),
                "QUANTITATIVE_ANALYSIS_COMPLETE".to_string(),
                "STRATEGY_DEVELOPMENT_COMPLETE".to_string(),
                "DATA_ANALYSIS_COMPLETE".to_string(),
                "DEBUG:".to_string(),
                "TODO:".to_string(),
                "[PLACEHOLDER]".to_string(),
            ],
            default_confidence: 50,
        }
    }
}

/// Per-issue confidence penalties
#[derive(Debug, Clone)]
pub struct PenaltyWeights {
    pub ungrounded_identifier: f64,
    pub numeric_deviation: f64,
    pub unsupported_figure: f64,
    pub contradiction: f64,
    pub vague_phrase: f64,
    pub holdings_not_mentioned: f64,
    pub missing_numbers: f64,
    pub missing_data: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            ungrounded_identifier: 0.3,
            numeric_deviation: 0.2,
            unsupported_figure: 0.6,
            contradiction: 0.1,
            vague_phrase: 0.2,
            holdings_not_mentioned: 0.3,
            missing_numbers: 0.2,
            missing_data: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Allowed relative deviation between a quoted number and the data
    pub numeric_tolerance: f64,
    pub penalties: PenaltyWeights,
    /// Below this the verdict is invalid
    pub invalid_below: f64,
    /// Below this a caveat footer is appended
    pub caveat_below: f64,
    pub min_response_chars: usize,
    pub identifier_denylist: Vec<String>,
    pub vague_phrases: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            numeric_tolerance: 0.5,
            penalties: PenaltyWeights::default(),
            invalid_below: 0.5,
            caveat_below: 0.7,
            min_response_chars: 10,
            identifier_denylist: DEFAULT_IDENTIFIER_DENYLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            vague_phrases: vec![
                "i don't have access".to_string(),
                "i cannot see".to_string(),
                "i don't have information".to_string(),
                "unable to provide".to_string(),
            ],
        }
    }
}

/// Uppercase words that share the ticker shape but are not securities
const DEFAULT_IDENTIFIER_DENYLIST: &[&str] = &[
    // Pronouns, articles and short words
    "I", "A", "AN", "AM", "AS", "AT", "BE", "BY", "DO", "IF", "IN", "IS", "IT", "ME", "MY",
    "NO", "OF", "OK", "ON", "OR", "SO", "TO", "UP", "WE", "YES", "NOT", "THE", "AND", "FOR",
    "BUT", "ALL", "ANY", "YOU", "DON", "T", "S",
    // Finance acronyms
    "ETF", "ETFS", "CEO", "CFO", "CTO", "IPO", "EPS", "YTD", "QTD", "MTD", "TTM", "ROI", "ROE",
    "PE", "P", "E", "EV", "DCF", "NAV", "AUM", "ESG", "IRA", "GDP", "CPI", "FED", "FOMC", "SEC",
    "NYSE", "OTC", "ATH", "ATL", "RSI", "MACD", "EMA", "SMA", "VWAP", "USD", "EUR", "GBP",
    "FY", "Q1", "Q2", "Q3", "Q4", "H1", "H2", "FCF", "ATR", "YOY", "QOQ", "MOM", "GAAP", "EBIT",
    "EBITDA", "CAGR", "ROA", "ROIC", "BPS", "DPS", "OCF", "CAPEX", "COGS", "SGA", "LTM", "NTM",
    "ADR", "REIT", "NA",
    // Geography and tech
    "US", "USA", "UK", "EU", "AI", "API", "FAQ", "PM", "EST", "UTC", "ID",
    // Labels emitted by analysts
    "BUY", "SELL", "HOLD", "WAIT", "AVOID", "STRONG", "NOTE", "RISK", "DATA", "ENTRY", "STOP",
    "LOSS", "SIZE", "PRICE", "SHORT", "LONG", "TERM", "HIGH", "LOW", "CASH", "LEVEL", "X",
];

/// Which optional stages the router may splice in before validation
#[derive(Debug, Clone, Copy)]
pub struct RouteOptions {
    pub collaboration: bool,
    pub deep_analysis: bool,
}

impl RouteOptions {
    /// The plain four-node graph: Planner, Portfolio, Market, Validator
    pub fn core_only() -> Self {
        Self {
            collaboration: false,
            deep_analysis: false,
        }
    }
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            collaboration: true,
            deep_analysis: true,
        }
    }
}

/// Top-level configuration handed to the orchestrator
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub readers: ReaderConfig,
    pub deliberation: DeliberationConfig,
    pub extractor: ExtractorConfig,
    pub validator: ValidatorConfig,
    pub routing: RouteOptions,
}

impl EngineConfig {
    /// Load configuration from the process environment, reading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = EngineConfig::default();

        config.llm.api_key = env::var("LLM_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .unwrap_or_default();
        if let Ok(url) = env::var("LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm.model = model;
        }
        config.llm.temperature = env_or("LLM_TEMPERATURE", config.llm.temperature)?;
        config.llm.max_tokens = env_or("LLM_MAX_TOKENS", config.llm.max_tokens)?;
        config.llm.timeout =
            Duration::from_secs(env_or("LLM_TIMEOUT_SECS", config.llm.timeout.as_secs())?);

        config.retry.max_attempts = env_or("RETRY_MAX_ATTEMPTS", config.retry.max_attempts)?;
        config.retry.base_delay = Duration::from_millis(env_or(
            "RETRY_BASE_DELAY_MS",
            config.retry.base_delay.as_millis() as u64,
        )?);
        config.retry.max_delay = Duration::from_millis(env_or(
            "RETRY_MAX_DELAY_MS",
            config.retry.max_delay.as_millis() as u64,
        )?);
        config.retry.jitter = env_or("RETRY_JITTER", config.retry.jitter)?;

        config.readers.batch_concurrency =
            env_or("READER_BATCH_CONCURRENCY", config.readers.batch_concurrency)?;
        config.readers.news_ticker_limit =
            env_or("READER_NEWS_TICKERS", config.readers.news_ticker_limit)?;

        if let Ok(sentinel) = env::var("DELIBERATION_SENTINEL") {
            if !config.extractor.noise_markers.contains(&sentinel) {
                config.extractor.noise_markers.push(sentinel.clone());
            }
            config.deliberation.sentinel = sentinel;
        }
        config.deliberation.max_messages =
            env_or("DELIBERATION_MAX_MESSAGES", config.deliberation.max_messages)?;
        config.deliberation.max_turns =
            env_or("DELIBERATION_MAX_TURNS", config.deliberation.max_turns)?;
        config.deliberation.portfolio_value =
            env_or("DELIBERATION_PORTFOLIO_VALUE", config.deliberation.portfolio_value)?;
        config.deliberation.risk_per_trade_pct =
            env_or("DELIBERATION_RISK_PER_TRADE", config.deliberation.risk_per_trade_pct)?;

        if let Ok(anchor) = env::var("EXTRACTOR_RECOMMENDATION_PATTERN") {
            config.extractor.recommendation_anchor = anchor;
        }
        if let Ok(anchor) = env::var("EXTRACTOR_CONFIDENCE_PATTERN") {
            config.extractor.confidence_anchors = vec![anchor];
        }

        config.validator.numeric_tolerance =
            env_or("VALIDATOR_NUMERIC_TOLERANCE", config.validator.numeric_tolerance)?;
        config.validator.invalid_below =
            env_or("VALIDATOR_INVALID_BELOW", config.validator.invalid_below)?;
        config.validator.caveat_below =
            env_or("VALIDATOR_CAVEAT_BELOW", config.validator.caveat_below)?;

        config.routing.collaboration = env_or("ROUTE_COLLABORATION", config.routing.collaboration)?;
        config.routing.deep_analysis = env_or("ROUTE_DEEP_ANALYSIS", config.routing.deep_analysis)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would break the engine's bounds
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(OrchestrationError::Configuration(
                "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.readers.batch_concurrency == 0 {
            return Err(OrchestrationError::Configuration(
                "READER_BATCH_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.deliberation.max_messages == 0 || self.deliberation.max_turns == 0 {
            return Err(OrchestrationError::Configuration(
                "deliberation ceilings must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.validator.caveat_below)
            || self.validator.invalid_below > self.validator.caveat_below
        {
            return Err(OrchestrationError::Configuration(
                "validator thresholds must satisfy 0 <= invalid <= caveat <= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            OrchestrationError::Configuration(format!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.deliberation.sentinel, "FINAL_ANALYSIS_COMPLETE");
        assert_eq!(config.validator.numeric_tolerance, 0.5);
        assert!(config.validator.identifier_denylist.iter().any(|w| w == "ETF"));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = EngineConfig::default();
        config.validator.invalid_below = 0.9;
        config.validator.caveat_below = 0.7;
        assert!(matches!(
            config.validate(),
            Err(OrchestrationError::Configuration(_))
        ));
    }

    #[test]
    fn test_env_or_parses_and_rejects() {
        env::set_var("PIO_TEST_ENV_OR_OK", " 7 ");
        env::set_var("PIO_TEST_ENV_OR_BAD", "seven");
        assert_eq!(env_or("PIO_TEST_ENV_OR_OK", 1usize).unwrap(), 7);
        assert!(env_or("PIO_TEST_ENV_OR_BAD", 1usize).is_err());
        assert_eq!(env_or("PIO_TEST_ENV_OR_MISSING", 3u32).unwrap(), 3);
    }
}
