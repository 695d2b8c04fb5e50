//! Response validator
//!
//! Runs after the agents have produced an answer:
//! 1. ambiguity detection (before any agent, see `ambiguity`)
//! 2. data sufficiency for identifiers named in the query
//! 3. grounding checks on identifiers, numbers and directional terms
//! 4. confidence scoring with a caveat footer appended below threshold

use crate::config::ValidatorConfig;
use crate::models::{
    Holding, Intent, IssueKind, Query, QuoteMap, ValidationIssue, ValidationVerdict,
};
use crate::state::{CollaborationData, WorkflowState};
use crate::Result;
use tracing::{debug, info};

pub mod ambiguity;
pub mod content;
pub mod grounding;

pub use ambiguity::{AmbiguityDetector, AmbiguityKind, AmbiguityReport};

/// Everything a rule may look at
pub struct ValidationContext<'a> {
    pub query: &'a Query,
    pub intent: Option<&'a Intent>,
    pub response: &'a str,
    pub holdings: &'a [Holding],
    pub quotes: Option<&'a QuoteMap>,
    pub collaboration: Option<&'a CollaborationData>,
    /// Security analysed by the deliberation team, if any
    pub deliberated: Option<&'a str>,
    /// Gaps reported by upstream nodes
    pub reported_missing: &'a [String],
}

impl<'a> ValidationContext<'a> {
    pub fn from_state(state: &'a WorkflowState) -> Self {
        Self {
            query: state.query(),
            intent: state.intent(),
            response: state.response().unwrap_or(""),
            holdings: state.holdings(),
            quotes: state.market().map(|m| &m.quotes),
            collaboration: state.collaboration(),
            deliberated: state.deliberation().map(|d| d.symbol.as_str()),
            reported_missing: state.missing_data(),
        }
    }

    /// Whether any authoritative data was consulted for this answer
    pub fn consulted_data(&self) -> bool {
        !self.holdings.is_empty()
            || self.quotes.map(|q| !q.is_empty()).unwrap_or(false)
            || self.deliberated.is_some()
    }

    /// Identifiers with data behind them; failed lookups do not count
    pub fn known_identifiers(&self) -> Vec<String> {
        let mut known: Vec<String> = self.holdings.iter().map(|h| h.symbol.to_uppercase()).collect();
        if let Some(quotes) = self.quotes {
            known.extend(
                quotes
                    .iter()
                    .filter(|(_, r)| r.quote().is_some())
                    .map(|(k, _)| k.to_uppercase()),
            );
        }
        if let Some(symbol) = self.deliberated {
            known.push(symbol.to_uppercase());
        }
        known.sort();
        known.dedup();
        known
    }

    /// Tickers whose quote lookup failed
    pub fn unavailable_identifiers(&self) -> Vec<String> {
        self.quotes
            .map(|quotes| {
                quotes
                    .iter()
                    .filter(|(_, r)| r.quote().is_none())
                    .map(|(k, _)| k.to_uppercase())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One validation rule
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue>;
}

/// Rule engine that scores a response
pub struct ResponseValidator {
    rules: Vec<Box<dyn ValidationRule>>,
    config: ValidatorConfig,
}

impl ResponseValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            rules: Vec::new(),
            config,
        }
    }

    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationVerdict {
        if ctx.response.trim().chars().count() < self.config.min_response_chars {
            info!(verified = false, "Response too short to validate");
            return ValidationVerdict {
                valid: false,
                confidence: 0.0,
                issues: vec![ValidationIssue {
                    kind: IssueKind::TooShort,
                    detail: "response is empty or too short".to_string(),
                    blocking: true,
                }],
                clarification: None,
                missing_data: ctx.reported_missing.to_vec(),
            };
        }

        let mut issues = Vec::new();
        for rule in &self.rules {
            let found = rule.check(ctx);
            for issue in &found {
                debug!(rule = rule.name(), kind = ?issue.kind, detail = %issue.detail, "Validation issue");
            }
            issues.extend(found);
        }

        let penalty_total: f64 = issues.iter().map(|i| self.penalty(i.kind)).sum();
        let blocking_total: f64 = issues
            .iter()
            .filter(|i| i.blocking)
            .map(|i| self.penalty(i.kind))
            .sum();

        let confidence = (1.0 - penalty_total).clamp(0.0, 1.0);
        // Soft warnings lower the score but never flip validity on their own
        let valid = (1.0 - blocking_total) >= self.config.invalid_below;

        let missing_data: Vec<String> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::MissingData)
            .map(|i| i.detail.clone())
            .collect();

        info!(
            rule_count = self.rules.len(),
            issue_count = issues.len(),
            confidence,
            verified = valid,
            "Validation completed"
        );

        ValidationVerdict {
            valid,
            confidence,
            issues,
            clarification: None,
            missing_data,
        }
    }

    /// Verdict for a query that was sent back for clarification
    pub fn clarification_verdict(report: &AmbiguityReport) -> ValidationVerdict {
        ValidationVerdict {
            valid: false,
            confidence: 0.0,
            issues: Vec::new(),
            clarification: Some(report.clarification.clone()),
            missing_data: Vec::new(),
        }
    }

    /// Append a caveat footer when the verdict is weak. The original answer
    /// is always kept verbatim as the prefix.
    pub fn with_caveat(&self, response: &str, verdict: &ValidationVerdict) -> Option<String> {
        if verdict.valid && verdict.confidence >= self.config.caveat_below {
            return None;
        }

        let mut footer = String::from("\n\n---\nNote: This response may have limitations.");
        let details: Vec<&str> = verdict
            .issues
            .iter()
            .filter(|i| i.kind != IssueKind::MissingData)
            .take(2)
            .map(|i| i.detail.as_str())
            .collect();
        if !details.is_empty() {
            footer.push_str(&format!(" Issues detected: {}.", details.join("; ")));
        }
        if !verdict.missing_data.is_empty() {
            footer.push_str(&format!(" Missing data: {}.", verdict.missing_data.join(", ")));
        }

        Some(format!("{}{}", response, footer))
    }

    fn penalty(&self, kind: IssueKind) -> f64 {
        let p = &self.config.penalties;
        match kind {
            IssueKind::TooShort => 1.0,
            IssueKind::VaguePhrase => p.vague_phrase,
            IssueKind::HoldingsNotMentioned => p.holdings_not_mentioned,
            IssueKind::MissingNumbers => p.missing_numbers,
            IssueKind::UngroundedIdentifier => p.ungrounded_identifier,
            IssueKind::NumericDeviation => p.numeric_deviation,
            IssueKind::UnsupportedFigure => p.unsupported_figure,
            IssueKind::Contradiction => p.contradiction,
            IssueKind::MissingData => p.missing_data,
        }
    }
}

/// Validator with the standard rule set
pub fn create_default_validator(config: ValidatorConfig) -> Result<ResponseValidator> {
    let mut validator = ResponseValidator::new(config.clone());
    validator.add_rule(Box::new(grounding::DataSufficiencyRule::new(
        config.identifier_denylist.clone(),
    )));
    validator.add_rule(Box::new(content::VaguePhraseRule::new(config.vague_phrases.clone())));
    validator.add_rule(Box::new(content::HoldingsMentionRule));
    validator.add_rule(Box::new(content::PriceNumbersRule));
    validator.add_rule(Box::new(grounding::IdentifierGroundingRule::new(
        config.identifier_denylist.clone(),
    )));
    validator.add_rule(Box::new(grounding::NumericDeviationRule::new(
        config.numeric_tolerance,
        config.identifier_denylist.clone(),
    )?));
    validator.add_rule(Box::new(grounding::ContradictionRule));
    Ok(validator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PromptMode, Quote, QuoteResult};

    fn holding(symbol: &str, qty: f64, price: f64) -> Holding {
        Holding {
            symbol: symbol.to_string(),
            name: format!("{} Inc", symbol),
            asset_class: "Equity".to_string(),
            sector: "Technology".to_string(),
            quantity: qty,
            purchase_price: price,
            purchase_date: None,
        }
    }

    fn quotes(entries: &[(&str, f64)]) -> QuoteMap {
        entries
            .iter()
            .map(|(s, p)| {
                (
                    s.to_string(),
                    QuoteResult::Available(Quote {
                        symbol: s.to_string(),
                        price: *p,
                        prior_close: Some(*p),
                        day_change_pct: Some(0.0),
                        week52_low: None,
                        week52_high: None,
                        sector: None,
                    }),
                )
            })
            .collect()
    }

    fn intent(needs_portfolio: bool, needs_market: bool) -> Intent {
        Intent {
            needs_portfolio,
            needs_market,
            mode: PromptMode::Informational,
            deep_analysis: None,
            symbols: vec![],
        }
    }

    fn validator() -> ResponseValidator {
        create_default_validator(ValidatorConfig::default()).unwrap()
    }

    #[test]
    fn test_grounded_portfolio_answer_is_valid() {
        let query = Query::new("What stocks do I own?", "CLT-001");
        let holdings = vec![holding("AAPL", 10.0, 150.0), holding("MSFT", 5.0, 300.0), holding("VTI", 20.0, 200.0)];
        let intent = intent(true, false);
        let ctx = ValidationContext {
            query: &query,
            intent: Some(&intent),
            response: "You own three positions: AAPL (10 shares), MSFT (5 shares) and VTI (20 shares).",
            holdings: &holdings,
            quotes: None,
            collaboration: None,
            deliberated: None,
            reported_missing: &[],
        };

        let verdict = validator().validate(&ctx);
        assert!(verdict.valid, "{:?}", verdict.issues);
        assert_eq!(verdict.confidence, 1.0);
        assert!(validator().with_caveat(ctx.response, &verdict).is_none());
    }

    #[test]
    fn test_ungrounded_ticker_flagged_but_etf_ignored() {
        let query = Query::new("How are my stocks doing?", "CLT-001");
        let holdings = vec![holding("AAPL", 10.0, 150.0)];
        let quotes = quotes(&[("AAPL", 190.0)]);
        let intent = intent(true, true);
        let ctx = ValidationContext {
            query: &query,
            intent: Some(&intent),
            response: "AAPL is at $190 and looks steady. Consider an ETF. TSLA is rallying.",
            holdings: &holdings,
            quotes: Some(&quotes),
            collaboration: None,
            deliberated: None,
            reported_missing: &[],
        };

        let verdict = validator().validate(&ctx);
        let flagged: Vec<_> = verdict
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::UngroundedIdentifier)
            .map(|i| i.detail.clone())
            .collect();
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0].contains("TSLA"));
        assert!(verdict.confidence < 1.0);
    }

    #[test]
    fn test_failed_lookups_are_not_known_identifiers() {
        let query = Query::new("How are AAPL and TSLA trading?", "CLT-001");
        let mut quotes = quotes(&[("AAPL", 190.0)]);
        quotes.insert(
            "TSLA".to_string(),
            QuoteResult::Unavailable {
                error: "timeout".to_string(),
            },
        );
        let ctx = ValidationContext {
            query: &query,
            intent: None,
            response: "AAPL is steady.",
            holdings: &[],
            quotes: Some(&quotes),
            collaboration: None,
            deliberated: None,
            reported_missing: &[],
        };

        assert_eq!(ctx.known_identifiers(), vec!["AAPL".to_string()]);
        assert_eq!(ctx.unavailable_identifiers(), vec!["TSLA".to_string()]);
    }

    #[test]
    fn test_too_short_response() {
        let query = Query::new("What stocks do I own?", "CLT-001");
        let ctx = ValidationContext {
            query: &query,
            intent: None,
            response: "  ok ",
            holdings: &[],
            quotes: None,
            collaboration: None,
            deliberated: None,
            reported_missing: &[],
        };
        let verdict = validator().validate(&ctx);
        assert!(!verdict.valid);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_caveat_appends_without_rewriting() {
        let query = Query::new("What is the price of AAPL?", "CLT-001");
        let quotes = quotes(&[("AAPL", 190.0)]);
        let missing = vec!["quote:MSFT".to_string()];
        let intent = intent(false, true);
        let response = "I don't have access to that. AAPL is trading at $950.";
        let ctx = ValidationContext {
            query: &query,
            intent: Some(&intent),
            response,
            holdings: &[],
            quotes: Some(&quotes),
            collaboration: None,
            deliberated: None,
            reported_missing: &missing,
        };

        let v = validator();
        let verdict = v.validate(&ctx);
        assert!(verdict.issues.iter().any(|i| i.kind == IssueKind::NumericDeviation));
        assert!(verdict.issues.iter().any(|i| i.kind == IssueKind::VaguePhrase));
        assert_eq!(verdict.missing_data, vec!["quote:MSFT".to_string()]);

        let with_footer = v.with_caveat(response, &verdict).unwrap();
        assert!(with_footer.starts_with(response));
        assert!(with_footer.contains("Note: This response may have limitations."));
        assert!(with_footer.contains("Missing data: quote:MSFT."));
    }

    #[test]
    fn test_contradiction_is_soft() {
        let query = Query::new("How is AAPL doing?", "CLT-001");
        let quotes = quotes(&[("AAPL", 190.0)]);
        let intent = intent(false, true);
        let ctx = ValidationContext {
            query: &query,
            intent: Some(&intent),
            response: "AAPL closed at $190. Shares were up in the morning and down by the close.",
            holdings: &[],
            quotes: Some(&quotes),
            collaboration: None,
            deliberated: None,
            reported_missing: &[],
        };

        let verdict = validator().validate(&ctx);
        let contradiction = verdict
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::Contradiction)
            .unwrap();
        assert!(!contradiction.blocking);
        assert!(verdict.valid);
        assert!((verdict.confidence - 0.9).abs() < 1e-9);
    }
}
