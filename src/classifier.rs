//! Intent Classifier
//!
//! Keyword heuristics used when the planner's model output is missing or
//! unparseable, and for the prompt-mode decision:
//! - Informational: facts about holdings and markets ("what stocks do I own?")
//! - Advisory: the user asks what to do ("should I rebalance?")

use crate::models::{Intent, PromptMode};
use lazy_static::lazy_static;
use regex::Regex;

/// Static keyword lists, matched on whole words
const PORTFOLIO_KEYWORDS: &[&str] = &[
    "own", "holdings", "holding", "my stocks", "my portfolio", "what stocks",
    "my positions", "invested in", "my shares",
];

const MARKET_KEYWORDS: &[&str] = &[
    "price", "prices", "market", "news", "performance", "trading", "how is", "doing",
    "quote", "earnings", "trend",
];

const ADVISORY_KEYWORDS: &[&str] = &[
    "should i", "recommend", "recommendation", "advice", "advise", "suggest", "improve",
    "what should", "worth buying", "diversify", "rebalance", "better",
];

const DECISION_PHRASES: &[&str] = &[
    "should i buy", "should i sell", "should i hold", "worth buying", "buy or sell",
    "good buy", "add more", "should i invest",
];

const MARKET_EVENT_KEYWORDS: &[&str] = &[
    "news", "earnings", "announcement", "event", "price", "market", "rates",
];

const PORTFOLIO_IMPACT_KEYWORDS: &[&str] = &[
    "my portfolio", "my holdings", "my stocks", "affect my", "impact my", "my position",
    "my positions",
];

lazy_static! {
    static ref IDENTIFIER_SHAPE: Regex =
        Regex::new(r"\b[A-Z]{1,5}(?:\.[A-Z])?\b").expect("identifier pattern is valid");
}

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn needs_portfolio(text: &str) -> bool {
        let normalized = normalize(text);
        contains_any(&normalized, PORTFOLIO_KEYWORDS) || mentions_own_positions(&normalized)
    }

    pub fn needs_market(text: &str) -> bool {
        let normalized = normalize(text);
        contains_any(&normalized, MARKET_KEYWORDS) || mentions_own_positions(&normalized)
    }

    pub fn mode(text: &str) -> PromptMode {
        if contains_any(&normalize(text), ADVISORY_KEYWORDS) {
            PromptMode::Advisory
        } else {
            PromptMode::Informational
        }
    }

    /// Buy/sell decision phrasing about a single security
    pub fn wants_decision(text: &str) -> bool {
        contains_any(&normalize(text), DECISION_PHRASES)
    }

    /// Market event combined with portfolio impact
    pub fn needs_collaboration(text: &str) -> bool {
        let normalized = normalize(text);
        contains_any(&normalized, MARKET_EVENT_KEYWORDS)
            && contains_any(&normalized, PORTFOLIO_IMPACT_KEYWORDS)
    }

    /// Ticker-shaped tokens, minus denylisted words, in order of appearance
    pub fn identifiers(text: &str, denylist: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (_, token) in Self::identifier_spans(text, denylist) {
            if !out.contains(&token) {
                out.push(token);
            }
        }
        out
    }

    /// Every identifier-shaped occurrence with its byte offset, in order.
    /// Denylisted words and single letters of fractions like "N/A" are skipped.
    pub fn identifier_spans(text: &str, denylist: &[String]) -> Vec<(usize, String)> {
        IDENTIFIER_SHAPE
            .find_iter(text)
            .filter(|m| !denylist.iter().any(|d| d == m.as_str()))
            .filter(|m| {
                let slashed = text[..m.start()].ends_with('/') || text[m.end()..].starts_with('/');
                !(m.as_str().len() == 1 && slashed)
            })
            .map(|m| (m.start(), m.as_str().to_string()))
            .collect()
    }

    /// Full intent from keywords alone
    pub fn fallback_intent(text: &str, denylist: &[String]) -> Intent {
        let symbols = Self::identifiers(text, denylist);
        let mode = Self::mode(text);
        let deep_analysis = deep_analysis_target(text, mode, &symbols);

        Intent {
            needs_portfolio: Self::needs_portfolio(text),
            needs_market: Self::needs_market(text) || !symbols.is_empty(),
            mode,
            deep_analysis,
            symbols,
        }
    }
}

/// Deep analysis runs only for advisory buy/sell questions about exactly one
/// named security.
pub fn deep_analysis_target(text: &str, mode: PromptMode, symbols: &[String]) -> Option<String> {
    if mode == PromptMode::Advisory && symbols.len() == 1 && IntentClassifier::wants_decision(text) {
        symbols.first().cloned()
    } else {
        None
    }
}

/// Lowercase, punctuation to spaces, padded so whole-word checks are
/// plain substring checks.
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn contains_any(normalized: &str, terms: &[&str]) -> bool {
    terms
        .iter()
        .any(|term| normalized.contains(&format!(" {} ", term)))
}

/// "my" next to stock/holding words asks about both holdings and prices
fn mentions_own_positions(normalized: &str) -> bool {
    normalized.contains(" my ")
        && (normalized.contains("stock") || normalized.contains("holding"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denylist() -> Vec<String> {
        crate::config::ValidatorConfig::default().identifier_denylist
    }

    #[test]
    fn test_portfolio_questions() {
        let cases = vec![
            "What stocks do I own?",
            "show my portfolio",
            "list my holdings",
        ];

        for c in cases {
            assert!(IntentClassifier::needs_portfolio(c), "{}", c);
        }
    }

    #[test]
    fn test_whole_word_matching() {
        // "known" and "down" must not match "own"
        assert!(!IntentClassifier::needs_portfolio("the market is down, as is known"));
        assert!(IntentClassifier::needs_market("the market is down, as is known"));
    }

    #[test]
    fn test_my_stocks_needs_both() {
        let text = "how are my stocks";
        assert!(IntentClassifier::needs_portfolio(text));
        assert!(IntentClassifier::needs_market(text));
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(IntentClassifier::mode("What stocks do I own?"), PromptMode::Informational);
        assert_eq!(IntentClassifier::mode("Should I rebalance?"), PromptMode::Advisory);
        assert_eq!(IntentClassifier::mode("how can I improve my returns"), PromptMode::Advisory);
    }

    #[test]
    fn test_identifiers_skip_denylisted_words() {
        let text = "Is the ETF better than AAPL or BRK.B? I think AAPL";
        let ids = IntentClassifier::identifiers(text, &denylist());
        assert_eq!(ids, vec!["AAPL".to_string(), "BRK.B".to_string()]);
    }

    #[test]
    fn test_finance_acronyms_and_fractions_are_not_identifiers() {
        let text = "AAPL trades at $190.00 today. FCF grew, ATR is N/A and GAAP EBIT rose YOY.";
        assert_eq!(IntentClassifier::identifiers(text, &denylist()), vec!["AAPL".to_string()]);

        let spans = IntentClassifier::identifier_spans("Buy AAPL, then AAPL again", &denylist());
        assert_eq!(spans, vec![(4, "AAPL".to_string()), (15, "AAPL".to_string())]);
    }

    #[test]
    fn test_deep_analysis_needs_single_symbol_and_decision_phrase() {
        let intent = IntentClassifier::fallback_intent("Should I buy NVDA?", &denylist());
        assert_eq!(intent.deep_analysis.as_deref(), Some("NVDA"));
        assert!(intent.needs_market);

        let two = IntentClassifier::fallback_intent("Should I buy NVDA or AMD?", &denylist());
        assert_eq!(two.deep_analysis, None);

        let info = IntentClassifier::fallback_intent("How is NVDA doing?", &denylist());
        assert_eq!(info.deep_analysis, None);
    }

    #[test]
    fn test_collaboration_keywords() {
        assert!(IntentClassifier::needs_collaboration(
            "How will the earnings news affect my portfolio?"
        ));
        assert!(!IntentClassifier::needs_collaboration("What stocks do I own?"));
    }
}
