//! Content rules on the answer text itself

use super::{ValidationContext, ValidationRule};
use crate::models::{IssueKind, ValidationIssue};

/// Phrases that signal the model did not use the provided data
pub struct VaguePhraseRule {
    phrases: Vec<String>,
}

impl VaguePhraseRule {
    pub fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }
}

impl ValidationRule for VaguePhraseRule {
    fn name(&self) -> &'static str {
        "vague_phrase"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
        let lower = ctx.response.to_lowercase().replace('\u{2019}', "'");
        self.phrases
            .iter()
            .filter(|p| lower.contains(p.as_str()))
            .map(|p| ValidationIssue {
                kind: IssueKind::VaguePhrase,
                detail: format!("vague response: '{}'", p),
                blocking: true,
            })
            .collect()
    }
}

/// A portfolio question should name at least one of the holdings
pub struct HoldingsMentionRule;

impl ValidationRule for HoldingsMentionRule {
    fn name(&self) -> &'static str {
        "holdings_mentioned"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
        let asked = ctx.intent.map(|i| i.needs_portfolio).unwrap_or(false);
        if !asked || ctx.holdings.is_empty() {
            return Vec::new();
        }

        let lower = ctx.response.to_lowercase();
        let mentioned = ctx.holdings.iter().any(|h| {
            lower.contains(&h.symbol.to_lowercase())
                || (!h.name.is_empty() && lower.contains(&h.name.to_lowercase()))
        });

        if mentioned {
            Vec::new()
        } else {
            vec![ValidationIssue {
                kind: IssueKind::HoldingsNotMentioned,
                detail: "portfolio question but no holdings mentioned".to_string(),
                blocking: true,
            }]
        }
    }
}

const PRICE_TERMS: &[&str] = &["price", "worth", "value", "trading at", "cost", "how much"];

/// A price question answered with market data should contain figures
pub struct PriceNumbersRule;

impl ValidationRule for PriceNumbersRule {
    fn name(&self) -> &'static str {
        "price_numbers"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
        let query = ctx.query.text.to_lowercase();
        let asks_price = PRICE_TERMS.iter().any(|t| query.contains(t));
        let has_market = ctx
            .quotes
            .map(|q| q.values().any(|r| r.quote().is_some()))
            .unwrap_or(false);

        if asks_price && has_market && !ctx.response.chars().any(|c| c.is_ascii_digit()) {
            vec![ValidationIssue {
                kind: IssueKind::MissingNumbers,
                detail: "price question but no figures in the answer".to_string(),
                blocking: true,
            }]
        } else {
            Vec::new()
        }
    }
}
