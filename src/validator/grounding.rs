//! Grounding rules: every identifier and figure in an answer should trace
//! back to data the agents actually consulted.

use super::{ValidationContext, ValidationRule};
use crate::classifier::IntentClassifier;
use crate::models::{IssueKind, QuoteResult, ValidationIssue};
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref SENTENCE_BREAK: Regex =
        Regex::new(r"[.!?](?:\s+|$)|\n").expect("sentence pattern is valid");
}

/// Query identifiers must be covered by a consulted source; gaps reported by
/// upstream nodes are carried through.
pub struct DataSufficiencyRule {
    denylist: Vec<String>,
}

impl DataSufficiencyRule {
    pub fn new(denylist: Vec<String>) -> Self {
        Self { denylist }
    }
}

impl ValidationRule for DataSufficiencyRule {
    fn name(&self) -> &'static str {
        "data_sufficiency"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
        let mut missing: Vec<String> = ctx.reported_missing.to_vec();

        for id in IntentClassifier::identifiers(&ctx.query.text, &self.denylist) {
            let in_holdings = ctx.holdings.iter().any(|h| h.symbol.eq_ignore_ascii_case(&id));
            let quoted = ctx.quotes.map(|q| q.contains_key(&id)).unwrap_or(false);
            let deliberated = ctx.deliberated.map(|s| s.eq_ignore_ascii_case(&id)).unwrap_or(false);
            // Failed lookups were already reported by the market node
            if !(in_holdings || quoted || deliberated) {
                let item = format!("{} data", id);
                if !missing.contains(&item) {
                    missing.push(item);
                }
            }
        }

        missing
            .into_iter()
            .map(|item| ValidationIssue {
                kind: IssueKind::MissingData,
                detail: item,
                blocking: false,
            })
            .collect()
    }
}

/// Identifier-shaped tokens in the answer must appear in consulted data
pub struct IdentifierGroundingRule {
    denylist: Vec<String>,
}

impl IdentifierGroundingRule {
    pub fn new(denylist: Vec<String>) -> Self {
        Self { denylist }
    }
}

impl ValidationRule for IdentifierGroundingRule {
    fn name(&self) -> &'static str {
        "identifier_grounding"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
        if !ctx.consulted_data() {
            return Vec::new();
        }

        let known = ctx.known_identifiers();
        let asked = IntentClassifier::identifiers(&ctx.query.text, &self.denylist);

        IntentClassifier::identifiers(ctx.response, &self.denylist)
            .into_iter()
            .filter(|id| !known.contains(id) && !asked.contains(id))
            .map(|id| ValidationIssue {
                kind: IssueKind::UngroundedIdentifier,
                detail: format!("{} is not in the portfolio or market data", id),
                blocking: true,
            })
            .collect()
    }
}

/// Each dollar figure belongs to the nearest identifier before it in the
/// same sentence (or the first one after it). It must sit within a relative
/// tolerance of an authoritative value for that identifier. A figure that
/// belongs to an identifier with no data at all is a blocking issue.
pub struct NumericDeviationRule {
    tolerance: f64,
    denylist: Vec<String>,
    amount: Regex,
}

impl NumericDeviationRule {
    pub fn new(tolerance: f64, denylist: Vec<String>) -> Result<Self> {
        Ok(Self {
            tolerance,
            denylist,
            amount: Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)")?,
        })
    }

    fn authoritative_values(&self, ctx: &ValidationContext<'_>) -> HashMap<String, Vec<f64>> {
        let mut values: HashMap<String, Vec<f64>> = HashMap::new();

        for h in ctx.holdings {
            let entry = values.entry(h.symbol.to_uppercase()).or_default();
            entry.push(h.purchase_price);
            entry.push(h.cost_basis());
        }

        if let Some(quotes) = ctx.quotes {
            for (symbol, result) in quotes {
                if let QuoteResult::Available(q) = result {
                    let entry = values.entry(symbol.to_uppercase()).or_default();
                    entry.push(q.price);
                    entry.extend(q.prior_close);
                    entry.extend(q.week52_low);
                    entry.extend(q.week52_high);
                    let held = ctx.holdings.iter().find(|h| h.symbol.eq_ignore_ascii_case(symbol));
                    if let Some(h) = held {
                        entry.push(h.quantity * q.price);
                        entry.push((h.quantity * (q.price - h.purchase_price)).abs());
                    }
                }
            }
        }

        if let Some(collab) = ctx.collaboration {
            for m in &collab.metrics {
                let entry = values.entry(m.symbol.to_uppercase()).or_default();
                entry.extend(m.market_value);
                entry.extend(m.gain.map(f64::abs));
            }
        }

        values.retain(|_, v| {
            v.retain(|x| x.is_finite() && *x > 0.0);
            !v.is_empty()
        });
        values
    }

    /// Failed lookups and query identifiers that no source covers
    fn unsupported_identifiers(
        &self,
        ctx: &ValidationContext<'_>,
        values: &HashMap<String, Vec<f64>>,
    ) -> Vec<String> {
        let mut out = ctx.unavailable_identifiers();
        out.extend(IntentClassifier::identifiers(&ctx.query.text, &self.denylist));
        out.retain(|id| !values.contains_key(id));
        out.sort();
        out.dedup();
        out
    }

    fn within_tolerance(&self, amount: f64, references: &[f64]) -> bool {
        references
            .iter()
            .any(|r| ((amount - r) / r).abs() <= self.tolerance)
    }
}

impl ValidationRule for NumericDeviationRule {
    fn name(&self) -> &'static str {
        "numeric_deviation"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
        let values = self.authoritative_values(ctx);
        let unsupported = self.unsupported_identifiers(ctx, &values);
        if values.is_empty() && unsupported.is_empty() {
            return Vec::new();
        }

        let mut issues = Vec::new();
        for sentence in SENTENCE_BREAK.split(ctx.response) {
            let mut owners: Vec<(usize, &str)> = values
                .keys()
                .chain(unsupported.iter())
                .flat_map(|id| {
                    token_positions(sentence, id)
                        .into_iter()
                        .map(move |pos| (pos, id.as_str()))
                })
                .collect();
            if owners.is_empty() {
                continue;
            }
            owners.sort_unstable();

            for cap in self.amount.captures_iter(sentence) {
                let (Some(whole), Some(raw)) = (cap.get(0), cap.get(1)) else {
                    continue;
                };
                let Ok(amount) = raw.as_str().replace(',', "").parse::<f64>() else {
                    continue;
                };
                let (_, owner) = owners
                    .iter()
                    .rev()
                    .find(|(pos, _)| *pos < whole.start())
                    .unwrap_or(&owners[0]);

                match values.get(*owner) {
                    Some(references) if !self.within_tolerance(amount, references) => {
                        issues.push(ValidationIssue {
                            kind: IssueKind::NumericDeviation,
                            detail: format!(
                                "${} for {} deviates from the source data",
                                raw.as_str(),
                                owner
                            ),
                            blocking: true,
                        });
                    }
                    Some(_) => {}
                    None => issues.push(ValidationIssue {
                        kind: IssueKind::UnsupportedFigure,
                        detail: format!(
                            "${} for {} has no source data behind it",
                            raw.as_str(),
                            owner
                        ),
                        blocking: true,
                    }),
                }
            }
        }
        issues
    }
}

const CONTRADICTION_PAIRS: &[(&str, &str)] = &[
    ("increase", "decrease"),
    ("gain", "loss"),
    ("up", "down"),
    ("positive", "negative"),
    ("bullish", "bearish"),
    ("rose", "fell"),
];

/// Opposing directional terms in one answer; reported as a soft warning
pub struct ContradictionRule;

impl ValidationRule for ContradictionRule {
    fn name(&self) -> &'static str {
        "contradiction"
    }

    fn check(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
        let words: Vec<String> = ctx
            .response
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        CONTRADICTION_PAIRS
            .iter()
            .filter(|(a, b)| words.iter().any(|w| w == a) && words.iter().any(|w| w == b))
            .map(|(a, b)| ValidationIssue {
                kind: IssueKind::Contradiction,
                detail: format!("mentions both '{}' and '{}'", a, b),
                blocking: false,
            })
            .collect()
    }
}

/// Byte offsets where `token` occurs as a whole word
fn token_positions(text: &str, token: &str) -> Vec<usize> {
    text.match_indices(token)
        .filter(|(idx, _)| {
            let before = text[..*idx].chars().next_back();
            let after = text[idx + token.len()..].chars().next();
            !before.map_or(false, |c| c.is_ascii_alphanumeric())
                && !after.map_or(false, |c| c.is_ascii_alphanumeric())
        })
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Holding, Query, Quote, QuoteMap};

    fn ctx<'a>(
        query: &'a Query,
        response: &'a str,
        holdings: &'a [Holding],
        quotes: Option<&'a QuoteMap>,
    ) -> ValidationContext<'a> {
        ValidationContext {
            query,
            intent: None,
            response,
            holdings,
            quotes,
            collaboration: None,
            deliberated: None,
            reported_missing: &[],
        }
    }

    fn quote_map(symbol: &str, price: f64) -> QuoteMap {
        let mut map = QuoteMap::new();
        map.insert(
            symbol.to_string(),
            QuoteResult::Available(Quote {
                symbol: symbol.to_string(),
                price,
                prior_close: None,
                day_change_pct: None,
                week52_low: Some(price * 0.7),
                week52_high: Some(price * 1.2),
                sector: None,
            }),
        );
        map
    }

    fn denylist() -> Vec<String> {
        crate::config::ValidatorConfig::default().identifier_denylist
    }

    #[test]
    fn test_no_grounding_check_without_consulted_data() {
        let query = Query::new("What is an index fund?", "CLT-001");
        let rule = IdentifierGroundingRule::new(denylist());
        assert!(rule
            .check(&ctx(&query, "VOO and SPY are popular examples.", &[], None))
            .is_empty());
    }

    #[test]
    fn test_identifier_named_in_query_is_not_ungrounded() {
        let query = Query::new("How does NVDA compare to AAPL?", "CLT-001");
        let quotes = quote_map("AAPL", 190.0);
        let rule = IdentifierGroundingRule::new(denylist());
        let issues = rule.check(&ctx(&query, "NVDA and AAPL both rose.", &[], Some(&quotes)));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_numeric_tolerance() {
        let query = Query::new("AAPL price?", "CLT-001");
        let quotes = quote_map("AAPL", 200.0);
        let rule = NumericDeviationRule::new(0.5, denylist()).unwrap();

        let close = rule.check(&ctx(&query, "AAPL trades near $250.", &[], Some(&quotes)));
        assert!(close.is_empty());

        let far = rule.check(&ctx(&query, "AAPL trades near $1,250.00.", &[], Some(&quotes)));
        assert_eq!(far.len(), 1);
        assert!(far[0].detail.contains("1,250.00"));

        // Figures in sentences without a known identifier are not attributed
        let unrelated = rule.check(&ctx(&query, "Fees were $9,999 overall.", &[], Some(&quotes)));
        assert!(unrelated.is_empty());
    }

    #[test]
    fn test_sufficiency_reports_unknown_query_identifiers() {
        let query = Query::new("What about ZZZZ and the ETF?", "CLT-001");
        let rule = DataSufficiencyRule::new(denylist());
        let issues = rule.check(&ctx(&query, "irrelevant", &[], None));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].detail, "ZZZZ data");
        assert!(!issues[0].blocking);
    }

    #[test]
    fn test_contradiction_whole_words_only() {
        let query = Query::new("q", "CLT-001");
        let text = "An upgrade followed the downturn.";
        let issues = ContradictionRule.check(&ctx(&query, text, &[], None));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_token_boundaries() {
        assert_eq!(token_positions("AAPL is up", "AAPL"), vec![0]);
        assert!(token_positions("AAPLX is up", "AAPL").is_empty());
        assert_eq!(token_positions("(AAPL) and AAPL", "AAPL"), vec![1, 11]);
    }

    #[test]
    fn test_figure_for_failed_lookup_is_blocking() {
        let query = Query::new("How are AAPL and TSLA trading?", "CLT-001");
        let mut quotes = quote_map("AAPL", 190.0);
        quotes.insert(
            "TSLA".to_string(),
            QuoteResult::Unavailable {
                error: "upstream timeout".to_string(),
            },
        );
        let rule = NumericDeviationRule::new(0.5, denylist()).unwrap();

        let issues = rule.check(&ctx(
            &query,
            "AAPL trades at $190.00 and TSLA trades at $5,000.00 today.",
            &[],
            Some(&quotes),
        ));

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UnsupportedFigure);
        assert!(issues[0].blocking);
        assert!(issues[0].detail.contains("TSLA"));
    }

    #[test]
    fn test_figures_attach_to_the_nearest_identifier() {
        let query = Query::new("How are my stocks?", "CLT-001");
        let mut quotes = quote_map("AAPL", 190.0);
        quotes.extend(quote_map("MSFT", 410.0));
        let rule = NumericDeviationRule::new(0.5, denylist()).unwrap();

        let text = "AAPL at $190.00 and MSFT at $410.00.";
        let issues = rule.check(&ctx(&query, text, &[], Some(&quotes)));
        assert!(issues.is_empty(), "{:?}", issues);

        let text = "AAPL at $410.00 and MSFT at $190.00.";
        let swapped = rule.check(&ctx(&query, text, &[], Some(&quotes)));
        assert_eq!(swapped.len(), 2);
    }
}
