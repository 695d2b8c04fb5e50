//! Ambiguity detection for incoming queries
//!
//! A hit short-circuits the workflow: the caller gets a clarification
//! question and no agent node runs.

use crate::classifier::IntentClassifier;
use crate::models::Query;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// "it" as a dummy subject: "is it a good time to", "it's too late", ...
    static ref DUMMY_IT: Regex = Regex::new(concat!(
        r" (?:is it|it is|it's|was it|would it be|will it be) (?:(?:a|the) )?",
        r"(?:(?:good|bad|right|wrong|best) (?:time|moment|idea)|time|too (?:late|early)",
        r"|(?:good|wise|smart|safe) to) ",
    ))
    .expect("dummy subject pattern is valid");
}

/// Kinds of ambiguity that block answering
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmbiguityKind {
    /// Pronoun with nothing in the query or history to refer to
    UnresolvedReference,
    /// "best", "worst" and similar without a measure
    UnqualifiedSuperlative,
    /// "recently", "lately" without a concrete period
    VagueTimeframe,
    /// "better", "outperform" without something to compare against
    IncompleteComparison,
}

impl AmbiguityKind {
    pub fn label(&self) -> &'static str {
        match self {
            AmbiguityKind::UnresolvedReference => "Reference",
            AmbiguityKind::UnqualifiedSuperlative => "Measure",
            AmbiguityKind::VagueTimeframe => "Time Period",
            AmbiguityKind::IncompleteComparison => "Comparison",
        }
    }

    pub fn clarification_prompt(&self) -> &'static str {
        match self {
            AmbiguityKind::UnresolvedReference => {
                "Which security or holding are you referring to? Please name the company or ticker."
            }
            AmbiguityKind::UnqualifiedSuperlative => {
                "Best by which measure? For example total return, dividend yield or lowest volatility."
            }
            AmbiguityKind::VagueTimeframe => {
                "Which time period do you mean, for example today, this month or year to date?"
            }
            AmbiguityKind::IncompleteComparison => "What would you like me to compare it against?",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguityFinding {
    pub kind: AmbiguityKind,
    pub trigger: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguityReport {
    pub findings: Vec<AmbiguityFinding>,
    pub clarification: String,
}

const PRONOUNS: &[&str] = &[
    "it", "it's", "its", "they", "them", "their", "those", "these", "that one", "this one",
    "the other one",
];

const SUBJECT_NOUNS: &[&str] = &[
    "stock", "stocks", "share", "shares", "holding", "holdings", "portfolio", "position",
    "positions", "fund", "funds", "etf", "company", "companies", "bond", "bonds", "market",
    "sector", "security", "securities", "ticker", "index",
];

const SUPERLATIVES: &[&str] = &[
    "best", "worst", "strongest", "weakest", "safest", "riskiest", "greatest",
];

const METRICS: &[&str] = &[
    "return", "returns", "total return", "yield", "dividend", "dividends", "growth", "gain",
    "gains", "loss", "losses", "price", "value", "volatility", "risk", "market cap", "revenue",
    "earnings", "margin", "pe", "p e", "percentage", "percent", "allocation", "weight",
];

const RELATIVE_TIME: &[&str] = &[
    "recently", "lately", "soon", "a while", "these days", "nowadays",
];

const CONCRETE_PERIODS: &[&str] = &[
    "today", "yesterday", "this week", "this month", "this quarter", "this year", "last week",
    "last month", "last quarter", "last year", "ytd", "year to date", "since", "day", "days",
    "week", "weeks", "month", "months", "quarter", "year", "years", "january", "february",
    "march", "april", "may", "june", "july", "august", "september", "october", "november",
    "december",
];

const COMPARATIVES: &[&str] = &[
    "better", "worse", "outperform", "outperformed", "outperforming", "underperform",
    "underperformed", "compare", "compared", "comparison",
];

const COMPARISON_TARGETS: &[&str] = &[
    "than", "vs", "versus", "against", "compared to", "compared with", "relative to", "or",
    "between",
];

pub struct AmbiguityDetector {
    denylist: Vec<String>,
}

impl AmbiguityDetector {
    pub fn new(denylist: Vec<String>) -> Self {
        Self { denylist }
    }

    pub fn detect(&self, query: &Query) -> Option<AmbiguityReport> {
        let text = normalize(&query.text);
        let mut findings = Vec::new();

        let referential = DUMMY_IT.replace_all(&text, " ");
        if let Some(pronoun) = first_match(&referential, PRONOUNS) {
            let resolved = self.has_antecedent(&query.text)
                || query.history.iter().any(|t| self.has_antecedent(&t.content));
            if !resolved {
                findings.push(finding(AmbiguityKind::UnresolvedReference, pronoun));
            }
        }

        if let Some(word) = first_match(&text, SUPERLATIVES) {
            if first_match(&text, METRICS).is_none() {
                findings.push(finding(AmbiguityKind::UnqualifiedSuperlative, word));
            }
        }

        if let Some(word) = first_match(&text, RELATIVE_TIME) {
            if first_match(&text, CONCRETE_PERIODS).is_none() && !has_digit(&text) {
                findings.push(finding(AmbiguityKind::VagueTimeframe, word));
            }
        }

        if let Some(word) = first_match(&text, COMPARATIVES) {
            let subjects = IntentClassifier::identifiers(&query.text, &self.denylist).len();
            if first_match(&text, COMPARISON_TARGETS).is_none() && subjects < 2 {
                findings.push(finding(AmbiguityKind::IncompleteComparison, word));
            }
        }

        if findings.is_empty() {
            return None;
        }

        let clarification = findings
            .iter()
            .map(|f| f.kind.clarification_prompt())
            .collect::<Vec<_>>()
            .join(" ");

        Some(AmbiguityReport {
            findings,
            clarification: format!(
                "I want to make sure I answer the right question. {}",
                clarification
            ),
        })
    }

    fn has_antecedent(&self, text: &str) -> bool {
        !IntentClassifier::identifiers(text, &self.denylist).is_empty()
            || first_match(&normalize(text), SUBJECT_NOUNS).is_some()
    }
}

fn finding(kind: AmbiguityKind, trigger: &str) -> AmbiguityFinding {
    AmbiguityFinding {
        kind,
        trigger: trigger.to_string(),
    }
}

fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .replace('\u{2019}', "'")
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn first_match<'a>(normalized: &str, terms: &[&'a str]) -> Option<&'a str> {
    terms
        .iter()
        .find(|t| normalized.contains(&format!(" {} ", t)))
        .copied()
}

fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}
