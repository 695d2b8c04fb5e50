//! Structured decision extraction
//!
//! Turns an analyst's free text into a typed `Decision`. Search is layered:
//! the configured anchor patterns first, then a whole-text keyword scan, then
//! a neutral HOLD default. Extraction never fails.

use crate::config::ExtractorConfig;
use crate::models::{Decision, ExecutionParams, ExtractionSource, Recommendation, Timeline};
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    static ref LOOSE_SCORE: Regex =
        Regex::new(r"\b(\d{1,2}(?:\.\d+)?)\s*/\s*10\b").expect("score pattern is valid");
    static ref LOOSE_PERCENT: Regex =
        Regex::new(r"(?i)(\d{1,3}(?:\.\d+)?)\s*%\s+confiden").expect("percent pattern is valid");
    static ref BLANK_RUNS: Regex = Regex::new(r"\n[ \t]*(?:\n[ \t]*){2,}").expect("blank pattern is valid");
    static ref TRAILING_SPACE: Regex = Regex::new(r"[ \t]+\n").expect("space pattern is valid");
}

/// Plain labels in match order; negated BUY/SELL is checked before any of these
const POLARITY_ORDER: &[(&str, Recommendation)] = &[
    ("NOT A BUY", Recommendation::Avoid),
    ("WAIT", Recommendation::Wait),
    ("AVOID", Recommendation::Avoid),
    ("HOLD", Recommendation::Hold),
    ("STRONG BUY", Recommendation::StrongBuy),
    ("STRONG SELL", Recommendation::StrongSell),
    ("BUY", Recommendation::Buy),
    ("SELL", Recommendation::Sell),
];

const NEGATORS: &[&str] = &[
    "NOT", "NO", "NEVER", "DON'T", "DONT", "DOESN'T", "SHOULDN'T", "WOULDN'T", "CAN'T",
    "WON'T", "ISN'T", "AREN'T",
];

/// How many words before BUY/SELL a negator may sit
const NEGATION_WINDOW: usize = 3;

/// Classify a label or passage. A negated BUY or SELL anywhere wins over
/// the plain phrases, so "should not buy" never reads as BUY.
pub fn classify_label(text: &str) -> Option<Recommendation> {
    if let Some(rec) = negated_action(text) {
        return Some(rec);
    }
    let normalized = normalize_label(text);
    POLARITY_ORDER
        .iter()
        .find(|(phrase, _)| normalized.contains(&format!(" {} ", phrase)))
        .map(|(_, rec)| *rec)
}

/// First BUY or SELL preceded by a negator within the same clause.
/// Negated BUY is Avoid; negated SELL is Hold.
fn negated_action(text: &str) -> Option<Recommendation> {
    let upper = text.to_uppercase();
    let clauses = upper.split(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '\n'));
    for clause in clauses {
        let words: Vec<&str> = clause
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
            .collect();

        for (i, word) in words.iter().enumerate() {
            let rec = match *word {
                "BUY" => Recommendation::Avoid,
                "SELL" => Recommendation::Hold,
                _ => continue,
            };
            let start = i.saturating_sub(NEGATION_WINDOW);
            if words[start..i].iter().any(|w| NEGATORS.contains(w)) {
                return Some(rec);
            }
        }
    }
    None
}

/// "6/10" -> 60, "75%" -> 75, bare values up to 10 read as a 10-point scale
pub fn normalize_confidence(raw: &str) -> Option<u8> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let (number, scale) = if let Some(n) = compact.strip_suffix("/10") {
        (n, 10.0)
    } else if let Some(n) = compact.strip_suffix('%') {
        (n, 1.0)
    } else {
        (compact.as_str(), 0.0)
    };

    let value: f64 = number.parse().ok()?;
    let scaled = if scale == 10.0 || (scale == 0.0 && value <= 10.0) {
        value * 10.0
    } else {
        value
    };
    Some(scaled.round().clamp(0.0, 100.0) as u8)
}

pub struct DecisionExtractor {
    recommendation: Regex,
    confidence: Vec<Regex>,
    entry: Regex,
    target: Regex,
    stop_loss: Regex,
    position_size: Regex,
    timeline: Regex,
    noise_markers: Vec<String>,
    default_confidence: u8,
}

impl DecisionExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        Ok(Self {
            recommendation: Regex::new(&config.recommendation_anchor)?,
            confidence: config
                .confidence_anchors
                .iter()
                .map(|p| Regex::new(p))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            entry: Regex::new(&config.entry_anchor)?,
            target: Regex::new(&config.target_anchor)?,
            stop_loss: Regex::new(&config.stop_loss_anchor)?,
            position_size: Regex::new(&config.position_size_anchor)?,
            timeline: Regex::new(&config.timeline_anchor)?,
            noise_markers: config.noise_markers.clone(),
            default_confidence: config.default_confidence.min(100),
        })
    }

    pub fn extract(&self, text: &str) -> Decision {
        let text = text.replace(['\u{2019}', '\u{2018}'], "'");

        let (recommendation, source) = match self.anchored_label(&text) {
            Some(rec) => (rec, ExtractionSource::Anchor),
            None => match classify_label(&text) {
                Some(rec) => (rec, ExtractionSource::KeywordScan),
                None => (Recommendation::Hold, ExtractionSource::Default),
            },
        };

        let confidence = self
            .anchored_confidence(&text)
            .or_else(|| loose_confidence(&text))
            .unwrap_or(self.default_confidence);

        let execution = self.execution_params(&text);

        debug!(
            recommendation = %recommendation,
            confidence,
            source = ?source,
            "Decision extracted"
        );

        Decision {
            recommendation,
            confidence,
            execution: (!execution.is_empty()).then_some(execution),
            source,
        }
    }

    /// Extract from the final analyst text, falling back to the whole
    /// transcript when the final text carries no recommendation at all.
    pub fn extract_with_fallback(&self, primary: &str, transcript: &str) -> Decision {
        let decision = self.extract(primary);
        if decision.source != ExtractionSource::Default {
            return decision;
        }
        let fallback = self.extract(transcript);
        if fallback.source == ExtractionSource::Default {
            decision
        } else {
            fallback
        }
    }

    /// Remove completion markers and debug lines from consumer-facing text
    pub fn strip_noise(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for marker in &self.noise_markers {
            cleaned = cleaned.replace(marker.as_str(), "");
        }
        let cleaned = TRAILING_SPACE.replace_all(&cleaned, "\n");
        let cleaned = BLANK_RUNS.replace_all(&cleaned, "\n\n");
        cleaned.trim().to_string()
    }

    fn anchored_label(&self, text: &str) -> Option<Recommendation> {
        self.recommendation
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .find_map(|m| classify_label(m.as_str()))
    }

    fn anchored_confidence(&self, text: &str) -> Option<u8> {
        self.confidence.iter().find_map(|re| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| normalize_confidence(m.as_str()))
        })
    }

    fn execution_params(&self, text: &str) -> ExecutionParams {
        ExecutionParams {
            entry_price: capture_number(&self.entry, text),
            target_price: capture_number(&self.target, text),
            stop_loss: capture_number(&self.stop_loss, text),
            position_size_pct: capture_number(&self.position_size, text),
            timeline: self
                .timeline
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_timeline(m.as_str())),
        }
    }
}

fn loose_confidence(text: &str) -> Option<u8> {
    LOOSE_SCORE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| normalize_confidence(&format!("{}/10", m.as_str())))
        .or_else(|| {
            LOOSE_PERCENT
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| normalize_confidence(&format!("{}%", m.as_str())))
        })
}

fn capture_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

fn parse_timeline(raw: &str) -> Option<Timeline> {
    let upper = raw.to_uppercase();
    if upper.starts_with("SHORT") {
        Some(Timeline::ShortTerm)
    } else if upper.starts_with("MEDIUM") {
        Some(Timeline::MediumTerm)
    } else if upper.starts_with("LONG") {
        Some(Timeline::LongTerm)
    } else {
        None
    }
}

/// Uppercase, separators to spaces, padded for whole-phrase matching
fn normalize_label(text: &str) -> String {
    let cleaned: String = text
        .to_uppercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> DecisionExtractor {
        DecisionExtractor::new(&ExtractorConfig::default()).unwrap()
    }

    #[test]
    fn test_dont_buy_is_avoid_never_buy() {
        let text = "📊 **RECOMMENDATION:** DON'T BUY - WAIT - MSFT\n💪 **CONFIDENCE LEVEL:** 6/10";
        let decision = extractor().extract(text);
        assert_eq!(decision.recommendation, Recommendation::Avoid);
        assert_eq!(decision.confidence, 60);
        assert_eq!(decision.source, ExtractionSource::Anchor);
    }

    #[test]
    fn test_negative_phrasings() {
        let cases = vec![
            ("RECOMMENDATION: DO NOT BUY", Recommendation::Avoid),
            ("RECOMMENDATION: Don\u{2019}t buy this one", Recommendation::Avoid),
            ("RECOMMENDATION: DON'T SELL", Recommendation::Hold),
            ("RECOMMENDATION: STRONG BUY", Recommendation::StrongBuy),
            ("RECOMMENDATION: STRONG_SELL", Recommendation::StrongSell),
            ("RECOMMENDATION: SELL", Recommendation::Sell),
        ];

        let extractor = extractor();
        for (text, expected) in cases {
            let decision = extractor.extract(text);
            assert_eq!(decision.recommendation, expected, "{}", text);
            assert!(!(text.contains("BUY") && text.contains("NOT") && decision.recommendation.is_positive()));
        }
    }

    #[test]
    fn test_any_negated_buy_or_sell_is_never_positive() {
        let cases = vec![
            ("RECOMMENDATION: NOT BUY", Recommendation::Avoid, ExtractionSource::Anchor),
            ("RECOMMENDATION: SHOULD NOT BUY", Recommendation::Avoid, ExtractionSource::Anchor),
            ("RECOMMENDATION: NEVER SELL", Recommendation::Hold, ExtractionSource::Anchor),
            (
                "Given the valuation you should not buy NVDA at these levels.",
                Recommendation::Avoid,
                ExtractionSource::KeywordScan,
            ),
            ("We would never buy here.", Recommendation::Avoid, ExtractionSource::KeywordScan),
            ("I wouldn't sell into this weakness.", Recommendation::Hold, ExtractionSource::KeywordScan),
            ("No buy signal yet.", Recommendation::Avoid, ExtractionSource::KeywordScan),
        ];

        let extractor = extractor();
        for (text, expected, source) in cases {
            let decision = extractor.extract(text);
            assert_eq!(decision.recommendation, expected, "{}", text);
            assert_eq!(decision.source, source, "{}", text);
        }
    }

    #[test]
    fn test_negation_stays_inside_its_clause() {
        assert_eq!(
            classify_label("Do not panic. Buy on the dip."),
            Some(Recommendation::Buy)
        );
        assert_eq!(classify_label("NOT A BUY"), Some(Recommendation::Avoid));
        assert_eq!(classify_label("STRONG BUY"), Some(Recommendation::StrongBuy));
    }

    #[test]
    fn test_keyword_scan_without_anchor() {
        let decision = extractor().extract("After review the team would not chase this. Avoid for now.");
        assert_eq!(decision.recommendation, Recommendation::Avoid);
        assert_eq!(decision.source, ExtractionSource::KeywordScan);
        assert_eq!(decision.confidence, 50);
    }

    #[test]
    fn test_default_when_nothing_matches() {
        let decision = extractor().extract("The quarter was eventful.");
        assert_eq!(decision.recommendation, Recommendation::Hold);
        assert_eq!(decision.confidence, 50);
        assert_eq!(decision.source, ExtractionSource::Default);
        assert!(decision.execution.is_none());
    }

    #[test]
    fn test_confidence_forms_normalize_to_percent() {
        assert_eq!(normalize_confidence("6/10"), Some(60));
        assert_eq!(normalize_confidence("8.5 / 10"), Some(85));
        assert_eq!(normalize_confidence("72%"), Some(72));
        assert_eq!(normalize_confidence("7"), Some(70));
        assert_eq!(normalize_confidence("250%"), Some(100));
        assert_eq!(normalize_confidence("abc"), None);

        let decision = extractor().extract("RECOMMENDATION: BUY\nConfidence: 80%");
        assert_eq!(decision.confidence, 80);
    }

    #[test]
    fn test_execution_params() {
        let text = "RECOMMENDATION: BUY\n\
                    Entry Price: $182.50\n\
                    Target Price: $1,210\n\
                    Stop-Loss: $170\n\
                    Position Size: 4.5%\n\
                    Timeline: MEDIUM-TERM";
        let execution = extractor().extract(text).execution.unwrap();
        assert_eq!(execution.entry_price, Some(182.5));
        assert_eq!(execution.target_price, Some(1210.0));
        assert_eq!(execution.stop_loss, Some(170.0));
        assert_eq!(execution.position_size_pct, Some(4.5));
        assert_eq!(execution.timeline, Some(Timeline::MediumTerm));
    }

    #[test]
    fn test_fallback_to_transcript() {
        let extractor = extractor();
        let decision = extractor.extract_with_fallback(
            "Report attached.",
            "RiskManager: size small\nReportAgent: RECOMMENDATION: HOLD\nCONFIDENCE LEVEL: 7/10",
        );
        assert_eq!(decision.recommendation, Recommendation::Hold);
        assert_eq!(decision.confidence, 70);
        assert_eq!(decision.source, ExtractionSource::Anchor);
    }

    #[test]
    fn test_strip_noise() {
        let text = "Summary line  \nFINAL_ANALYSIS_COMPLETE\n\n\n\nDEBUG: raw dump\nNext [PLACEHOLDER]";
        let cleaned = extractor().strip_noise(text);
        assert!(!cleaned.contains("FINAL_ANALYSIS_COMPLETE"));
        assert!(!cleaned.contains("DEBUG:"));
        assert!(!cleaned.contains("[PLACEHOLDER]"));
        assert!(!cleaned.contains("\n\n\n"));
        assert!(cleaned.starts_with("Summary line\n"));
    }

    #[test]
    fn test_custom_anchor_pattern() {
        let config = ExtractorConfig {
            recommendation_anchor: r"(?i)VERDICT\s*=\s*([A-Z ']+)".to_string(),
            ..ExtractorConfig::default()
        };
        let extractor = DecisionExtractor::new(&config).unwrap();
        let decision = extractor.extract("VERDICT = sell");
        assert_eq!(decision.recommendation, Recommendation::Sell);
        assert_eq!(decision.source, ExtractionSource::Anchor);
    }
}
