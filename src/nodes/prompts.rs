//! Prompt templates and data formatting
//!
//! Informational and advisory instructions are separate templates; a prompt
//! is built from exactly one of them. Advisory answers always end with the
//! disclaimer.

use crate::models::{Holding, HistoryTurn, PromptMode, Quote, QuoteMap, QuoteResult, Role, Snippet};
use crate::state::CollaborationData;

pub const DISCLAIMER: &str = "Note: This is educational analysis, not financial advice. \
Please consult a licensed financial advisor for personalized investment recommendations.";

/// Prior turns included in a prompt
const HISTORY_TURNS: usize = 6;

const INFORMATIONAL_RULES: &str = "\
ANSWER STYLE:
- State facts drawn only from the data below.
- Do not recommend, suggest or advise any action.
- Use exact figures from the data; do not estimate.";

const ADVISORY_RULES: &str = "\
ANSWER STYLE:
- Offer balanced considerations, using hedged language (\"you may want to consider\").
- Ground every point in the data below and quote figures exactly.
- Mention relevant risks.";

pub fn mode_rules(mode: PromptMode) -> &'static str {
    match mode {
        PromptMode::Informational => INFORMATIONAL_RULES,
        PromptMode::Advisory => ADVISORY_RULES,
    }
}

/// Apply the mode's suffix to model output
pub fn finalize(mode: PromptMode, text: &str) -> String {
    let text = text.trim();
    match mode {
        PromptMode::Advisory if !text.contains(DISCLAIMER) => format!("{}\n\n{}", text, DISCLAIMER),
        _ => text.to_string(),
    }
}

/// Remove the disclaimer so sections can be combined before re-finalizing
pub fn strip_disclaimer(text: &str) -> String {
    text.replace(DISCLAIMER, "").trim_end().to_string()
}

pub fn render_history(history: &[HistoryTurn]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let start = history.len().saturating_sub(HISTORY_TURNS);
    let mut out = String::from("CONVERSATION SO FAR:\n");
    for turn in &history[start..] {
        let who = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(&format!("{}: {}\n", who, turn.content));
    }
    out
}

pub fn planner_prompt(query: &str, history: &[HistoryTurn]) -> String {
    format!(
        "You are the planning agent for a portfolio assistant. Decide which data \
         the question needs.\n\n{}\nQUESTION: {}\n\n\
         Reply in exactly this format:\n\
         Portfolio Data Needed: YES or NO\n\
         Market Data Needed: YES or NO\n\
         Direct Answer: <only when neither is needed, a short general answer>",
        render_history(history),
        query
    )
}

pub fn portfolio_prompt(mode: PromptMode, query: &str, history: &[HistoryTurn], data: &str) -> String {
    format!(
        "You are the portfolio specialist. Answer the client's question about their \
         holdings.\n\n{}\n\n{}\nQUESTION: {}\n\nPORTFOLIO DATA:\n{}",
        mode_rules(mode),
        render_history(history),
        query,
        data
    )
}

pub fn market_prompt(mode: PromptMode, query: &str, data: &str, prior: Option<&str>) -> String {
    let mut prompt = format!(
        "You are the market specialist. Answer using current market data.\n\n{}\n\n\
         QUESTION: {}\n\nMARKET DATA:\n{}",
        mode_rules(mode),
        query,
        data
    );
    if let Some(prior) = prior {
        prompt.push_str(&format!(
            "\n\nEARLIER ANALYSIS (extend it, do not contradict it):\n{}",
            strip_disclaimer(prior)
        ));
    }
    prompt
}

pub fn collaboration_prompt(mode: PromptMode, query: &str, metrics: &str, prior: Option<&str>) -> String {
    let mut prompt = format!(
        "You are the portfolio impact analyst. Combine holdings and market data into \
         one answer. Use the computed figures exactly as given.\n\n{}\n\nQUESTION: {}\n\n\
         COMPUTED POSITION METRICS:\n{}",
        mode_rules(mode),
        query,
        metrics
    );
    if let Some(prior) = prior {
        prompt.push_str(&format!("\n\nEARLIER ANALYSIS:\n{}", strip_disclaimer(prior)));
    }
    prompt
}

pub fn format_holdings(holdings: &[Holding]) -> String {
    if holdings.is_empty() {
        return "No holdings on file.".to_string();
    }
    let total: f64 = holdings.iter().map(Holding::cost_basis).sum();
    let mut out = format!(
        "Total invested (at purchase prices): ${:.2} across {} holdings\n",
        total,
        holdings.len()
    );
    for h in holdings {
        out.push_str(&format!(
            "- {} ({}): {} units @ ${:.2} = ${:.2} | {} | {}",
            h.symbol,
            h.name,
            h.quantity,
            h.purchase_price,
            h.cost_basis(),
            h.asset_class,
            h.sector
        ));
        if let Some(date) = h.purchase_date {
            out.push_str(&format!(" | bought {}", date));
        }
        out.push('\n');
    }
    out
}

pub fn format_quote(q: &Quote) -> String {
    let mut out = format!("{}: ${:.2}", q.symbol, q.price);
    if let Some(change) = q.day_change_pct {
        out.push_str(&format!(" ({:+.2}% today)", change));
    }
    if let (Some(low), Some(high)) = (q.week52_low, q.week52_high) {
        out.push_str(&format!(", 52-week range ${:.2} - ${:.2}", low, high));
    }
    if let Some(sector) = &q.sector {
        out.push_str(&format!(", sector {}", sector));
    }
    out
}

pub fn format_quotes(quotes: &QuoteMap) -> String {
    if quotes.is_empty() {
        return "No ticker quotes requested.".to_string();
    }
    quotes
        .iter()
        .map(|(symbol, result)| match result {
            QuoteResult::Available(q) => format_quote(q),
            QuoteResult::Unavailable { error } => format!("{}: UNAVAILABLE ({})", symbol, error),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_snippets(title: &str, snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return String::new();
    }
    let mut out = format!("\n{}:\n", title);
    for s in snippets {
        out.push_str(&format!("- [{}] {} (source: {})\n", s.subject, s.text, s.source));
    }
    out
}

pub fn format_metrics(data: &CollaborationData) -> String {
    let mut out = String::new();
    for m in &data.metrics {
        match (m.current_price, m.market_value, m.gain, m.gain_pct) {
            (Some(price), Some(value), Some(gain), Some(pct)) => out.push_str(&format!(
                "- {}: {} units, cost ${:.2}, price ${:.2}, value ${:.2}, return ${:+.2} ({:+.2}%)\n",
                m.symbol, m.quantity, m.cost_basis, price, value, gain, pct
            )),
            _ => out.push_str(&format!(
                "- {}: {} units, cost ${:.2}, current price unavailable\n",
                m.symbol, m.quantity, m.cost_basis
            )),
        }
    }
    out.push_str(&format!("Total cost basis: ${:.2}\n", data.total_cost));
    match data.total_value {
        Some(value) => out.push_str(&format!(
            "Total market value: ${:.2} (return ${:+.2})\n",
            value,
            value - data.total_cost
        )),
        None => out.push_str("Total market value: incomplete, some prices unavailable\n"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_disclaimer_added_once() {
        let once = finalize(PromptMode::Advisory, "Consider trimming.");
        assert!(once.ends_with(DISCLAIMER));
        assert_eq!(finalize(PromptMode::Advisory, &once), once);
        assert_eq!(finalize(PromptMode::Informational, " You own AAPL. "), "You own AAPL.");
    }

    #[test]
    fn test_templates_are_not_blended() {
        let info = portfolio_prompt(PromptMode::Informational, "q", &[], "data");
        assert!(info.contains("Do not recommend"));
        assert!(!info.contains("hedged language"));

        let advisory = market_prompt(PromptMode::Advisory, "q", "data", Some("earlier"));
        assert!(advisory.contains("hedged language"));
        assert!(!advisory.contains("Do not recommend"));
        assert!(advisory.contains("EARLIER ANALYSIS"));
    }

    #[test]
    fn test_unavailable_quote_rendered_with_marker() {
        let mut quotes = QuoteMap::new();
        quotes.insert(
            "ZZZ".to_string(),
            QuoteResult::Unavailable {
                error: "timeout".to_string(),
            },
        );
        assert_eq!(format_quotes(&quotes), "ZZZ: UNAVAILABLE (timeout)");
    }

    #[test]
    fn test_history_keeps_recent_turns() {
        let history: Vec<HistoryTurn> = (0..10).map(|i| HistoryTurn::user(format!("turn {}", i))).collect();
        let rendered = render_history(&history);
        assert!(!rendered.contains("turn 3\n"));
        assert!(rendered.contains("User: turn 9"));
    }
}
