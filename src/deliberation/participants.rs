//! Specialist participants for the trading deliberation

use super::{MessageKind, Participant, ToolExchange, Turn, TurnContext};
use crate::config::DeliberationConfig;
use crate::llm::InferenceClient;
use crate::models::{QuoteResult, Snippet};
use crate::readers::Readers;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Read-only lookup a participant runs before speaking
#[async_trait]
pub trait DataTool: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, symbol: &str) -> Result<String>;
}

/// LLM-backed specialist: runs its tools, then makes one inference call
pub struct AnalystParticipant {
    name: String,
    role: String,
    inference: Arc<dyn InferenceClient>,
    tools: Vec<Arc<dyn DataTool>>,
    temperature: f32,
}

impl AnalystParticipant {
    pub fn new(name: &str, role: &str, inference: Arc<dyn InferenceClient>) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            inference,
            tools: Vec::new(),
            temperature: 0.3,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn DataTool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_prompt(&self, ctx: &TurnContext<'_>, exchanges: &[ToolExchange]) -> String {
        let mut prompt = format!("You are {}, {}\n\nTASK:\n{}\n", self.name, self.role, ctx.task);

        if !exchanges.is_empty() {
            prompt.push_str("\nDATA YOU RETRIEVED:\n");
            for ex in exchanges {
                prompt.push_str(&format!("- {} -> {}\n", ex.call, ex.result));
            }
        }

        let spoken: Vec<_> = ctx
            .transcript
            .iter()
            .filter(|m| m.kind == MessageKind::Normal)
            .collect();
        if spoken.is_empty() {
            prompt.push_str("\nYou are the first to speak.\n");
        } else {
            prompt.push_str("\nDISCUSSION SO FAR:\n");
            for m in spoken {
                prompt.push_str(&format!("[{}] {}\n", m.speaker, m.content));
            }
        }

        prompt.push_str(&format!("\nRespond as {} only.", self.name));
        prompt
    }
}

#[async_trait]
impl Participant for AnalystParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn take_turn(&self, ctx: &TurnContext<'_>) -> Result<Turn> {
        let mut exchanges = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            let result = match tool.run(ctx.symbol).await {
                Ok(text) => text,
                Err(e) => format!("error: {}", e),
            };
            exchanges.push(ToolExchange {
                call: format!("{}({})", tool.name(), ctx.symbol),
                result,
            });
        }

        let prompt = self.build_prompt(ctx, &exchanges);
        let content = self.inference.complete(&prompt, self.temperature).await?;

        Ok(Turn {
            tool_exchanges: exchanges,
            content,
        })
    }
}

/// Current quote for the symbol
pub struct QuoteTool {
    readers: Readers,
}

impl QuoteTool {
    pub fn new(readers: Readers) -> Self {
        Self { readers }
    }
}

#[async_trait]
impl DataTool for QuoteTool {
    fn name(&self) -> &'static str {
        "quote_lookup"
    }

    async fn run(&self, symbol: &str) -> Result<String> {
        let quotes = self.readers.quotes(&[symbol.to_string()]).await;
        Ok(match quotes.get(symbol) {
            Some(QuoteResult::Available(q)) => crate::nodes::prompts::format_quote(q),
            Some(QuoteResult::Unavailable { error }) => format!("{}: unavailable ({})", symbol, error),
            None => format!("{}: unavailable", symbol),
        })
    }
}

/// Recent headlines
pub struct NewsTool {
    readers: Readers,
}

impl NewsTool {
    pub fn new(readers: Readers) -> Self {
        Self { readers }
    }
}

#[async_trait]
impl DataTool for NewsTool {
    fn name(&self) -> &'static str {
        "news_search"
    }

    async fn run(&self, symbol: &str) -> Result<String> {
        Ok(format_snippets(&self.readers.news_for(&[symbol.to_string()]).await))
    }
}

/// Regulatory filing excerpts
pub struct FilingsTool {
    readers: Readers,
}

impl FilingsTool {
    pub fn new(readers: Readers) -> Self {
        Self { readers }
    }
}

#[async_trait]
impl DataTool for FilingsTool {
    fn name(&self) -> &'static str {
        "filing_search"
    }

    async fn run(&self, symbol: &str) -> Result<String> {
        Ok(format_snippets(&self.readers.filings_for(symbol).await))
    }
}

/// Per-trade risk budget against the configured portfolio value
pub struct RiskBudgetTool {
    readers: Readers,
    portfolio_value: f64,
    risk_per_trade_pct: f64,
}

impl RiskBudgetTool {
    pub fn new(readers: Readers, config: &DeliberationConfig) -> Self {
        Self {
            readers,
            portfolio_value: config.portfolio_value,
            risk_per_trade_pct: config.risk_per_trade_pct,
        }
    }
}

#[async_trait]
impl DataTool for RiskBudgetTool {
    fn name(&self) -> &'static str {
        "risk_budget"
    }

    async fn run(&self, symbol: &str) -> Result<String> {
        let budget = self.portfolio_value * self.risk_per_trade_pct / 100.0;
        let quotes = self.readers.quotes(&[symbol.to_string()]).await;
        let price = quotes.get(symbol).and_then(|r| r.quote()).map(|q| q.price);

        Ok(match price {
            Some(p) if p > 0.0 => format!(
                "Risk budget ${:.2} ({}% of ${:.2}); last price ${:.2}",
                budget, self.risk_per_trade_pct, self.portfolio_value, p
            ),
            _ => format!(
                "Risk budget ${:.2} ({}% of ${:.2}); price unavailable",
                budget, self.risk_per_trade_pct, self.portfolio_value
            ),
        })
    }
}

fn format_snippets(snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return "no results".to_string();
    }
    snippets
        .iter()
        .map(|s| format!("{} [{}]", s.text, s.source))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// The six-specialist trading desk, in speaking order
pub fn trading_team(
    inference: Arc<dyn InferenceClient>,
    readers: &Readers,
    config: &DeliberationConfig,
) -> Vec<Arc<dyn Participant>> {
    let organiser = AnalystParticipant::new(
        "OrganiserAgent",
        "the desk coordinator. Summarize the current market data for the security and \
         set out what the team must establish. End with MARKET_DATA_COMPLETE.",
        inference.clone(),
    )
    .with_tool(Arc::new(QuoteTool::new(readers.clone())));

    let risk = AnalystParticipant::new(
        "RiskManager",
        "the risk manager. Assess downside risk and size the position so a stop-out \
         loses no more than the risk budget. End with RISK_ANALYSIS_COMPLETE.",
        inference.clone(),
    )
    .with_tool(Arc::new(RiskBudgetTool::new(readers.clone(), config)));

    let data = AnalystParticipant::new(
        "DataAnalyst",
        "the fundamentals analyst. Review news and filings for catalysts and red flags. \
         End with DATA_ANALYSIS_COMPLETE.",
        inference.clone(),
    )
    .with_tool(Arc::new(NewsTool::new(readers.clone())))
    .with_tool(Arc::new(FilingsTool::new(readers.clone())));

    let quant = AnalystParticipant::new(
        "QuantitativeAnalyst",
        "the quantitative analyst. Interpret price position within the 52-week range and \
         daily momentum. End with QUANTITATIVE_ANALYSIS_COMPLETE.",
        inference.clone(),
    );

    let strategy = AnalystParticipant::new(
        "StrategyDeveloper",
        "the strategist. Propose Entry Price, Target Price, Stop-Loss, Position Size (%) \
         and Timeline. End with STRATEGY_DEVELOPMENT_COMPLETE.",
        inference.clone(),
    );

    let report = AnalystParticipant::new(
        "ReportAgent",
        &format!(
            "the report writer. Write the final report with a RECOMMENDATION line, a \
             CONFIDENCE LEVEL: X/10 line and the execution parameters. End with {}.",
            config.sentinel
        ),
        inference,
    )
    .with_temperature(0.2);

    vec![
        Arc::new(organiser),
        Arc::new(risk),
        Arc::new(data),
        Arc::new(quant),
        Arc::new(strategy),
        Arc::new(report),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliberation::{AgentMessage, DeliberationTask, RoundRobinTeam, TerminationReason};
    use crate::llm::ScriptedInference;
    use crate::models::{Quote, SnippetKind};
    use crate::readers::{InMemoryPortfolioReader, InMemoryQuoteReader, InMemorySnippetReader};

    fn readers() -> Readers {
        let quotes = InMemoryQuoteReader::new().with_quote(Quote {
            symbol: "NVDA".to_string(),
            price: 900.0,
            prior_close: Some(880.0),
            day_change_pct: Some(2.27),
            week52_low: Some(400.0),
            week52_high: Some(950.0),
            sector: Some("Technology".to_string()),
        });
        let news = InMemorySnippetReader::new(SnippetKind::News)
            .with_snippet("NVDA", "Data center revenue doubles", "wire");
        Readers::new(Arc::new(InMemoryPortfolioReader::new()), Arc::new(quotes))
            .with_news(Arc::new(news))
    }

    #[tokio::test]
    async fn test_analyst_records_tool_exchanges() {
        let inference = Arc::new(ScriptedInference::new("Price is firm."));
        let analyst = AnalystParticipant::new("OrganiserAgent", "the coordinator.", inference.clone())
            .with_tool(Arc::new(QuoteTool::new(readers())))
            .with_tool(Arc::new(NewsTool::new(readers())));

        let history = vec![AgentMessage {
            speaker: "Earlier".to_string(),
            index: 0,
            content: "context".to_string(),
            kind: MessageKind::Normal,
        }];
        let turn = analyst
            .take_turn(&TurnContext {
                symbol: "NVDA",
                task: "Analyze NVDA",
                transcript: &history,
            })
            .await
            .unwrap();

        assert_eq!(turn.tool_exchanges.len(), 2);
        assert_eq!(turn.tool_exchanges[0].call, "quote_lookup(NVDA)");
        assert!(turn.tool_exchanges[0].result.contains("900.00"));
        assert!(turn.tool_exchanges[1].result.contains("Data center revenue doubles"));

        let prompt = &inference.prompts()[0];
        assert!(prompt.contains("[Earlier] context"));
        assert!(prompt.contains("Respond as OrganiserAgent only."));
    }

    #[tokio::test]
    async fn test_trading_team_runs_in_fixed_order() {
        let inference = Arc::new(
            ScriptedInference::new("Noted.")
                .with_rule("You are ReportAgent", "RECOMMENDATION: HOLD\nCONFIDENCE LEVEL: 6/10\nFINAL_ANALYSIS_COMPLETE"),
        );
        let config = DeliberationConfig::default();
        let team = RoundRobinTeam::new(trading_team(inference.clone(), &readers(), &config), config.clone());
        assert_eq!(team.len(), 6);

        let task = DeliberationTask::new("NVDA", "Should I buy NVDA?", &config);
        let transcript = team.run(&task).await;

        assert_eq!(transcript.termination, TerminationReason::Sentinel);
        let order: Vec<_> = transcript.spoken().map(|m| m.speaker.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "OrganiserAgent",
                "RiskManager",
                "DataAnalyst",
                "QuantitativeAnalyst",
                "StrategyDeveloper",
                "ReportAgent"
            ]
        );
        assert_eq!(inference.call_count(), 6);
        assert!(transcript
            .messages
            .iter()
            .any(|m| m.kind == MessageKind::ToolResult && m.content.contains("Risk budget $2000.00")));
    }
}
