use portfolio_intel_orchestrator::{
    agent::Orchestrator,
    config::EngineConfig,
    llm::{ChatCompletionsClient, InferenceClient, ScriptedInference},
    models::{Holding, Query, Quote, SnippetKind},
    readers::{InMemoryPortfolioReader, InMemoryQuoteReader, InMemorySnippetReader, Readers},
};
use chrono::NaiveDate;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn holding(symbol: &str, name: &str, sector: &str, quantity: f64, price: f64, bought: (i32, u32, u32)) -> Holding {
    Holding {
        symbol: symbol.to_string(),
        name: name.to_string(),
        asset_class: if symbol == "VOO" { "ETF" } else { "Equity" }.to_string(),
        sector: sector.to_string(),
        quantity,
        purchase_price: price,
        purchase_date: NaiveDate::from_ymd_opt(bought.0, bought.1, bought.2),
    }
}

fn quote(symbol: &str, price: f64, prior: f64, low: f64, high: f64, sector: &str) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        price,
        prior_close: Some(prior),
        day_change_pct: Some((price - prior) / prior * 100.0),
        week52_low: Some(low),
        week52_high: Some(high),
        sector: Some(sector.to_string()),
    }
}

/// Sample book used when no data service is wired in
fn demo_readers() -> Readers {
    let portfolio = InMemoryPortfolioReader::new().with_portfolio(
        "CLT-001",
        vec![
            holding("AAPL", "Apple Inc", "Technology", 25.0, 150.0, (2022, 3, 14)),
            holding("MSFT", "Microsoft Corp", "Technology", 10.0, 280.0, (2021, 11, 2)),
            holding("VOO", "Vanguard S&P 500 ETF", "Broad Market", 12.0, 390.0, (2023, 1, 9)),
        ],
    );

    let quotes = InMemoryQuoteReader::new()
        .with_quote(quote("AAPL", 189.5, 187.2, 164.1, 199.6, "Technology"))
        .with_quote(quote("MSFT", 415.3, 411.0, 309.4, 430.8, "Technology"))
        .with_quote(quote("VOO", 472.8, 470.1, 376.0, 480.2, "Broad Market"))
        .with_quote(quote("NVDA", 902.4, 880.0, 402.0, 974.0, "Technology"));

    let news = InMemorySnippetReader::new(SnippetKind::News)
        .with_snippet("AAPL", "Apple unveils new on-device AI features", "Market Wire")
        .with_snippet("NVDA", "Data center revenue more than doubles year over year", "Earnings Desk");

    let filings = InMemorySnippetReader::new(SnippetKind::Filing)
        .with_snippet("NVDA", "10-K: supply concentration in advanced packaging noted as a risk", "SEC EDGAR");

    Readers::new(Arc::new(portfolio), Arc::new(quotes))
        .with_news(Arc::new(news))
        .with_filings(Arc::new(filings))
}

/// Canned completions so the demo runs offline
fn offline_inference() -> ScriptedInference {
    ScriptedInference::new("Analysis noted.")
        .with_rule(
            "planning agent",
            "Portfolio Data Needed: YES\nMarket Data Needed: YES",
        )
        .with_rule(
            "portfolio specialist",
            "You hold AAPL (25 units), MSFT (10 units) and VOO (12 units).",
        )
        .with_rule(
            "market specialist",
            "AAPL trades at $189.50, MSFT at $415.30 and VOO at $472.80.",
        )
        .with_rule(
            "portfolio impact analyst",
            "All three positions are above cost. AAPL is up $987.50, MSFT $1353.00 and VOO $993.60.",
        )
        .with_rule(
            "You are ReportAgent",
            "RECOMMENDATION: HOLD\nCONFIDENCE LEVEL: 6/10\nEntry Price: $880\nTarget Price: $980\n\
             Stop-Loss: $840\nPosition Size: 5%\nTimeline: MEDIUM-TERM\nFINAL_ANALYSIS_COMPLETE",
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Portfolio Intelligence Orchestrator starting");

    let config = EngineConfig::from_env()?;

    let inference: Arc<dyn InferenceClient> = if config.llm.api_key.is_empty() {
        warn!("LLM_API_KEY not set; using offline scripted responses");
        Arc::new(offline_inference())
    } else {
        Arc::new(ChatCompletionsClient::new(&config.llm)?)
    };

    let orchestrator = Orchestrator::new(inference, demo_readers(), config)?;

    let args: Vec<String> = env::args().skip(1).collect();
    let text = if args.is_empty() {
        "How are my stocks doing?".to_string()
    } else {
        args.join(" ")
    };
    let client_id = env::var("DEMO_CLIENT_ID").unwrap_or_else(|_| "CLT-001".to_string());

    info!(query = %text, client_id = %client_id, "Running orchestrator");

    let result = orchestrator.respond(Query::new(text, client_id)).await;

    println!("\n=== RESPONSE ===");
    println!("{}", result.response);
    println!("\nValidated: {} (confidence {:.2})", result.validated, result.confidence);
    if let Some(decision) = &result.decision {
        println!("Decision: {} ({}%)", decision.recommendation, decision.confidence);
    }
    println!(
        "Agents: portfolio={} market={} collaboration={} deliberation={} validator={}",
        result.flags.portfolio_used,
        result.flags.market_used,
        result.flags.collaboration_used,
        result.flags.deliberation_used,
        result.flags.validator_used
    );
    println!("\nReasoning Trace:");
    for (i, trace) in result.trace.iter().enumerate() {
        println!("  {}: {}", i + 1, trace);
    }
    println!("\nCompleted in {} ms", result.execution_time_ms);

    Ok(())
}
