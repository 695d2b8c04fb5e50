//! Read-only data collaborators
//!
//! Portfolio, quote and snippet sources are consumed through narrow traits.
//! `Readers` bundles them with the retry policy and fan-out limits so agent
//! nodes never deal with transport concerns.

use crate::config::{ReaderConfig, RetryPolicy};
use crate::models::{Holding, Quote, QuoteMap, QuoteResult, Snippet};
use crate::retry::retry;
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub mod memory;
pub use memory::{InMemoryPortfolioReader, InMemoryQuoteReader, InMemorySnippetReader};

/// Symbol treated as a cash position, priced at 1.0 without a lookup
pub const CASH_SYMBOL: &str = "CASH";

#[async_trait]
pub trait PortfolioReader: Send + Sync {
    /// `Ok(None)` means the client is unknown
    async fn holdings(&self, client_id: &str) -> Result<Option<Vec<Holding>>>;
}

#[async_trait]
pub trait QuoteReader: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote>;
}

/// News, filings and knowledge-base search share one shape
#[async_trait]
pub trait SnippetReader: Send + Sync {
    async fn search(&self, subject: &str, limit: usize) -> Result<Vec<Snippet>>;
}

/// Look up several tickers on a bounded pool. A failed ticker becomes an
/// `Unavailable` entry; the batch itself never fails.
pub async fn fetch_quotes(
    reader: &dyn QuoteReader,
    symbols: &[String],
    concurrency: usize,
    policy: &RetryPolicy,
) -> QuoteMap {
    let mut unique: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        if !unique.contains(symbol) {
            unique.push(symbol.clone());
        }
    }

    stream::iter(unique)
        .map(|symbol: String| async move {
            if symbol.eq_ignore_ascii_case(CASH_SYMBOL) {
                return (symbol, QuoteResult::Available(Quote::cash()));
            }
            let result = retry(policy, "quote_lookup", || reader.quote(&symbol)).await;
            let entry = match result {
                Ok(quote) => QuoteResult::Available(quote),
                Err(e) => {
                    warn!(ticker = %symbol, error = %e, "Quote lookup failed");
                    QuoteResult::Unavailable {
                        error: e.to_string(),
                    }
                }
            };
            (symbol, entry)
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<QuoteMap>()
        .await
}

/// Constructor-injected bundle of readers used by the agent nodes
#[derive(Clone)]
pub struct Readers {
    pub portfolio: Arc<dyn PortfolioReader>,
    pub quotes: Arc<dyn QuoteReader>,
    pub news: Option<Arc<dyn SnippetReader>>,
    pub filings: Option<Arc<dyn SnippetReader>>,
    pub knowledge: Option<Arc<dyn SnippetReader>>,
    retry: RetryPolicy,
    config: ReaderConfig,
}

impl Readers {
    pub fn new(portfolio: Arc<dyn PortfolioReader>, quotes: Arc<dyn QuoteReader>) -> Self {
        Self {
            portfolio,
            quotes,
            news: None,
            filings: None,
            knowledge: None,
            retry: RetryPolicy::default(),
            config: ReaderConfig::default(),
        }
    }

    pub fn with_news(mut self, reader: Arc<dyn SnippetReader>) -> Self {
        self.news = Some(reader);
        self
    }

    pub fn with_filings(mut self, reader: Arc<dyn SnippetReader>) -> Self {
        self.filings = Some(reader);
        self
    }

    pub fn with_knowledge(mut self, reader: Arc<dyn SnippetReader>) -> Self {
        self.knowledge = Some(reader);
        self
    }

    pub fn with_policy(mut self, retry: RetryPolicy, config: ReaderConfig) -> Self {
        self.retry = retry;
        self.config = config;
        self
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub async fn load_holdings(&self, client_id: &str) -> Result<Option<Vec<Holding>>> {
        let reader = &self.portfolio;
        retry(&self.retry, "portfolio_lookup", || reader.holdings(client_id)).await
    }

    pub async fn quotes(&self, symbols: &[String]) -> QuoteMap {
        fetch_quotes(
            self.quotes.as_ref(),
            symbols,
            self.config.batch_concurrency,
            &self.retry,
        )
        .await
    }

    /// News for the first few non-cash tickers, in the order given
    pub async fn news_for(&self, symbols: &[String]) -> Vec<Snippet> {
        let Some(reader) = &self.news else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for symbol in symbols
            .iter()
            .filter(|s| !s.eq_ignore_ascii_case(CASH_SYMBOL))
            .take(self.config.news_ticker_limit)
        {
            out.extend(self.optional_search(reader.as_ref(), "news", symbol).await);
        }
        out
    }

    pub async fn filings_for(&self, symbol: &str) -> Vec<Snippet> {
        match &self.filings {
            Some(reader) => self.optional_search(reader.as_ref(), "filings", symbol).await,
            None => Vec::new(),
        }
    }

    pub async fn knowledge_for(&self, text: &str) -> Vec<Snippet> {
        match &self.knowledge {
            Some(reader) => self.optional_search(reader.as_ref(), "knowledge", text).await,
            None => Vec::new(),
        }
    }

    async fn optional_search(
        &self,
        reader: &dyn SnippetReader,
        source: &str,
        subject: &str,
    ) -> Vec<Snippet> {
        let limit = self.config.snippet_limit;
        match retry(&self.retry, source, || reader.search(subject, limit)).await {
            Ok(snippets) => {
                debug!(source, subject, count = snippets.len(), "Snippets loaded");
                snippets
            }
            Err(e) => {
                warn!(source, subject, error = %e, "Optional reader failed; continuing without it");
                Vec::new()
            }
        }
    }
}
