//! In-memory readers for development and tests

use super::{PortfolioReader, QuoteReader, SnippetReader};
use crate::error::OrchestrationError;
use crate::models::{Holding, Quote, Snippet, SnippetKind};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Holdings keyed by client id
pub struct InMemoryPortfolioReader {
    portfolios: RwLock<HashMap<String, Vec<Holding>>>,
}

impl InMemoryPortfolioReader {
    pub fn new() -> Self {
        Self {
            portfolios: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_portfolio(mut self, client_id: &str, holdings: Vec<Holding>) -> Self {
        self.portfolios
            .get_mut()
            .insert(client_id.to_string(), holdings);
        self
    }

    pub async fn insert(&self, client_id: &str, holdings: Vec<Holding>) {
        let mut portfolios = self.portfolios.write().await;
        portfolios.insert(client_id.to_string(), holdings);
    }
}

impl Default for InMemoryPortfolioReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortfolioReader for InMemoryPortfolioReader {
    async fn holdings(&self, client_id: &str) -> Result<Option<Vec<Holding>>> {
        let portfolios = self.portfolios.read().await;
        Ok(portfolios.get(client_id).cloned())
    }
}

/// Static quotes with injectable per-ticker failures
pub struct InMemoryQuoteReader {
    quotes: HashMap<String, Quote>,
    failing: HashSet<String>,
    lookups: AtomicUsize,
}

impl InMemoryQuoteReader {
    pub fn new() -> Self {
        Self {
            quotes: HashMap::new(),
            failing: HashSet::new(),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_quote(mut self, quote: Quote) -> Self {
        self.quotes.insert(quote.symbol.to_uppercase(), quote);
        self
    }

    /// Every lookup of `symbol` fails as if the upstream were down
    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_uppercase());
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryQuoteReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteReader for InMemoryQuoteReader {
    async fn quote(&self, symbol: &str) -> Result<Quote> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let key = symbol.to_uppercase();

        if self.failing.contains(&key) {
            return Err(OrchestrationError::UpstreamDataUnavailable(format!(
                "quote service unavailable for {}",
                key
            )));
        }

        self.quotes.get(&key).cloned().ok_or_else(|| {
            OrchestrationError::UpstreamDataUnavailable(format!("no quote for {}", key))
        })
    }
}

/// Snippets keyed by subject; unknown subjects fall back to a substring match
pub struct InMemorySnippetReader {
    kind: SnippetKind,
    snippets: Vec<Snippet>,
}

impl InMemorySnippetReader {
    pub fn new(kind: SnippetKind) -> Self {
        Self {
            kind,
            snippets: Vec::new(),
        }
    }

    pub fn with_snippet(mut self, subject: &str, text: &str, source: &str) -> Self {
        let score = 1.0 - (self.snippets.len() as f32 * 0.01);
        self.snippets.push(Snippet {
            kind: self.kind,
            subject: subject.to_string(),
            text: text.to_string(),
            source: source.to_string(),
            score,
        });
        self
    }
}

#[async_trait]
impl SnippetReader for InMemorySnippetReader {
    async fn search(&self, subject: &str, limit: usize) -> Result<Vec<Snippet>> {
        let needle = subject.to_lowercase();
        let mut hits: Vec<Snippet> = self
            .snippets
            .iter()
            .filter(|s| {
                s.subject.eq_ignore_ascii_case(subject)
                    || needle.contains(&s.subject.to_lowercase())
            })
            .cloned()
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
