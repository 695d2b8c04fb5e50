//! Portfolio Intelligence Orchestrator
//!
//! A multi-agent engine that answers client questions about their holdings
//! and the market:
//! - Routes each query through a small acyclic graph of specialist nodes
//! - Runs a fixed-order deliberation team for single-security decisions
//! - Extracts structured recommendations from free-form analyst text
//! - Validates answers against the data actually consulted
//!
//! FLOW:
//! INPUT → CLARIFY? → PLAN → PORTFOLIO? → MARKET? → COLLABORATION? →
//! DELIBERATION? → VALIDATE → COMPLETE

pub mod agent;
pub mod classifier;
pub mod config;
pub mod deliberation;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod models;
pub mod nodes;
pub mod readers;
pub mod retry;
pub mod router;
pub mod state;
pub mod validator;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use classifier::IntentClassifier;
pub use config::EngineConfig;
pub use error::OrchestrationError;
pub use models::*;
