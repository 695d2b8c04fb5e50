//! Main orchestrator - the request entry point
//!
//! INPUT → CLARIFY? → PLAN → ROUTE (portfolio / market / collaboration /
//! deliberation) → VALIDATE → COMPLETE

use crate::config::EngineConfig;
use crate::deliberation::{trading_team, DeliberationEngine, DeliberationOutcome, RoundRobinTeam};
use crate::error::OrchestrationError;
use crate::extractor::DecisionExtractor;
use crate::llm::{InferenceClient, RetryingClient};
use crate::models::{AgentFlags, EngineResponse, Query};
use crate::nodes::Nodes;
use crate::readers::Readers;
use crate::router;
use crate::state::{NodeKind, WorkflowState};
use crate::validator::{create_default_validator, AmbiguityDetector, ResponseValidator};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Main orchestrator that coordinates the entire workflow
pub struct Orchestrator {
    inference: Arc<dyn InferenceClient>,
    readers: Readers,
    config: EngineConfig,
    detector: AmbiguityDetector,
    extractor: Arc<DecisionExtractor>,
    engine: Option<Arc<DeliberationEngine>>,
    nodes: Nodes,
}

impl Orchestrator {
    /// Wire the engine with the default six-specialist trading team. Every
    /// inference call goes through the configured retry policy.
    pub fn new(inference: Arc<dyn InferenceClient>, readers: Readers, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let inference: Arc<dyn InferenceClient> = Arc::new(RetryingClient::new(inference, config.retry.clone()));
        let readers = readers.with_policy(config.retry.clone(), config.readers.clone());
        let extractor = Arc::new(DecisionExtractor::new(&config.extractor)?);

        let team = RoundRobinTeam::new(
            trading_team(inference.clone(), &readers, &config.deliberation),
            config.deliberation.clone(),
        );
        let engine = Arc::new(DeliberationEngine::new(
            team,
            extractor.clone(),
            config.deliberation.clone(),
        ));

        let nodes = Nodes::new(
            inference.clone(),
            readers.clone(),
            &config,
            create_default_validator(config.validator.clone())?,
            Some(engine.clone()),
        );

        Ok(Self {
            detector: AmbiguityDetector::new(config.validator.identifier_denylist.clone()),
            inference,
            readers,
            config,
            extractor,
            engine: Some(engine),
            nodes,
        })
    }

    /// Replace the deliberation team; `None` disables deep analysis
    pub fn with_team(mut self, team: Option<RoundRobinTeam>) -> Result<Self> {
        self.engine = team.map(|t| {
            Arc::new(DeliberationEngine::new(
                t,
                self.extractor.clone(),
                self.config.deliberation.clone(),
            ))
        });
        self.nodes = Nodes::new(
            self.inference.clone(),
            self.readers.clone(),
            &self.config,
            create_default_validator(self.config.validator.clone())?,
            self.engine.clone(),
        );
        Ok(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Answer one query
    pub async fn run(&self, query: Query) -> Result<EngineResponse> {
        let start_time = Instant::now();

        if query.text.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput("query text is empty".to_string()));
        }

        let state = WorkflowState::new(query);
        info!(
            request_id = %state.request_id(),
            client_id = %state.query().client_id,
            history = state.query().history.len(),
            "Orchestrator: request received"
        );

        // Ambiguous questions are sent back before any agent runs
        if let Some(report) = self.detector.detect(state.query()) {
            let kinds: Vec<&str> = report.findings.iter().map(|f| f.kind.label()).collect();
            info!(
                request_id = %state.request_id(),
                kinds = ?kinds,
                "Query ambiguous; asking for clarification"
            );
            let verdict = ResponseValidator::clarification_verdict(&report);
            return Ok(EngineResponse {
                request_id: state.request_id().to_string(),
                response: report.clarification.clone(),
                plan: None,
                trace: vec![
                    "INPUT: Query received".to_string(),
                    format!("VALIDATE: query ambiguous ({})", kinds.join(", ")),
                ],
                flags: AgentFlags {
                    validator_used: true,
                    ..AgentFlags::default()
                },
                decision: None,
                validated: verdict.valid,
                confidence: verdict.confidence,
                needs_clarification: true,
                clarification: verdict.clarification,
                missing_data: Vec::new(),
                execution_time_ms: start_time.elapsed().as_millis() as u64,
            });
        }

        let mut state = state;
        state.record("INPUT: Query received");
        let state = router::drive(&self.nodes, state, self.config.routing).await?;

        let verdict = state.verdict();
        let response = EngineResponse {
            request_id: state.request_id().to_string(),
            response: state.response().unwrap_or_default().to_string(),
            plan: state.intent().cloned(),
            trace: {
                let mut trace = state.trace().to_vec();
                trace.push("COMPLETE: Response ready".to_string());
                trace
            },
            flags: AgentFlags {
                portfolio_used: state.has_visited(NodeKind::Portfolio),
                market_used: state.has_visited(NodeKind::Market),
                collaboration_used: state.has_visited(NodeKind::Collaboration),
                deliberation_used: state.has_visited(NodeKind::Deliberation),
                validator_used: state.has_visited(NodeKind::Validator),
            },
            decision: state.deliberation().map(|d| d.decision.clone()),
            validated: verdict.map(|v| v.valid).unwrap_or(false),
            confidence: verdict.map(|v| v.confidence).unwrap_or(0.0),
            needs_clarification: false,
            clarification: None,
            missing_data: verdict
                .map(|v| v.missing_data.clone())
                .unwrap_or_else(|| state.missing_data().to_vec()),
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            request_id = %response.request_id,
            validated = response.validated,
            confidence = response.confidence,
            elapsed_ms = response.execution_time_ms,
            "Orchestrator: request complete"
        );
        Ok(response)
    }

    /// `run`, with any failure turned into the generic envelope
    pub async fn respond(&self, query: Query) -> EngineResponse {
        let start_time = Instant::now();
        match self.run(query).await {
            Ok(response) => response,
            Err(e) => {
                let request_id = Uuid::new_v4().to_string();
                error!(request_id = %request_id, error = %e, "Request failed");
                let mut envelope = EngineResponse::failure(request_id);
                envelope.execution_time_ms = start_time.elapsed().as_millis() as u64;
                envelope
            }
        }
    }

    /// Run the deliberation team directly on one security
    pub async fn analyze_security(&self, symbol: &str, question: &str) -> Result<DeliberationOutcome> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| OrchestrationError::Configuration("no deliberation team configured".to_string()))?;
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(OrchestrationError::InvalidInput("symbol is empty".to_string()));
        }
        Ok(engine.analyze(&symbol, question).await)
    }
}
