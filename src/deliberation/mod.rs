//! Round-robin deliberation
//!
//! A fixed, ordered team analyses one security. Participants speak strictly
//! in turn, each receiving the task and the full transcript so far. The
//! conversation is produced lazily as a stream and the consumer stops it as
//! soon as a termination condition fires:
//! - the sentinel phrase appears in the latest message
//! - every participant has spoken once
//! - the raw message ceiling (tool sub-messages included) is reached
//!
//! Participants keep no state between turns, so any transcript prefix can be
//! resumed with `RoundRobinTeam::stream_from`.

use crate::config::DeliberationConfig;
use crate::extractor::DecisionExtractor;
use crate::models::{Decision, ExecutionParams};
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod participants;
pub use participants::{trading_team, AnalystParticipant, DataTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Normal,
    ToolCall,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub speaker: String,
    pub index: usize,
    pub content: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Sentinel,
    SpeakerQuota,
    HardCeiling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationTranscript {
    pub messages: Vec<AgentMessage>,
    pub termination: TerminationReason,
}

impl DeliberationTranscript {
    /// Messages that count as a participant speaking
    pub fn spoken(&self) -> impl Iterator<Item = &AgentMessage> {
        self.messages.iter().filter(|m| m.kind == MessageKind::Normal)
    }

    pub fn distinct_speakers(&self) -> usize {
        self.spoken()
            .map(|m| m.speaker.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn render(&self) -> String {
        self.spoken()
            .map(|m| format!("{}: {}", m.speaker, m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// What a participant sees when it is its turn
pub struct TurnContext<'a> {
    pub symbol: &'a str,
    pub task: &'a str,
    pub transcript: &'a [AgentMessage],
}

/// A read-only data call made before speaking
#[derive(Debug, Clone)]
pub struct ToolExchange {
    pub call: String,
    pub result: String,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub tool_exchanges: Vec<ToolExchange>,
    pub content: String,
}

#[async_trait]
pub trait Participant: Send + Sync {
    fn name(&self) -> &str;

    async fn take_turn(&self, ctx: &TurnContext<'_>) -> Result<Turn>;
}

/// The security under analysis and the instruction every participant gets
#[derive(Debug, Clone)]
pub struct DeliberationTask {
    pub symbol: String,
    pub prompt: String,
}

impl DeliberationTask {
    pub fn new(symbol: &str, question: &str, config: &DeliberationConfig) -> Self {
        let prompt = format!(
            "Analyze {symbol} for a trading decision.\n\
             Client question: {question}\n\
             Portfolio value: ${value:.2}\n\
             Risk per trade: {risk}%\n\n\
             Work as a team, one specialist at a time. Build on what earlier specialists \
             wrote and use only the data you are given. The final report must include:\n\
             RECOMMENDATION: one of STRONG BUY, BUY, HOLD, WAIT, AVOID, SELL, STRONG SELL\n\
             CONFIDENCE LEVEL: X/10\n\
             Entry Price, Target Price, Stop-Loss, Position Size (%), Timeline \
             (SHORT-TERM, MEDIUM-TERM or LONG-TERM)\n\
             The report ends with {sentinel}.",
            symbol = symbol,
            question = question,
            value = config.portfolio_value,
            risk = config.risk_per_trade_pct,
            sentinel = config.sentinel,
        );
        Self {
            symbol: symbol.to_string(),
            prompt,
        }
    }
}

/// Fixed-order team
pub struct RoundRobinTeam {
    participants: Vec<Arc<dyn Participant>>,
    config: DeliberationConfig,
}

struct StreamState<'a> {
    team: &'a RoundRobinTeam,
    task: &'a DeliberationTask,
    transcript: Vec<AgentMessage>,
    pending: VecDeque<AgentMessage>,
    turn: usize,
}

impl RoundRobinTeam {
    pub fn new(participants: Vec<Arc<dyn Participant>>, config: DeliberationConfig) -> Self {
        Self {
            participants,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn roster(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.name()).collect()
    }

    /// Lazily produced conversation starting from scratch
    pub fn stream<'a>(
        &'a self,
        task: &'a DeliberationTask,
    ) -> impl Stream<Item = AgentMessage> + 'a {
        self.stream_from(task, Vec::new())
    }

    /// Lazily produced conversation resuming after `prefix`. The next speaker
    /// is the one after the last counted message in the prefix.
    pub fn stream_from<'a>(
        &'a self,
        task: &'a DeliberationTask,
        prefix: Vec<AgentMessage>,
    ) -> impl Stream<Item = AgentMessage> + 'a {
        let turn = prefix.iter().filter(|m| m.kind == MessageKind::Normal).count();
        let state = StreamState {
            team: self,
            task,
            transcript: prefix,
            pending: VecDeque::new(),
            turn,
        };

        stream::unfold(state, |mut st| async move {
            if let Some(msg) = st.pending.pop_front() {
                return Some((msg, st));
            }

            let team = st.team;
            if team.participants.is_empty() || st.turn >= team.config.max_turns {
                return None;
            }

            let participant = &team.participants[st.turn % team.participants.len()];
            let produced = team
                .play_turn(participant.as_ref(), st.task, &st.transcript)
                .await;
            st.turn += 1;
            st.transcript.extend(produced.iter().cloned());
            st.pending.extend(produced);
            st.pending.pop_front().map(|msg| (msg, st))
        })
    }

    /// Consume the stream until the first termination condition fires
    pub async fn run(&self, task: &DeliberationTask) -> DeliberationTranscript {
        self.run_from(task, Vec::new()).await
    }

    pub async fn run_from(
        &self,
        task: &DeliberationTask,
        prefix: Vec<AgentMessage>,
    ) -> DeliberationTranscript {
        let quota = self.participants.len();
        let mut messages = prefix.clone();
        let mut speakers: HashSet<String> = prefix
            .iter()
            .filter(|m| m.kind == MessageKind::Normal)
            .map(|m| m.speaker.clone())
            .collect();

        let mut conversation = Box::pin(self.stream_from(task, prefix));
        let mut termination = TerminationReason::HardCeiling;

        while let Some(msg) = conversation.next().await {
            debug!(
                speaker = %msg.speaker,
                index = msg.index,
                kind = ?msg.kind,
                "Deliberation message"
            );

            let counted = msg.kind == MessageKind::Normal;
            let has_sentinel = counted && msg.content.contains(&self.config.sentinel);
            if counted {
                speakers.insert(msg.speaker.clone());
            }
            messages.push(msg);

            if has_sentinel {
                termination = TerminationReason::Sentinel;
                break;
            }
            if counted && speakers.len() >= quota {
                termination = TerminationReason::SpeakerQuota;
                break;
            }
            if messages.len() >= self.config.max_messages {
                termination = TerminationReason::HardCeiling;
                break;
            }
        }

        info!(
            symbol = %task.symbol,
            messages = messages.len(),
            speakers = speakers.len(),
            termination = ?termination,
            "Deliberation finished"
        );

        DeliberationTranscript {
            messages,
            termination,
        }
    }

    async fn play_turn(
        &self,
        participant: &dyn Participant,
        task: &DeliberationTask,
        transcript: &[AgentMessage],
    ) -> Vec<AgentMessage> {
        let ctx = TurnContext {
            symbol: &task.symbol,
            task: &task.prompt,
            transcript,
        };
        let speaker = participant.name().to_string();
        let mut index = transcript.len();
        let mut next_index = || {
            let i = index;
            index += 1;
            i
        };

        match participant.take_turn(&ctx).await {
            Ok(turn) => {
                let mut out = Vec::with_capacity(turn.tool_exchanges.len() * 2 + 1);
                for exchange in turn.tool_exchanges {
                    out.push(AgentMessage {
                        speaker: speaker.clone(),
                        index: next_index(),
                        content: exchange.call,
                        kind: MessageKind::ToolCall,
                    });
                    out.push(AgentMessage {
                        speaker: speaker.clone(),
                        index: next_index(),
                        content: exchange.result,
                        kind: MessageKind::ToolResult,
                    });
                }
                out.push(AgentMessage {
                    speaker,
                    index: next_index(),
                    content: turn.content,
                    kind: MessageKind::Normal,
                });
                out
            }
            Err(e) => {
                warn!(speaker = %speaker, error = %e, "Participant failed; recording degraded turn");
                vec![AgentMessage {
                    content: format!("[{} unavailable: {}]", speaker, e),
                    speaker,
                    index: next_index(),
                    kind: MessageKind::Normal,
                }]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent: String,
    pub content: String,
}

/// Sizing derived from the extracted parameters and the risk budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub portfolio_value: f64,
    pub risk_per_trade_pct: f64,
    pub risk_budget: f64,
    pub params: Option<ExecutionParams>,
    /// Shares such that hitting the stop loses at most the risk budget
    pub max_shares_at_stop: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationOutcome {
    pub symbol: String,
    pub transcript: DeliberationTranscript,
    pub decision: Decision,
    pub summary: String,
    pub agent_outputs: Vec<AgentOutput>,
    pub execution_plan: ExecutionPlan,
    pub fingerprint: String,
}

/// Team plus extraction: turns a question about one security into an outcome
pub struct DeliberationEngine {
    team: RoundRobinTeam,
    extractor: Arc<DecisionExtractor>,
    config: DeliberationConfig,
}

impl DeliberationEngine {
    pub fn new(
        team: RoundRobinTeam,
        extractor: Arc<DecisionExtractor>,
        config: DeliberationConfig,
    ) -> Self {
        Self {
            team,
            extractor,
            config,
        }
    }

    pub fn team(&self) -> &RoundRobinTeam {
        &self.team
    }

    pub async fn analyze(&self, symbol: &str, question: &str) -> DeliberationOutcome {
        let task = DeliberationTask::new(symbol, question, &self.config);
        let transcript = self.team.run(&task).await;
        self.synthesize(symbol, transcript)
    }

    /// Build an outcome from whatever was collected, however the run ended
    pub fn synthesize(&self, symbol: &str, transcript: DeliberationTranscript) -> DeliberationOutcome {
        let closing_speaker = self.team.roster().last().map(|s| s.to_string());
        let final_text = transcript
            .spoken()
            .filter(|m| Some(&m.speaker) == closing_speaker.as_ref())
            .last()
            .or_else(|| transcript.spoken().last())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let decision = self
            .extractor
            .extract_with_fallback(&final_text, &transcript.render());

        let agent_outputs = transcript
            .spoken()
            .map(|m| AgentOutput {
                agent: m.speaker.clone(),
                content: self.clean(&m.content),
            })
            .collect();

        let risk_budget = self.config.portfolio_value * self.config.risk_per_trade_pct / 100.0;
        let max_shares_at_stop = decision.execution.as_ref().and_then(|p| {
            let (entry, stop) = (p.entry_price?, p.stop_loss?);
            let per_share = (entry - stop).abs();
            (per_share > 0.0).then(|| (risk_budget / per_share).floor())
        });

        let execution_plan = ExecutionPlan {
            portfolio_value: self.config.portfolio_value,
            risk_per_trade_pct: self.config.risk_per_trade_pct,
            risk_budget,
            params: decision.execution.clone(),
            max_shares_at_stop,
        };

        let summary = if final_text.is_empty() {
            format!("The analysis of {} ended before any specialist reported.", symbol)
        } else {
            self.clean(&final_text)
        };

        DeliberationOutcome {
            symbol: symbol.to_string(),
            fingerprint: compute_transcript_fingerprint(&transcript.messages),
            transcript,
            decision,
            summary,
            agent_outputs,
            execution_plan,
        }
    }

    /// Consumer-facing text: the configured sentinel and the extractor's
    /// noise markers removed
    fn clean(&self, text: &str) -> String {
        let text = if self.config.sentinel.is_empty() {
            text.to_string()
        } else {
            text.replace(self.config.sentinel.as_str(), "")
        };
        self.extractor.strip_noise(&text)
    }
}

/// SHA256 over the serialized transcript, streamed into the hasher
pub fn compute_transcript_fingerprint(messages: &[AgentMessage]) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), messages).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::error::OrchestrationError;
    use crate::models::Recommendation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Says the same thing every turn, optionally after some tool calls
    struct Echo {
        name: String,
        says: String,
        tool_calls: usize,
        fail: bool,
        turns: AtomicUsize,
    }

    impl Echo {
        fn new(name: &str, says: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                says: says.to_string(),
                tool_calls: 0,
                fail: false,
                turns: AtomicUsize::new(0),
            })
        }

        fn with_tools(name: &str, says: &str, tool_calls: usize) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                says: says.to_string(),
                tool_calls,
                fail: false,
                turns: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                says: String::new(),
                tool_calls: 0,
                fail: true,
                turns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Participant for Echo {
        fn name(&self) -> &str {
            &self.name
        }

        async fn take_turn(&self, ctx: &TurnContext<'_>) -> Result<Turn> {
            self.turns.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OrchestrationError::InferenceFailure("model offline".into()));
            }
            Ok(Turn {
                tool_exchanges: (0..self.tool_calls)
                    .map(|i| ToolExchange {
                        call: format!("lookup#{}({})", i, ctx.symbol),
                        result: "ok".to_string(),
                    })
                    .collect(),
                content: format!("{} (saw {} messages)", self.says, ctx.transcript.len()),
            })
        }
    }

    fn config() -> DeliberationConfig {
        DeliberationConfig::default()
    }

    fn task() -> DeliberationTask {
        DeliberationTask::new("NVDA", "Should I buy NVDA?", &config())
    }

    fn as_participants(list: Vec<Arc<Echo>>) -> Vec<Arc<dyn Participant>> {
        list.into_iter().map(|p| p as Arc<dyn Participant>).collect()
    }

    #[tokio::test]
    async fn test_stops_when_every_participant_has_spoken() {
        let a = Echo::new("A", "first");
        let b = Echo::new("B", "second");
        let c = Echo::new("C", "third");
        let team = RoundRobinTeam::new(as_participants(vec![a.clone(), b.clone(), c.clone()]), config());

        let transcript = team.run(&task()).await;

        assert_eq!(transcript.termination, TerminationReason::SpeakerQuota);
        assert_eq!(transcript.distinct_speakers(), 3);
        assert_eq!(transcript.spoken().count(), 3);
        let order: Vec<_> = transcript.spoken().map(|m| m.speaker.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert_eq!(a.turns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sentinel_stops_early_and_lazily() {
        let a = Echo::new("A", "first");
        let b = Echo::new("B", "done FINAL_ANALYSIS_COMPLETE");
        let c = Echo::new("C", "never");
        let team = RoundRobinTeam::new(as_participants(vec![a, b, c.clone()]), config());

        let transcript = team.run(&task()).await;

        assert_eq!(transcript.termination, TerminationReason::Sentinel);
        assert_eq!(transcript.spoken().count(), 2);
        assert_eq!(c.turns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tool_messages_do_not_count_but_hit_ceiling() {
        let a = Echo::with_tools("A", "first", 3);
        let b = Echo::with_tools("B", "second", 3);
        let c = Echo::with_tools("C", "third", 3);
        let cfg = DeliberationConfig {
            max_messages: 10,
            ..config()
        };
        let team = RoundRobinTeam::new(as_participants(vec![a, b, c]), cfg);

        let transcript = team.run(&task()).await;

        assert_eq!(transcript.termination, TerminationReason::HardCeiling);
        assert_eq!(transcript.messages.len(), 10);
        // 7 messages for A, then 3 of B's tool messages
        assert_eq!(transcript.spoken().count(), 1);
        assert_eq!(transcript.messages[0].kind, MessageKind::ToolCall);
        assert_eq!(transcript.messages[1].kind, MessageKind::ToolResult);
    }

    #[tokio::test]
    async fn test_participant_failure_is_labeled_and_protocol_continues() {
        let team = RoundRobinTeam::new(
            as_participants(vec![Echo::new("A", "first"), Echo::failing("B"), Echo::new("C", "third")]),
            config(),
        );

        let transcript = team.run(&task()).await;

        assert_eq!(transcript.termination, TerminationReason::SpeakerQuota);
        let b = transcript.spoken().find(|m| m.speaker == "B").unwrap();
        assert!(b.content.starts_with("[B unavailable:"));
    }

    #[tokio::test]
    async fn test_resume_from_prefix_continues_with_next_speaker() {
        let team = RoundRobinTeam::new(
            as_participants(vec![Echo::new("A", "first"), Echo::new("B", "second"), Echo::new("C", "third")]),
            config(),
        );
        let task = task();
        let prefix: Vec<AgentMessage> = team.stream(&task).take(1).collect().await;

        let transcript = team.run_from(&task, prefix).await;
        let order: Vec<_> = transcript.spoken().map(|m| m.speaker.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert!(transcript.messages[2].content.contains("saw 2 messages"));
    }

    #[tokio::test]
    async fn test_turn_ceiling_without_quota() {
        let cfg = DeliberationConfig {
            max_turns: 2,
            ..config()
        };
        let team = RoundRobinTeam::new(
            as_participants(vec![Echo::new("A", "a"), Echo::new("B", "b"), Echo::new("C", "c")]),
            cfg,
        );
        let transcript = team.run(&task()).await;
        assert_eq!(transcript.termination, TerminationReason::HardCeiling);
        assert_eq!(transcript.spoken().count(), 2);
    }

    #[tokio::test]
    async fn test_engine_synthesizes_decision_and_plan() {
        let report = "RECOMMENDATION: BUY\nCONFIDENCE LEVEL: 7/10\nEntry Price: $100\n\
                      Stop-Loss: $90\nTimeline: SHORT-TERM\nFINAL_ANALYSIS_COMPLETE";
        let team = RoundRobinTeam::new(
            as_participants(vec![Echo::new("Analyst", "Momentum is strong."), Echo::new("ReportAgent", report)]),
            config(),
        );
        let extractor = Arc::new(DecisionExtractor::new(&ExtractorConfig::default()).unwrap());
        let engine = DeliberationEngine::new(team, extractor, config());

        let outcome = engine.analyze("NVDA", "Should I buy NVDA?").await;

        assert_eq!(outcome.transcript.termination, TerminationReason::Sentinel);
        assert_eq!(outcome.decision.recommendation, Recommendation::Buy);
        assert_eq!(outcome.decision.confidence, 70);
        assert_eq!(outcome.execution_plan.risk_budget, 2000.0);
        assert_eq!(outcome.execution_plan.max_shares_at_stop, Some(200.0));
        assert!(!outcome.summary.contains("FINAL_ANALYSIS_COMPLETE"));
        assert_eq!(outcome.agent_outputs.len(), 2);
        assert_eq!(outcome.fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn test_custom_sentinel_is_stripped_from_outputs() {
        let cfg = DeliberationConfig {
            sentinel: "REPORT_DONE".to_string(),
            ..config()
        };
        let team = RoundRobinTeam::new(
            as_participants(vec![
                Echo::new("Analyst", "Momentum is strong."),
                Echo::new("ReportAgent", "RECOMMENDATION: BUY\nREPORT_DONE"),
            ]),
            cfg.clone(),
        );
        let extractor = Arc::new(DecisionExtractor::new(&ExtractorConfig::default()).unwrap());
        let engine = DeliberationEngine::new(team, extractor, cfg);

        let outcome = engine.analyze("NVDA", "Should I buy NVDA?").await;

        assert_eq!(outcome.transcript.termination, TerminationReason::Sentinel);
        assert_eq!(outcome.decision.recommendation, Recommendation::Buy);
        assert!(!outcome.summary.contains("REPORT_DONE"));
        assert!(outcome.summary.starts_with("RECOMMENDATION: BUY"));
        assert!(outcome.agent_outputs.iter().all(|o| !o.content.contains("REPORT_DONE")));
    }

    #[tokio::test]
    async fn test_engine_default_decision_when_nothing_said() {
        let cfg = DeliberationConfig {
            max_messages: 1,
            ..config()
        };
        let team = RoundRobinTeam::new(
            as_participants(vec![Echo::with_tools("A", "x", 2), Echo::new("B", "y")]),
            cfg.clone(),
        );
        let extractor = Arc::new(DecisionExtractor::new(&ExtractorConfig::default()).unwrap());
        let engine = DeliberationEngine::new(team, extractor, cfg);

        let outcome = engine.analyze("NVDA", "Should I buy NVDA?").await;
        assert_eq!(outcome.transcript.termination, TerminationReason::HardCeiling);
        assert_eq!(outcome.decision.recommendation, Recommendation::Hold);
        assert_eq!(outcome.decision.confidence, 50);
        assert!(outcome.summary.contains("ended before"));
    }
}
