//! Completion resolver: turns progress records and transport lifecycle events
//! into at most one terminal outcome per session.
//!
//! Precedence per record: `error` field, success status, failure status, the
//! `end` sentinel, then "keep streaming". Transport loss is handled separately
//! by [`CompletionResolver::on_transport_lost`], which either asks for a
//! reconnect or settles the session.

use crate::core::model::{JobStatus, LifecycleState, ProgressRecord, Terminal, TerminalOutcome, TerminalReason};
use std::time::Duration;

pub const CANCELLED_MESSAGE: &str = "cancelled";
pub const CONNECTION_CLOSED_MESSAGE: &str = "Download completed (connection closed)";

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnects allowed in a row without the stream making progress.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        let ms = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }
}

/// How the transport went away.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportLoss {
    /// Server ended the stream without an error.
    Closed,
    /// The connection broke mid-stream.
    Errored { detail: String },
    /// Opening (or re-opening) the stream failed. `definitive` means retrying
    /// cannot help, e.g. the server no longer knows the job id.
    OpenFailed { detail: String, definitive: bool },
}

impl TransportLoss {
    fn is_definitive(&self) -> bool {
        matches!(self, Self::OpenFailed { definitive: true, .. })
    }

    fn detail(&self) -> Option<&str> {
        match self {
            Self::Closed => None,
            Self::Errored { detail } | Self::OpenFailed { detail, .. } => Some(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Keep going.
    Continue,
    /// Session already terminal; the input was dropped.
    Ignored,
    Reconnect { attempt: u32, delay: Duration },
    Terminal(Terminal),
}

#[derive(Debug, Clone)]
pub struct CompletionResolver {
    state: LifecycleState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl CompletionResolver {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { state: LifecycleState::Idle, attempts: 0, policy }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn on_open(&mut self) -> Verdict {
        if self.is_terminal() {
            return Verdict::Ignored;
        }
        self.state = LifecycleState::Streaming;
        Verdict::Continue
    }

    /// `last_message` is the session's last known text after merging `rec`.
    pub fn on_record(&mut self, rec: &ProgressRecord, last_message: Option<&str>) -> Verdict {
        if self.is_terminal() {
            return Verdict::Ignored;
        }
        if rec.is_heartbeat {
            return Verdict::Continue;
        }

        if let Some(err) = rec.error.as_deref().filter(|e| !e.is_empty()) {
            return self.finish(TerminalOutcome::Failure, TerminalReason::ServerError, Some(err.to_string()));
        }

        let text = rec.message.as_deref().or(rec.step.as_deref()).or(last_message).map(str::to_string);
        match &rec.status {
            Some(s) if s.is_success() => self.finish(TerminalOutcome::Success, TerminalReason::JobStatus, text),
            Some(s) if s.is_failure() => self.finish(TerminalOutcome::Failure, TerminalReason::JobStatus, text),
            Some(JobStatus::End) => {
                tracing::warn!("stream-end sentinel without terminal status, assuming success");
                self.finish(
                    TerminalOutcome::Success,
                    TerminalReason::EndSentinel,
                    last_message.map(str::to_string),
                )
            }
            _ => Verdict::Continue,
        }
    }

    /// The stream delivered something new, so the reconnect budget starts over.
    /// Records that merely repeat known state do not count.
    pub fn note_progress(&mut self) {
        self.attempts = 0;
    }

    pub fn on_transport_lost(&mut self, loss: TransportLoss, last_message: Option<&str>) -> Verdict {
        if self.is_terminal() {
            return Verdict::Ignored;
        }

        if !loss.is_definitive() && self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            return Verdict::Reconnect {
                attempt: self.attempts,
                delay: self.policy.delay_for(self.attempts),
            };
        }

        match self.state {
            LifecycleState::Streaming => {
                tracing::warn!(?loss, "transport gone without terminal status, assuming success");
                let text = last_message.unwrap_or(CONNECTION_CLOSED_MESSAGE).to_string();
                self.finish(TerminalOutcome::Success, TerminalReason::TransportClosed, Some(text))
            }
            _ => {
                let text = loss.detail().unwrap_or("could not open progress stream").to_string();
                self.finish(TerminalOutcome::Failure, TerminalReason::ConnectFailed, Some(text))
            }
        }
    }

    pub fn cancel(&mut self) -> Verdict {
        if self.is_terminal() {
            return Verdict::Ignored;
        }
        self.finish(TerminalOutcome::Failure, TerminalReason::Cancelled, Some(CANCELLED_MESSAGE.to_string()))
    }

    fn finish(&mut self, outcome: TerminalOutcome, reason: TerminalReason, message: Option<String>) -> Verdict {
        self.state = LifecycleState::Terminal(outcome);
        Verdict::Terminal(Terminal { outcome, reason, message })
    }
}
