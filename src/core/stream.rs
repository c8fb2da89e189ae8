use crate::core::resolver::{TransportLoss, Verdict};
use crate::core::session::Session;
use crate::transport::context::{FrameStream, ProgressTransport, TransportContext};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

enum Pump {
    /// Session reached a terminal state or the client was closed.
    Finished,
    Lost(TransportLoss),
}

/// Owns the progress connection of one session. At most one stream is open at
/// a time: the previous stream is dropped before a reconnect opens a new one.
pub struct ProgressStreamClient {
    transport: Arc<dyn ProgressTransport>,
    ctx: TransportContext,
    cancel: CancellationToken,
}

impl ProgressStreamClient {
    pub fn new(transport: Arc<dyn ProgressTransport>, ctx: TransportContext, cancel: CancellationToken) -> Self {
        Self { transport, ctx, cancel }
    }

    /// Tears the connection down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Opens the stream for the session's job and drives it until the session
    /// is terminal or the client is closed.
    pub async fn run(&self, session: &Session) {
        let job_id = session.job_id().to_string();

        while !session.is_terminal() {
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = self.transport.open(&job_id, &self.ctx) => r,
            };

            let verdict = match opened {
                Ok(frames) => {
                    tracing::info!(job_id = %job_id, transport = self.transport.name(), "progress stream opened");
                    if session.handle_open() == Verdict::Ignored {
                        break;
                    }
                    match self.pump(session, frames).await {
                        Pump::Finished => break,
                        Pump::Lost(loss) => {
                            tracing::warn!(job_id = %job_id, ?loss, "progress stream lost");
                            session.handle_transport_lost(loss)
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "opening progress stream failed");
                    session.handle_transport_lost(TransportLoss::OpenFailed {
                        detail: e.to_string(),
                        definitive: e.is_definitive(),
                    })
                }
            };

            match verdict {
                Verdict::Reconnect { attempt, delay } => {
                    tracing::info!(job_id = %job_id, attempt, delay_ms = delay.as_millis() as u64, "reconnecting progress stream");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
                Verdict::Continue => {}
                Verdict::Ignored | Verdict::Terminal(_) => break,
            }
        }

        self.close();
        tracing::debug!(job_id = %job_id, "progress stream closed");
    }

    async fn pump(&self, session: &Session, mut frames: FrameStream) -> Pump {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Pump::Finished,
                n = frames.next() => n,
            };

            match next {
                Some(Ok(raw)) => {
                    tracing::debug!(job_id = %session.job_id(), frame = %raw, "progress frame");
                    if matches!(session.handle_frame(&raw), Verdict::Terminal(_) | Verdict::Ignored) {
                        return Pump::Finished;
                    }
                }
                Some(Err(e)) => return Pump::Lost(TransportLoss::Errored { detail: e.to_string() }),
                None => return Pump::Lost(TransportLoss::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{JobMode, LifecycleState, TerminalOutcome, TerminalReason};
    use crate::core::resolver::ReconnectPolicy;
    use crate::core::session::{SessionTracker, WatchConfig};
    use crate::core::testing::{RecordingObserver, Script, ScriptedTransport};
    use crate::transport::context::TransportError;
    use std::time::Duration;

    fn tracker(transport: ScriptedTransport, policy: ReconnectPolicy) -> SessionTracker {
        let config = WatchConfig { reconnect: policy, ..Default::default() };
        SessionTracker::new(Arc::new(transport), TransportContext::default(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_reconnects_once_after_delay_then_assumes_success() {
        let transport = ScriptedTransport::new(vec![
            Script::frames(&[r#"{"status":"downloading","percent":40}"#]),
            Script::Fail(TransportError::Connect("connection refused".into())),
        ]);
        let scripted = transport.clone();
        let session = tracker(transport, ReconnectPolicy::default()).start("job", JobMode::Single);
        let obs = RecordingObserver::new();
        session.subscribe(obs.clone());

        let t = session.wait().await;
        assert_eq!(t.outcome, TerminalOutcome::Success);
        assert_eq!(t.reason, TerminalReason::TransportClosed);

        let opens = scripted.open_times();
        assert_eq!(opens.len(), 2);
        assert!(opens[1] - opens[0] >= Duration::from_secs(1));
        assert_eq!(obs.terminals().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnected_stream_can_still_deliver_the_verdict() {
        let transport = ScriptedTransport::new(vec![
            Script::broken(&[r#"{"status":"downloading","percent":40}"#], "connection reset"),
            Script::frames(&[r#"{"status":"failed","current_step":"Download failed"}"#]),
        ]);
        let session = tracker(transport, ReconnectPolicy::default()).start("job", JobMode::Single);

        let t = session.wait().await;
        assert_eq!(t.outcome, TerminalOutcome::Failure);
        assert_eq!(t.message.as_deref(), Some("Download failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_backoff_gives_up_after_policy_is_spent() {
        let transport = ScriptedTransport::new(vec![
            Script::frames(&[r#"{"status":"downloading"}"#]),
            Script::Fail(TransportError::Status(503)),
            Script::Fail(TransportError::Status(503)),
            Script::Fail(TransportError::Status(503)),
        ]);
        let scripted = transport.clone();
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        };
        let session = tracker(transport, policy).start("job", JobMode::Single);

        assert_eq!(session.wait().await.reason, TerminalReason::TransportClosed);
        let opens = scripted.open_times();
        assert_eq!(opens.len(), 4);
        assert!(opens[2] - opens[1] >= Duration::from_millis(200));
        assert!(opens[3] - opens[2] >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_state_on_reconnect_does_not_refill_the_budget() {
        let replay = r#"{"status":"downloading","percent":40}"#;
        let transport = ScriptedTransport::new((0..20).map(|_| Script::frames(&[replay])).collect());
        let scripted = transport.clone();
        let session = tracker(transport, ReconnectPolicy::default()).start("job", JobMode::Single);

        let t = session.wait().await;
        assert_eq!(t.reason, TerminalReason::TransportClosed);
        assert_eq!(scripted.open_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_progress_between_reconnects_refills_the_budget() {
        let transport = ScriptedTransport::new(vec![
            Script::frames(&[r#"{"status":"downloading","percent":40}"#]),
            Script::frames(&[r#"{"status":"downloading","percent":55}"#]),
            Script::frames(&[r#"{"status":"downloading","percent":55}"#]),
            Script::frames(&[r#"{"status":"downloading","percent":70}"#]),
        ]);
        let scripted = transport.clone();
        let session = tracker(transport, ReconnectPolicy::default()).start("job", JobMode::Single);

        assert_eq!(session.wait().await.outcome, TerminalOutcome::Success);
        assert_eq!(scripted.open_times().len(), 3);
        assert_eq!(session.current_state().percent, Some(55.0));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reopen_is_definitive() {
        let transport = ScriptedTransport::new(vec![
            Script::frames(&[r#"{"status":"processing"}"#]),
            Script::Fail(TransportError::Status(404)),
        ]);
        let scripted = transport.clone();
        let policy = ReconnectPolicy { max_attempts: 5, ..Default::default() };
        let session = tracker(transport, policy).start("job", JobMode::Single);

        assert_eq!(session.wait().await.outcome, TerminalOutcome::Success);
        assert_eq!(scripted.open_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_the_client_without_a_verdict() {
        let transport = ScriptedTransport::new(vec![Script::hang(&[r#"{"status":"starting"}"#])]);
        let scripted = transport.clone();
        let session = crate::core::session::Session::new("job".into(), JobMode::Single, ReconnectPolicy::default());
        let client = ProgressStreamClient::new(Arc::new(transport), TransportContext::default(), CancellationToken::new());

        let run = async {
            client.run(&session).await;
        };
        let stop = async {
            while session.current_state().status.is_none() {
                sleep(Duration::from_millis(5)).await;
            }
            client.close();
            client.close();
        };
        tokio::join!(run, stop);

        assert_eq!(session.lifecycle(), LifecycleState::Streaming);
        assert!(scripted.all_closed());
    }
}
