use crate::core::model::{JobId, SessionSnapshot, TerminalOutcome};
use tokio::sync::mpsc;

/// Callbacks for one session, delivered in order after the session lock is
/// released. A callback may read, subscribe to, or cancel the session.
pub trait SessionObserver: Send + Sync {
    /// Some field of the snapshot changed.
    fn on_update(&self, snapshot: &SessionSnapshot);

    /// Called exactly once, after the terminal outcome is fixed.
    fn on_terminal(&self, outcome: TerminalOutcome, message: Option<&str>);
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Updated(SessionSnapshot),
    Finished { job_id: JobId, outcome: TerminalOutcome, message: Option<String> },
}

/// Forwards callbacks into a channel so a UI task can consume them in order.
pub struct ChannelObserver {
    job_id: JobId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new(job_id: JobId) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { job_id, tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_update(&self, snapshot: &SessionSnapshot) {
        let _ = self.tx.send(SessionEvent::Updated(snapshot.clone()));
    }

    fn on_terminal(&self, outcome: TerminalOutcome, message: Option<&str>) {
        let _ = self.tx.send(SessionEvent::Finished {
            job_id: self.job_id.clone(),
            outcome,
            message: message.map(str::to_string),
        });
    }
}
