//! Test doubles shared by the engine tests.

use crate::core::events::SessionObserver;
use crate::core::model::{SessionSnapshot, TerminalOutcome};
use crate::transport::context::{FrameStream, ProgressTransport, TransportContext, TransportError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// What the next `open` call does.
pub enum Script {
    /// Yields the frames, then ends the stream normally.
    Frames(Vec<Result<String, TransportError>>),
    /// Yields the frames, then stays open forever.
    Hang(Vec<String>),
    Fail(TransportError),
}

impl Script {
    pub fn frames(frames: &[&str]) -> Self {
        Self::Frames(frames.iter().map(|f| Ok(f.to_string())).collect())
    }

    pub fn broken(frames: &[&str], error: &str) -> Self {
        let mut v: Vec<_> = frames.iter().map(|f| Ok(f.to_string())).collect();
        v.push(Err(TransportError::Stream(error.to_string())));
        Self::Frames(v)
    }

    pub fn hang(frames: &[&str]) -> Self {
        Self::Hang(frames.iter().map(|f| f.to_string()).collect())
    }
}

struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory transport that plays one script per `open`. Once the scripts run
/// out every open is rejected with 404, like a server that forgot the job.
#[derive(Clone)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    opens: Arc<Mutex<Vec<Instant>>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            opens: Arc::new(Mutex::new(vec![])),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }

    pub fn all_closed(&self) -> bool {
        self.live.load(Ordering::SeqCst) == 0
    }
}

#[async_trait]
impl ProgressTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open(&self, _job_id: &str, _ctx: &TransportContext) -> Result<FrameStream, TransportError> {
        self.opens.lock().unwrap().push(Instant::now());
        let script = self.scripts.lock().unwrap().pop_front();

        let frames: FrameStream = match script {
            None => return Err(TransportError::Status(404)),
            Some(Script::Fail(e)) => return Err(e),
            Some(Script::Frames(frames)) => stream::iter(frames).boxed(),
            Some(Script::Hang(frames)) => stream::iter(frames.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = OpenGuard(self.live.clone());
        Ok(frames
            .map(move |f| {
                let _ = &guard;
                f
            })
            .boxed())
    }
}

#[derive(Debug, Clone)]
pub enum Call {
    Update(SessionSnapshot),
    Terminal(TerminalOutcome, Option<String>),
}

#[derive(Default)]
pub struct RecordingObserver {
    calls: Mutex<Vec<Call>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn terminals(&self) -> Vec<(TerminalOutcome, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Terminal(o, m) => Some((o, m)),
                Call::Update(_) => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_update(&self, snapshot: &SessionSnapshot) {
        self.calls.lock().unwrap().push(Call::Update(snapshot.clone()));
    }

    fn on_terminal(&self, outcome: TerminalOutcome, message: Option<&str>) {
        self.calls.lock().unwrap().push(Call::Terminal(outcome, message.map(str::to_string)));
    }
}
