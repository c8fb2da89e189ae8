use crate::core::codec::{decode_frame, Frame};
use crate::core::events::SessionObserver;
use crate::core::model::*;
use crate::core::playlist;
use crate::core::resolver::{CompletionResolver, ReconnectPolicy, TransportLoss, Verdict};
use crate::core::stream::ProgressStreamClient;
use crate::transport::context::{ProgressTransport, TransportContext};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type SubscriptionId = Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    pub reconnect: ReconnectPolicy,
    /// How long a finished session stays queryable before it is released.
    pub grace: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { reconnect: ReconnectPolicy::default(), grace: Duration::from_secs(5) }
    }
}

enum Notice {
    Update(SessionSnapshot),
    Terminal(TerminalOutcome, Option<String>),
}

/// One queued callback. Targets are fixed when the notice is queued, so an
/// observer never hears about changes from before it subscribed.
struct Delivery {
    targets: Vec<Arc<dyn SessionObserver>>,
    notice: Notice,
}

struct SessionCore {
    snapshot: SessionSnapshot,
    resolver: CompletionResolver,
    observers: Vec<(SubscriptionId, Arc<dyn SessionObserver>)>,
    outbox: VecDeque<Delivery>,
    /// Some caller is currently draining `outbox`.
    draining: bool,
}

impl SessionCore {
    fn targets(&self) -> Vec<Arc<dyn SessionObserver>> {
        self.observers.iter().map(|(_, o)| o.clone()).collect()
    }

    fn enqueue(&mut self, targets: Vec<Arc<dyn SessionObserver>>, notice: Notice) {
        if !targets.is_empty() {
            self.outbox.push_back(Delivery { targets, notice });
        }
    }

    /// Applies the resolver's verdict to the snapshot and queues the matching
    /// notices. The terminal transition is recorded before any observer can
    /// hear of it.
    fn settle(&mut self, verdict: &Verdict, before: &SessionSnapshot) {
        match verdict {
            Verdict::Terminal(t) => {
                self.snapshot.lifecycle = LifecycleState::Terminal(t.outcome);
                self.snapshot.terminal = Some(t.clone());
            }
            _ => self.snapshot.lifecycle = self.resolver.state().clone(),
        }

        if self.snapshot != *before {
            let targets = self.targets();
            self.enqueue(targets, Notice::Update(self.snapshot.clone()));
        }
        if let Verdict::Terminal(t) = verdict {
            let targets = self.targets();
            self.enqueue(targets, Notice::Terminal(t.outcome, t.message.clone()));
        }
    }
}

struct SessionShared {
    job_id: JobId,
    core: Mutex<SessionCore>,
    cancel: CancellationToken,
    done: watch::Sender<Option<Terminal>>,
    released: AtomicBool,
}

/// Handle on one observed job. Cheap to clone; all clones see the same state.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn new(job_id: JobId, mode: JobMode, policy: ReconnectPolicy) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            shared: Arc::new(SessionShared {
                job_id: job_id.clone(),
                core: Mutex::new(SessionCore {
                    snapshot: SessionSnapshot::new(job_id, mode),
                    resolver: CompletionResolver::new(policy),
                    observers: vec![],
                    outbox: VecDeque::new(),
                    draining: false,
                }),
                cancel: CancellationToken::new(),
                done,
                released: AtomicBool::new(false),
            }),
        }
    }

    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.shared.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn job_id(&self) -> &str {
        &self.shared.job_id
    }

    pub fn current_state(&self) -> SessionSnapshot {
        self.core().snapshot.clone()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.core().snapshot.lifecycle.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.core().resolver.is_terminal()
    }

    /// True once the grace period after the terminal transition has elapsed.
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Registers `observer`. A late subscriber is first replayed the current
    /// snapshot and, if the session already finished, the terminal call.
    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> SubscriptionId {
        let id = Uuid::new_v4();
        {
            let mut core = self.core();
            if core.snapshot.lifecycle != LifecycleState::Idle {
                let snapshot = core.snapshot.clone();
                core.enqueue(vec![observer.clone()], Notice::Update(snapshot));
            }
            if let Some(t) = core.snapshot.terminal.clone() {
                core.enqueue(vec![observer.clone()], Notice::Terminal(t.outcome, t.message));
            }
            if !self.is_released() {
                core.observers.push((id, observer));
            }
        }
        self.deliver();
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut core = self.core();
        let before = core.observers.len();
        core.observers.retain(|(sid, _)| *sid != id);
        core.observers.len() != before
    }

    /// User abort. Marks the session failed with "cancelled" unless it already
    /// finished, then tears the transport down. Safe to call repeatedly, also
    /// from inside an observer callback.
    pub fn cancel(&self) {
        let verdict = {
            let mut core = self.core();
            let before = core.snapshot.clone();
            let verdict = core.resolver.cancel();
            core.settle(&verdict, &before);
            verdict
        };
        self.deliver();
        if let Verdict::Terminal(t) = verdict {
            tracing::info!(job_id = %self.job_id(), "observation cancelled");
            self.shared.done.send_replace(Some(t));
        }
        self.shared.cancel.cancel();
    }

    /// Resolves with the terminal record once the session has one.
    pub async fn wait(&self) -> Terminal {
        let mut rx = self.shared.done.subscribe();
        loop {
            if let Some(t) = rx.borrow_and_update().clone() {
                return t;
            }
            if rx.changed().await.is_err() {
                // the sender lives in `shared`, which `self` keeps alive
                return self.current_state().terminal.unwrap_or(Terminal {
                    outcome: TerminalOutcome::Failure,
                    reason: TerminalReason::Cancelled,
                    message: None,
                });
            }
        }
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub(crate) fn handle_open(&self) -> Verdict {
        let verdict = {
            let mut core = self.core();
            let before = core.snapshot.clone();
            let verdict = core.resolver.on_open();
            core.settle(&verdict, &before);
            verdict
        };
        self.deliver();
        verdict
    }

    /// Codec, then aggregator, then resolver, for one raw frame.
    pub(crate) fn handle_frame(&self, raw: &str) -> Verdict {
        let rec = match decode_frame(raw) {
            Ok(Frame::Record(rec)) => rec,
            Ok(Frame::Heartbeat) => {
                tracing::trace!(job_id = %self.job_id(), "heartbeat");
                return Verdict::Continue;
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id(), error = %e, "malformed progress frame dropped");
                return Verdict::Continue;
            }
        };

        let verdict = {
            let mut core = self.core();
            if core.resolver.is_terminal() {
                tracing::debug!(job_id = %self.job_id(), "frame after terminal outcome dropped");
                return Verdict::Ignored;
            }
            let before = core.snapshot.clone();
            if !rec.is_end_sentinel() {
                playlist::aggregate(&rec, &mut core.snapshot);
                core.snapshot.merge(&rec);
            }
            // a reconnect replays the server's last record; only news counts as progress
            if core.snapshot != before {
                core.resolver.note_progress();
            }
            let last = core.snapshot.last_message().map(str::to_string);
            let verdict = core.resolver.on_record(&rec, last.as_deref());
            core.settle(&verdict, &before);
            verdict
        };
        self.deliver();
        self.after_verdict(&verdict);
        verdict
    }

    pub(crate) fn handle_transport_lost(&self, loss: TransportLoss) -> Verdict {
        let verdict = {
            let mut core = self.core();
            let before = core.snapshot.clone();
            let last = core.snapshot.last_message().map(str::to_string);
            let verdict = core.resolver.on_transport_lost(loss, last.as_deref());
            core.settle(&verdict, &before);
            verdict
        };
        self.deliver();
        self.after_verdict(&verdict);
        verdict
    }

    /// Runs queued observer callbacks outside the lock, in queue order. A
    /// callback that re-enters the session only queues; the caller already
    /// draining picks those notices up.
    fn deliver(&self) {
        {
            let mut core = self.core();
            if core.draining {
                return;
            }
            core.draining = true;
        }
        let _reset = DrainGuard(self);
        loop {
            let next = {
                let mut core = self.core();
                let next = core.outbox.pop_front();
                if next.is_none() {
                    core.draining = false;
                }
                next
            };
            let Some(delivery) = next else {
                return;
            };
            for o in &delivery.targets {
                match &delivery.notice {
                    Notice::Update(snapshot) => o.on_update(snapshot),
                    Notice::Terminal(outcome, message) => o.on_terminal(*outcome, message.as_deref()),
                }
            }
        }
    }

    fn after_verdict(&self, verdict: &Verdict) {
        if let Verdict::Terminal(t) = verdict {
            tracing::info!(
                job_id = %self.job_id(),
                outcome = ?t.outcome,
                reason = ?t.reason,
                message = t.message.as_deref().unwrap_or(""),
                "job finished"
            );
            self.shared.cancel.cancel();
            self.shared.done.send_replace(Some(t.clone()));
        }
    }

    fn release(&self) {
        self.shared.released.store(true, Ordering::Release);
        self.core().observers.clear();
    }

    fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Clears the draining flag when an observer panics mid-delivery.
struct DrainGuard<'a>(&'a Session);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.core().draining = false;
        }
    }
}

/// Starts sessions and keeps finished ones around for the grace period.
#[derive(Clone)]
pub struct SessionTracker {
    transport: Arc<dyn ProgressTransport>,
    ctx: TransportContext,
    config: WatchConfig,
    sessions: Arc<Mutex<HashMap<JobId, Session>>>,
}

impl SessionTracker {
    pub fn new(transport: Arc<dyn ProgressTransport>, ctx: TransportContext, config: WatchConfig) -> Self {
        Self { transport, ctx, config, sessions: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<JobId, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a session for `job_id` and opens its stream on the current tokio
    /// runtime. A live session for the same id is cancelled first.
    pub fn start(&self, job_id: impl Into<JobId>, mode: JobMode) -> Session {
        let job_id = job_id.into();
        let session = Session::new(job_id.clone(), mode, self.config.reconnect.clone());

        let prior = self.sessions().insert(job_id.clone(), session.clone());
        if let Some(prior) = prior {
            if !prior.is_terminal() {
                tracing::info!(job_id = %job_id, "superseding live session for the same job");
            }
            prior.cancel();
        }

        tracing::info!(job_id = %job_id, ?mode, "watching job");
        let client = ProgressStreamClient::new(self.transport.clone(), self.ctx.clone(), session.cancellation());
        let tracker = self.clone();
        let s2 = session.clone();
        tokio::spawn(async move {
            client.run(&s2).await;
            tokio::time::sleep(tracker.config.grace).await;
            tracker.retire(&s2);
        });

        session
    }

    /// A live or grace-period session for `job_id`.
    pub fn get(&self, job_id: &str) -> Option<Session> {
        self.sessions().get(job_id).cloned()
    }

    fn retire(&self, session: &Session) {
        {
            let mut sessions = self.sessions();
            if sessions.get(session.job_id()).map(|s| s.same_as(session)).unwrap_or(false) {
                sessions.remove(session.job_id());
            }
        }
        session.release();
        tracing::debug!(job_id = %session.job_id(), "session released");
    }
}
