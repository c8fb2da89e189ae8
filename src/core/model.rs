use serde::{Serialize, Serializer};
use std::fmt;

/// Opaque job id handed out by the server when a download is created.
pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Single,
    Playlist,
}

/// Status values the worker puts on the progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Starting,
    Downloading,
    Processing,
    DownloadingVideo,
    VideoCompleted,
    VideoFailed,
    Completed,
    PlaylistCompleted,
    Failed,
    Error,
    /// Stream-end sentinel, sent right before the server closes the channel.
    End,
    Other(String),
}

impl JobStatus {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "starting" => Self::Starting,
            "downloading" => Self::Downloading,
            "processing" => Self::Processing,
            "downloading_video" => Self::DownloadingVideo,
            "video_completed" => Self::VideoCompleted,
            "video_failed" => Self::VideoFailed,
            "completed" => Self::Completed,
            "playlist_completed" => Self::PlaylistCompleted,
            "failed" => Self::Failed,
            "error" => Self::Error,
            "end" => Self::End,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::DownloadingVideo => "downloading_video",
            Self::VideoCompleted => "video_completed",
            Self::VideoFailed => "video_failed",
            Self::Completed => "completed",
            Self::PlaylistCompleted => "playlist_completed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::End => "end",
            Self::Other(s) => s,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::PlaylistCompleted)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error | Self::VideoFailed)
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One decoded stream frame. Every field is optional: a frame only says what changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressRecord {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    /// `current_step` on the wire; the server's own description of the phase.
    pub step: Option<String>,
    pub percent: Option<f64>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<f64>,
    pub current_item: Option<u64>,
    pub total_items: Option<u64>,
    pub error: Option<String>,
    pub is_heartbeat: bool,
}

impl ProgressRecord {
    pub fn heartbeat() -> Self {
        Self { is_heartbeat: true, ..Self::default() }
    }

    pub fn with_status(status: JobStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn is_end_sentinel(&self) -> bool {
        matches!(self.status, Some(JobStatus::End))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Success,
    Failure,
}

impl TerminalOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Which signal decided the terminal outcome.
///
/// `EndSentinel` and `TransportClosed` are heuristics: the server ended the
/// channel without saying how the job went, and the session assumes success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    ServerError,
    JobStatus,
    EndSentinel,
    TransportClosed,
    ConnectFailed,
    Cancelled,
}

impl TerminalReason {
    pub fn is_heuristic(self) -> bool {
        matches!(self, Self::EndSentinel | Self::TransportClosed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Terminal {
    pub outcome: TerminalOutcome,
    pub reason: TerminalReason,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Streaming,
    Terminal(TerminalOutcome),
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Everything currently known about one observed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub job_id: JobId,
    pub mode: JobMode,
    pub lifecycle: LifecycleState,
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub step: Option<String>,
    pub percent: Option<f64>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<f64>,
    pub current_item: Option<u64>,
    pub total_items: Option<u64>,
    /// Playlist sub-progress in percent, derived from `current_item / total_items`.
    pub playlist_percent: Option<f64>,
    pub error: Option<String>,
    pub terminal: Option<Terminal>,
}

impl SessionSnapshot {
    pub fn new(job_id: JobId, mode: JobMode) -> Self {
        Self {
            job_id,
            mode,
            lifecycle: LifecycleState::Idle,
            status: None,
            message: None,
            step: None,
            percent: None,
            downloaded_bytes: None,
            total_bytes: None,
            speed_bytes_per_sec: None,
            eta_seconds: None,
            current_item: None,
            total_items: None,
            playlist_percent: None,
            error: None,
            terminal: None,
        }
    }

    /// Last-write-wins merge of the scalar fields. Absent fields keep what we knew.
    /// Playlist counters are left to the aggregator.
    pub fn merge(&mut self, rec: &ProgressRecord) {
        fn put<T: Clone>(slot: &mut Option<T>, v: &Option<T>) {
            if let Some(v) = v {
                *slot = Some(v.clone());
            }
        }
        put(&mut self.status, &rec.status);
        put(&mut self.message, &rec.message);
        put(&mut self.step, &rec.step);
        put(&mut self.percent, &rec.percent);
        put(&mut self.downloaded_bytes, &rec.downloaded_bytes);
        put(&mut self.total_bytes, &rec.total_bytes);
        put(&mut self.speed_bytes_per_sec, &rec.speed_bytes_per_sec);
        put(&mut self.eta_seconds, &rec.eta_seconds);
        put(&mut self.error, &rec.error);
    }

    /// Most specific human text we have: `message` first, then `current_step`.
    pub fn last_message(&self) -> Option<&str> {
        self.message.as_deref().or(self.step.as_deref())
    }

    /// ETA only when the server reported a positive value.
    pub fn eta(&self) -> Option<f64> {
        self.eta_seconds.filter(|s| *s > 0.0)
    }

    pub fn is_terminal(&self) -> bool {
        self.lifecycle.is_terminal()
    }
}
