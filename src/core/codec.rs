use crate::core::model::{JobStatus, ProgressRecord};
use serde::Deserialize;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a json object")]
    NotAnObject,
}

/// Result of decoding one stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keep-alive. Carries nothing and must not touch session state.
    Heartbeat,
    Record(ProgressRecord),
}

/// Wire shape of a progress frame. Numbers come from python and may be floats,
/// so everything numeric is read as `f64` and narrowed afterwards.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireFrame {
    status: Option<String>,
    message: Option<String>,
    current_step: Option<String>,
    percent: Option<f64>,
    downloaded_bytes: Option<f64>,
    total_bytes: Option<f64>,
    speed: Option<f64>,
    eta: Option<f64>,
    #[serde(alias = "current_item")]
    current_video: Option<f64>,
    #[serde(alias = "total_items")]
    total_videos: Option<f64>,
    error: Option<String>,
    heartbeat: Option<Value>,
}

pub fn decode_frame(raw: &str) -> Result<Frame, CodecError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CodecError::Empty);
    }

    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }

    let wire: WireFrame = serde_json::from_value(value)?;
    if wire.heartbeat.as_ref().map(is_truthy).unwrap_or(false) {
        return Ok(Frame::Heartbeat);
    }

    Ok(Frame::Record(ProgressRecord {
        status: wire.status.as_deref().map(JobStatus::from_wire),
        message: wire.message,
        step: wire.current_step,
        percent: finite(wire.percent),
        downloaded_bytes: count(wire.downloaded_bytes),
        total_bytes: count(wire.total_bytes),
        speed_bytes_per_sec: finite(wire.speed).filter(|v| *v >= 0.0),
        eta_seconds: finite(wire.eta),
        current_item: count(wire.current_video),
        total_items: count(wire.total_videos),
        error: wire.error.filter(|e| !e.trim().is_empty()),
        is_heartbeat: false,
    }))
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|f| f.is_finite())
}

fn count(v: Option<f64>) -> Option<u64> {
    finite(v).filter(|f| *f >= 0.0).map(|f| f as u64)
}
