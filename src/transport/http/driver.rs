use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::future;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;

use crate::transport::context::{FrameStream, ProgressTransport, TransportContext, TransportError};

/// Progress stream over server-sent events (`GET /api/progress/<job>`).
pub struct HttpSseTransport {
    client: reqwest::Client,
}

impl HttpSseTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("reqwest client");
        Self { client }
    }

    fn build_headers(ctx: &TransportContext) -> Result<HeaderMap, TransportError> {
        let mut h = HeaderMap::new();
        let ua = HeaderValue::from_str(&ctx.user_agent).map_err(|e| TransportError::Connect(e.to_string()))?;
        h.insert(USER_AGENT, ua);
        h.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        h.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(h)
    }

    fn is_event_stream(resp: &reqwest::Response) -> bool {
        resp.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase().starts_with("text/event-stream"))
            .unwrap_or(false)
    }
}

impl Default for HttpSseTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the payloads of plain `message` events; named events are not part of
/// the progress protocol.
fn to_frame(item: Result<Event, EventStreamError<reqwest::Error>>) -> Option<Result<String, TransportError>> {
    match item {
        Ok(ev) if ev.event.is_empty() || ev.event == "message" => Some(Ok(ev.data)),
        Ok(ev) => {
            tracing::debug!(event = %ev.event, "named sse event ignored");
            None
        }
        Err(e) => Some(Err(TransportError::Stream(e.to_string()))),
    }
}

#[async_trait]
impl ProgressTransport for HttpSseTransport {
    fn name(&self) -> &'static str {
        "http-sse"
    }

    async fn open(&self, job_id: &str, ctx: &TransportContext) -> Result<FrameStream, TransportError> {
        let url = ctx.progress_url(job_id)?;
        let headers = Self::build_headers(ctx)?;

        // bounds the wait for response headers only; the body is long-lived
        let resp = tokio::time::timeout(
            Duration::from_secs(ctx.timeout_secs.max(1)),
            self.client.get(url.clone()).headers(headers).send(),
        )
        .await
        .map_err(|_| TransportError::Connect(format!("timed out waiting for {}", url)))?
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        if !Self::is_event_stream(&resp) {
            tracing::warn!(%url, "progress endpoint did not answer with text/event-stream");
        }

        let frames = resp
            .bytes_stream()
            .eventsource()
            .filter_map(|item| future::ready(to_frame(item)))
            .boxed();
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{JobMode, TerminalOutcome, TerminalReason};
    use crate::core::resolver::ReconnectPolicy;
    use crate::core::session::{SessionTracker, WatchConfig};
    use crate::transport::http::mock_server::{json, sse, MockServer, Reply};
    use std::sync::Arc;

    fn ctx(server: &MockServer) -> TransportContext {
        TransportContext { base_url: server.base.clone(), ..Default::default() }
    }

    #[tokio::test]
    async fn yields_data_payloads_in_order() {
        let server = MockServer::start(vec![sse(&[
            r#"{"status":"starting"}"#,
            r#"{"heartbeat": 1717000000.0}"#,
            r#"{"status":"end"}"#,
        ])])
        .await;

        let frames: Vec<_> = HttpSseTransport::new()
            .open("job-7", &ctx(&server))
            .await
            .unwrap()
            .collect()
            .await;
        let frames: Vec<String> = frames.into_iter().map(|f| f.unwrap()).collect();

        assert_eq!(frames, vec![
            r#"{"status":"starting"}"#.to_string(),
            r#"{"heartbeat": 1717000000.0}"#.to_string(),
            r#"{"status":"end"}"#.to_string(),
        ]);
        let req = &server.requests()[0];
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/progress/job-7");
        assert_eq!(req.accept.as_deref(), Some("text/event-stream"));
    }

    #[tokio::test]
    async fn named_events_are_skipped() {
        let server = MockServer::start(vec![Reply::Sse(vec![
            (Some("ping".to_string()), "keepalive".to_string()),
            (None, r#"{"status":"downloading","percent":10}"#.to_string()),
            (Some("message".to_string()), r#"{"status":"end"}"#.to_string()),
        ])])
        .await;

        let frames: Vec<String> = HttpSseTransport::new()
            .open("job-8", &ctx(&server))
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames, vec![
            r#"{"status":"downloading","percent":10}"#.to_string(),
            r#"{"status":"end"}"#.to_string(),
        ]);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start(vec![json(404, r#"{"error":"nope"}"#)]).await;
        let err = match HttpSseTransport::new().open("job", &ctx(&server)).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, TransportError::Status(404)));
        assert!(err.is_definitive());
    }

    #[tokio::test]
    async fn session_over_http_completes() {
        let server = MockServer::start(vec![sse(&[
            r#"{"status":"starting","current_step":"Initializing download..."}"#,
            r#"{"status":"downloading","downloaded_bytes":512,"total_bytes":1024,"percent":50.0,"speed":256.0,"eta":2}"#,
            r#"{"status":"completed","current_step":"Download completed successfully!"}"#,
            r#"{"status":"end","message":"Stream ended"}"#,
        ])])
        .await;
        let tracker = SessionTracker::new(Arc::new(HttpSseTransport::new()), ctx(&server), WatchConfig::default());

        let session = tracker.start("job-1", JobMode::Single);
        let t = session.wait().await;
        assert_eq!(t.outcome, TerminalOutcome::Success);
        assert_eq!(t.message.as_deref(), Some("Download completed successfully!"));
        assert_eq!(session.current_state().total_bytes, Some(1024));
    }

    #[tokio::test]
    async fn dropped_connection_then_forgotten_job_is_optimistic_success() {
        let server = MockServer::start(vec![
            sse(&[r#"{"status":"downloading","percent":80}"#]),
            json(404, r#"{"error":"Download not found"}"#),
        ])
        .await;
        let config = WatchConfig {
            reconnect: ReconnectPolicy { base_delay: Duration::from_millis(20), ..Default::default() },
            ..Default::default()
        };
        let tracker = SessionTracker::new(Arc::new(HttpSseTransport::new()), ctx(&server), config);

        let t = tracker.start("job-2", JobMode::Single).wait().await;
        assert_eq!(t.outcome, TerminalOutcome::Success);
        assert_eq!(t.reason, TerminalReason::TransportClosed);
        assert_eq!(server.requests().len(), 2);
    }
}
