//! Stand-in for the download server in transport tests. Routes mirror the
//! real API; each request takes the next queued reply, whatever its route.

use axum::extract::{Path, State};
use axum::http::{header::ACCEPT, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use url::Url;

pub enum Reply {
    /// `(event name, data)` pairs sent as one event stream, then closed.
    Sse(Vec<(Option<String>, String)>),
    Json(StatusCode, Value),
}

pub fn sse(frames: &[&str]) -> Reply {
    Reply::Sse(frames.iter().map(|d| (None, d.to_string())).collect())
}

pub fn json(status: u16, body: &str) -> Reply {
    let status = StatusCode::from_u16(status).unwrap();
    Reply::Json(status, serde_json::from_str(body).unwrap())
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: &'static str,
    pub path: String,
    pub accept: Option<String>,
    pub body: Option<Value>,
}

#[derive(Clone, Default)]
struct Shared {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    seen: Arc<Mutex<Vec<Recorded>>>,
}

impl Shared {
    fn answer(&self, req: Recorded) -> Response {
        self.seen.lock().unwrap().push(req);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Sse(frames)) => {
                let events = frames.into_iter().map(|(name, data)| {
                    let ev = Event::default().data(data);
                    Ok::<_, Infallible>(match name {
                        Some(n) => ev.event(n),
                        None => ev,
                    })
                });
                Sse::new(futures::stream::iter(events)).into_response()
            }
            Some(Reply::Json(status, body)) => (status, Json(body)).into_response(),
            None => (StatusCode::NOT_FOUND, Json(json!({ "error": "Download not found" }))).into_response(),
        }
    }
}

fn accept_of(headers: &HeaderMap) -> Option<String> {
    headers.get(ACCEPT).and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn progress(State(s): State<Shared>, Path(job): Path<String>, headers: HeaderMap) -> Response {
    s.answer(Recorded { method: "GET", path: format!("/api/progress/{job}"), accept: accept_of(&headers), body: None })
}

async fn download(State(s): State<Shared>, Json(body): Json<Value>) -> Response {
    s.answer(Recorded { method: "POST", path: "/api/download".into(), accept: None, body: Some(body) })
}

async fn playlist(State(s): State<Shared>, Json(body): Json<Value>) -> Response {
    s.answer(Recorded { method: "POST", path: "/api/playlist".into(), accept: None, body: Some(body) })
}

async fn location(State(s): State<Shared>, Path(job): Path<String>) -> Response {
    s.answer(Recorded { method: "GET", path: format!("/api/downloads/{job}/location"), accept: None, body: None })
}

pub struct MockServer {
    pub base: Url,
    shared: Shared,
}

impl MockServer {
    pub async fn start(replies: Vec<Reply>) -> Self {
        let shared = Shared { replies: Arc::new(Mutex::new(replies.into())), ..Default::default() };
        let app = Router::new()
            .route("/api/progress/:id", get(progress))
            .route("/api/download", post(download))
            .route("/api/playlist", post(playlist))
            .route("/api/downloads/:id/location", get(location))
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base, shared }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.shared.seen.lock().unwrap().clone()
    }
}
