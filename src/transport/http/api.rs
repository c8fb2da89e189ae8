use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::model::{JobId, JobMode};
use crate::transport::context::{TransportContext, TransportError};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] TransportError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Body of `POST /api/download` and `POST /api/playlist`.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadRequest {
    pub url: String,
    pub output_dir: String,
    pub bitrate: String,
    pub split_large_files: bool,
    pub split_by_chapters: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u32>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            output_dir: "downloads".to_string(),
            bitrate: "192".to_string(),
            split_large_files: false,
            split_by_chapters: false,
            start_index: None,
            end_index: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobCreated {
    pub download_id: JobId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobLocation {
    pub downloads_dir: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_size_mb: f64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Thin client for the job-control endpoints that sit beside the progress
/// stream.
pub struct JobsApi {
    client: reqwest::Client,
    ctx: TransportContext,
}

impl JobsApi {
    pub fn new(ctx: TransportContext) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(ctx.timeout_secs.max(1)))
            .default_headers(Self::build_headers(&ctx))
            .build()
            .expect("reqwest client");
        Self { client, ctx }
    }

    fn build_headers(ctx: &TransportContext) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(&ctx.user_agent) {
            h.insert(USER_AGENT, ua);
        }
        h
    }

    /// Playlist requests go to `/api/playlist` and carry the index range;
    /// single requests drop it.
    async fn create(&self, mode: JobMode, req: &DownloadRequest) -> Result<JobCreated, ApiError> {
        let (path, body) = match mode {
            JobMode::Single => {
                let body = DownloadRequest { start_index: None, end_index: None, ..req.clone() };
                ("download", body)
            }
            JobMode::Playlist => {
                let body = DownloadRequest { start_index: Some(req.start_index.unwrap_or(1)), ..req.clone() };
                ("playlist", body)
            }
        };
        let url = self.ctx.api_url(path)?;
        tracing::info!(%url, target_url = %body.url, "creating job");
        let resp = self.client.post(url).json(&body).send().await?;
        let created: JobCreated = Self::read(resp).await?;
        tracing::info!(job_id = %created.download_id, "job created");
        Ok(created)
    }

    /// Starts a single-video job.
    pub async fn create_download(&self, req: &DownloadRequest) -> Result<JobCreated, ApiError> {
        self.create(JobMode::Single, req).await
    }

    /// Starts a playlist job, from entry 1 unless a start index is given.
    pub async fn create_playlist(&self, req: &DownloadRequest) -> Result<JobCreated, ApiError> {
        self.create(JobMode::Playlist, req).await
    }

    /// Where a completed job's file landed. The server answers 400 while the
    /// job is still running.
    pub async fn location(&self, job_id: &str) -> Result<JobLocation, ApiError> {
        let mut url = self.ctx.api_url("downloads/")?;
        url.path_segments_mut()
            .map_err(|_| TransportError::Endpoint(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(job_id)
            .push("location");
        let resp = self.client.get(url).send().await?;
        Self::read(resp).await
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").to_string());
        Err(ApiError::Rejected { status: status.as_u16(), message })
    }
}
