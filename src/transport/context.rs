use async_trait::async_trait;
use clap::{ArgMatches, Command};
use futures::stream::BoxStream;
use url::Url;

use crate::core::session::WatchConfig;

#[derive(Debug, Clone)]
pub struct TransportContext {
    pub base_url: Url,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:5000/").expect("static url"),
            user_agent: "OrangeWatch/0.1".to_string(),
            timeout_secs: 10,
        }
    }
}

impl TransportContext {
    /// `{base}/api/<path>`; `path` must not start with a slash.
    pub fn api_url(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join("api/")?.join(path)?)
    }

    pub fn progress_url(&self, job_id: &str) -> Result<Url, TransportError> {
        let mut url = self.api_url("progress/")?;
        url.path_segments_mut()
            .map_err(|_| TransportError::Endpoint(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(job_id);
        Ok(url)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("http status error: {0}")]
    Status(u16),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("stream broke: {0}")]
    Stream(String),
}

impl TransportError {
    /// Retrying cannot help: bad endpoint, or the server rejected the job id.
    pub fn is_definitive(&self) -> bool {
        match self {
            Self::Endpoint(_) => true,
            Self::Status(s) => (400..500).contains(s) && *s != 408 && *s != 429,
            Self::Connect(_) | Self::Stream(_) => false,
        }
    }
}

/// Text payloads of one open progress stream, in arrival order. Dropping the
/// stream closes the connection.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

#[async_trait]
pub trait ProgressTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open(&self, job_id: &str, ctx: &TransportContext) -> Result<FrameStream, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub transport: TransportContext,
    pub watch: WatchConfig,
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_command(&self, cmd: Command) -> Command;
    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut ClientConfig) -> anyhow::Result<()>;
}
