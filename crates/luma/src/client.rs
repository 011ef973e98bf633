//! The job client contract shared by every generation backend.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use promptreel_core::job::JobKind;

/// What to create on the external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    /// Text prompt to still image.
    Image { prompt: String },
    /// Source asset URLs (ordered by originating index) to a clip.
    Compose {
        prompt: String,
        sources: Vec<String>,
    },
}

impl JobSpec {
    pub fn kind(&self) -> JobKind {
        match self {
            JobSpec::Image { .. } => JobKind::Image,
            JobSpec::Compose { .. } => JobKind::Compose,
        }
    }
}

/// Handle to a job the external service accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: String,
    pub kind: JobKind,
}

/// Remote job state as reported by one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    Running,
    Done { asset_url: String },
    Error { reason: String },
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Done { .. } | RemoteStatus::Error { .. })
    }
}

/// Byte stream of a downloaded asset.
pub type AssetStream = Pin<Box<dyn Stream<Item = Result<Bytes, JobClientError>> + Send>>;

/// Errors talking to the external service.
#[derive(Debug, thiserror::Error)]
pub enum JobClientError {
    /// No credential is configured.
    #[error("External service credential is not configured")]
    NotConfigured,

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// Create/poll/fetch operations against an asynchronous generation service.
///
/// Implementations perform no retries; the poller owns all retry policy.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Whether a credential is available. Checked before any submission.
    fn is_configured(&self) -> bool;

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, JobClientError>;

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, JobClientError>;

    async fn fetch_asset(&self, asset_url: &str) -> Result<AssetStream, JobClientError>;
}
