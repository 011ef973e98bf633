//! REST client for the Luma Dream Machine API.
//!
//! Wraps generation creation, status retrieval and asset download using
//! [`reqwest`], and implements [`JobClient`] on top of them.

use async_trait::async_trait;
use futures::TryStreamExt;

use crate::client::{AssetStream, JobClient, JobClientError, JobHandle, JobSpec, RemoteStatus};
use crate::messages::{
    parse_generation, Generation, ImageGenerationRequest, Keyframes, VideoGenerationRequest,
};

/// Default base URL of the Dream Machine API.
pub const DEFAULT_API_URL: &str = "https://api.lumalabs.ai/dream-machine/v1";

/// HTTP client for the Luma generation API.
pub struct LumaApi {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl LumaApi {
    /// Create a client against `api_url`.
    ///
    /// * `api_key` - bearer credential; `None` leaves the client
    ///   unconfigured and every call fails with
    ///   [`JobClientError::NotConfigured`].
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Create an image generation from a text prompt.
    pub async fn create_image(&self, prompt: &str) -> Result<Generation, JobClientError> {
        let key = self.api_key()?;
        let response = self
            .client
            .post(format!("{}/generations/image", self.api_url))
            .bearer_auth(key)
            .json(&ImageGenerationRequest { prompt })
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Create a video generation keyed on one or two source images.
    pub async fn create_video(
        &self,
        prompt: &str,
        sources: &[String],
    ) -> Result<Generation, JobClientError> {
        let key = self.api_key()?;
        let keyframes = Keyframes::from_sources(sources)
            .ok_or_else(|| JobClientError::Decode("video generation needs a source".into()))?;
        if sources.len() > 2 {
            tracing::warn!(
                sources = sources.len(),
                "Only the first and last source are used as keyframes",
            );
        }

        let response = self
            .client
            .post(format!("{}/generations", self.api_url))
            .bearer_auth(key)
            .json(&VideoGenerationRequest { prompt, keyframes })
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve the current state of a generation.
    pub async fn get_generation(&self, id: &str) -> Result<Generation, JobClientError> {
        let key = self.api_key()?;
        let response = self
            .client
            .get(format!("{}/generations/{}", self.api_url, id))
            .bearer_auth(key)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn api_key(&self) -> Result<&str, JobClientError> {
        self.api_key.as_deref().ok_or(JobClientError::NotConfigured)
    }

    /// Ensure the response has a success status code, otherwise return a
    /// [`JobClientError::Api`] with the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, JobClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(JobClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful response body as a [`Generation`].
    async fn parse_response(response: reqwest::Response) -> Result<Generation, JobClientError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        parse_generation(&text).map_err(|e| JobClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl JobClient for LumaApi {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, JobClientError> {
        let generation = match spec {
            JobSpec::Image { prompt } => self.create_image(prompt).await?,
            JobSpec::Compose { prompt, sources } => self.create_video(prompt, sources).await?,
        };
        tracing::debug!(job_id = %generation.id, kind = %spec.kind(), "Generation created");

        Ok(JobHandle {
            id: generation.id,
            kind: spec.kind(),
        })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, JobClientError> {
        let generation = self.get_generation(&handle.id).await?;
        Ok(generation.to_status(handle.kind))
    }

    async fn fetch_asset(&self, asset_url: &str) -> Result<AssetStream, JobClientError> {
        // Assets are served from a public CDN; no credential is sent.
        let response = self.client.get(asset_url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(Box::pin(response.bytes_stream().map_err(JobClientError::from)))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use promptreel_core::job::JobKind;

    use super::*;

    #[test]
    fn blank_key_leaves_client_unconfigured() {
        let api = LumaApi::new(DEFAULT_API_URL.into(), Some("  ".into()));
        assert!(!api.is_configured());

        let api = LumaApi::new(DEFAULT_API_URL.into(), Some("luma-key".into()));
        assert!(api.is_configured());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = LumaApi::new("http://localhost:9999/v1/".into(), None);
        assert_eq!(api.api_url, "http://localhost:9999/v1");
    }

    #[tokio::test]
    async fn unconfigured_client_fails_before_any_request() {
        // Port 9 (discard) would fail with a transport error if a request
        // were attempted.
        let api = LumaApi::new("http://127.0.0.1:9".into(), None);

        let spec = JobSpec::Image {
            prompt: "a fox".into(),
        };
        assert_matches!(api.submit(&spec).await, Err(JobClientError::NotConfigured));

        let handle = JobHandle {
            id: "g1".into(),
            kind: JobKind::Image,
        };
        assert_matches!(api.poll(&handle).await, Err(JobClientError::NotConfigured));
    }

    #[tokio::test]
    async fn compose_without_sources_is_rejected_locally() {
        let api = LumaApi::new("http://127.0.0.1:9".into(), Some("key".into()));
        let spec = JobSpec::Compose {
            prompt: "pan".into(),
            sources: vec![],
        };
        assert_matches!(api.submit(&spec).await, Err(JobClientError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let api = LumaApi::new("http://127.0.0.1:9".into(), Some("key".into()));
        let spec = JobSpec::Image {
            prompt: "a fox".into(),
        };
        assert_matches!(api.submit(&spec).await, Err(JobClientError::Request(_)));
    }
}
