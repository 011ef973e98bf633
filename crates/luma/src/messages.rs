//! Luma generation API request and response bodies.
//!
//! The status endpoint returns a generation object shaped like
//! `{"id": "...", "state": "queued", "failure_reason": null,
//! "assets": {"image": "...", "video": "..."}}`. This module deserializes
//! it and maps it onto the backend-neutral [`RemoteStatus`].

use promptreel_core::job::JobKind;
use serde::{Deserialize, Serialize};

use crate::client::RemoteStatus;

/// Failure reason reported when the service gives none.
pub const UNKNOWN_FAILURE_REASON: &str = "Unknown error";

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /generations/image`.
#[derive(Debug, Serialize)]
pub struct ImageGenerationRequest<'a> {
    pub prompt: &'a str,
}

/// Body of `POST /generations` (image-to-video).
#[derive(Debug, Serialize)]
pub struct VideoGenerationRequest<'a> {
    pub prompt: &'a str,
    pub keyframes: Keyframes<'a>,
}

/// Start and optional end keyframe of a video generation.
#[derive(Debug, Serialize)]
pub struct Keyframes<'a> {
    pub frame0: Keyframe<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame1: Option<Keyframe<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Keyframe<'a> {
    Image { url: &'a str },
}

impl<'a> Keyframes<'a> {
    /// First source becomes `frame0`; with more than one source, the last
    /// becomes `frame1`. Returns `None` for an empty source list.
    pub fn from_sources(sources: &'a [String]) -> Option<Self> {
        let first = sources.first()?;
        let frame1 = match sources {
            [_, .., last] => Some(Keyframe::Image { url: last }),
            _ => None,
        };
        Some(Self {
            frame0: Keyframe::Image { url: first },
            frame1,
        })
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A generation as returned by create and status calls.
#[derive(Debug, Clone, Deserialize)]
pub struct Generation {
    pub id: String,
    pub state: GenerationState,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub assets: Option<GenerationAssets>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    Queued,
    Dreaming,
    Completed,
    Failed,
    /// Any state this client does not know about yet; treated as running.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationAssets {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
}

impl Generation {
    /// Map onto [`RemoteStatus`] for a job of `kind`.
    ///
    /// A `completed` generation that does not carry the asset for its kind
    /// yet is reported as `Running`, so polling continues.
    pub fn to_status(&self, kind: JobKind) -> RemoteStatus {
        match self.state {
            GenerationState::Queued => RemoteStatus::Queued,
            GenerationState::Dreaming | GenerationState::Unknown => RemoteStatus::Running,
            GenerationState::Completed => match self.asset_url(kind) {
                Some(url) => RemoteStatus::Done {
                    asset_url: url.to_string(),
                },
                None => RemoteStatus::Running,
            },
            GenerationState::Failed => RemoteStatus::Error {
                reason: self
                    .failure_reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_FAILURE_REASON.to_string()),
            },
        }
    }

    fn asset_url(&self, kind: JobKind) -> Option<&str> {
        let assets = self.assets.as_ref()?;
        match kind {
            JobKind::Image => assets.image.as_deref(),
            JobKind::Compose => assets.video.as_deref(),
        }
    }
}

/// Parse a generation object from a response body.
pub fn parse_generation(text: &str) -> Result<Generation, serde_json::Error> {
    serde_json::from_str(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
