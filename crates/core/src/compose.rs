//! Compose job request and status types.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::AssetRef;

/// Instructions used when the caller gives none.
pub const DEFAULT_COMPOSE_INSTRUCTIONS: &str = "Create a cinematic animation from this image";

/// Body of `POST /api/generateVideo`.
///
/// `sources` must already be ordered by originating index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeRequest {
    pub sources: Vec<AssetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl ComposeRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.sources.is_empty() {
            return Err(CoreError::Validation(
                "At least one source asset is required".to_string(),
            ));
        }
        if let Some(blank) = self.sources.iter().position(|s| s.remote_url.trim().is_empty()) {
            return Err(CoreError::Validation(format!(
                "Source {blank} has an empty remoteUrl"
            )));
        }
        Ok(())
    }

    /// The instructions to submit, falling back to
    /// [`DEFAULT_COMPOSE_INSTRUCTIONS`] when missing or blank.
    pub fn effective_instructions(&self) -> String {
        match self.instructions.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => DEFAULT_COMPOSE_INSTRUCTIONS.to_string(),
        }
    }
}

/// Response of `POST /api/generateVideo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeAccepted {
    pub job_handle: String,
}

/// Pollable status of a compose job.
///
/// Serialized as `{"status": "queued" | "running" | "completed" | "failed",
/// "assetRef"?, "localRef"?, "error"?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ComposeStatus {
    Queued,
    Running,
    Completed {
        #[serde(rename = "assetRef")]
        asset_ref: String,
        #[serde(rename = "localRef", default, skip_serializing_if = "Option::is_none")]
        local_ref: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl ComposeStatus {
    pub fn completed(asset: AssetRef) -> Self {
        ComposeStatus::Completed {
            asset_ref: asset.remote_url,
            local_ref: asset.local_ref,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ComposeStatus::Completed { .. } | ComposeStatus::Failed { .. })
    }

    pub fn asset(&self) -> Option<AssetRef> {
        match self {
            ComposeStatus::Completed {
                asset_ref,
                local_ref,
            } => Some(AssetRef {
                remote_url: asset_ref.clone(),
                local_ref: local_ref.clone(),
            }),
            _ => None,
        }
    }
}
