//! Batch progress events.
//!
//! [`BatchEvent`] is the closed set of messages the server streams for a
//! batch, serialized as `{"type": "<kind>", ...payload}`. Readers decode
//! by matching on the enum instead of probing for fields.

use serde::{Deserialize, Serialize};

use crate::types::{AssetRef, ItemIndex};

/// One message in a batch's ordered event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatchEvent {
    /// About to process the item at 1-based position `current` of `total`.
    Progress {
        current: usize,
        total: usize,
        status: String,
    },

    /// Terminal outcome of one item.
    Result { result: ItemResult },

    /// Every item has been processed; `results` is in processing order.
    Complete { results: Vec<ItemResult> },

    /// The batch was aborted.
    Error { error: String },
}

impl BatchEvent {
    pub fn progress(current: usize, total: usize, status: impl Into<String>) -> Self {
        BatchEvent::Progress {
            current,
            total,
            status: status.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        BatchEvent::Error {
            error: error.into(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchEvent::Complete { .. } | BatchEvent::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// ItemResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded(AssetRef),
    Failed(String),
}

/// Outcome of one item, reported under the caller's original index.
///
/// On the wire this is the flat record
/// `{prompt, index, success, assetRef?, localRef?, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ItemResultWire", try_from = "ItemResultWire")]
pub struct ItemResult {
    pub prompt: String,
    pub index: ItemIndex,
    pub outcome: ItemOutcome,
}

impl ItemResult {
    pub fn succeeded(index: ItemIndex, prompt: impl Into<String>, asset: AssetRef) -> Self {
        Self {
            prompt: prompt.into(),
            index,
            outcome: ItemOutcome::Succeeded(asset),
        }
    }

    pub fn failed(index: ItemIndex, prompt: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            index,
            outcome: ItemOutcome::Failed(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Succeeded(_))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemResultWire {
    prompt: String,
    index: ItemIndex,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    asset_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<ItemResult> for ItemResultWire {
    fn from(result: ItemResult) -> Self {
        let (success, asset_ref, local_ref, error) = match result.outcome {
            ItemOutcome::Succeeded(asset) => (true, Some(asset.remote_url), asset.local_ref, None),
            ItemOutcome::Failed(error) => (false, None, None, Some(error)),
        };
        Self {
            prompt: result.prompt,
            index: result.index,
            success,
            asset_ref,
            local_ref,
            error,
        }
    }
}

impl TryFrom<ItemResultWire> for ItemResult {
    type Error = String;

    fn try_from(wire: ItemResultWire) -> Result<Self, Self::Error> {
        let outcome = match (wire.success, wire.asset_ref, wire.error) {
            (true, Some(remote_url), _) => ItemOutcome::Succeeded(AssetRef {
                remote_url,
                local_ref: wire.local_ref,
            }),
            (true, None, _) => {
                return Err(format!("successful result {} has no assetRef", wire.index))
            }
            (false, _, Some(error)) => ItemOutcome::Failed(error),
            (false, _, None) => return Err(format!("failed result {} has no error", wire.index)),
        };
        Ok(Self {
            prompt: wire.prompt,
            index: wire.index,
            outcome,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
