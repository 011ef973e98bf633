use serde::{Deserialize, Serialize};

/// Stable identity of a prompt within a batch, preserved across retries.
pub type ItemIndex = usize;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Reference to a generated artifact.
///
/// `remote_url` is where the external service published the asset;
/// `local_ref` is the URL path of the stored copy, when one was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub remote_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_ref: Option<String>,
}

impl AssetRef {
    pub fn remote(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            local_ref: None,
        }
    }

    pub fn with_local_ref(mut self, local_ref: impl Into<String>) -> Self {
        self.local_ref = Some(local_ref.into());
        self
    }
}
