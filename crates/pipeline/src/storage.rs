//! Local storage of downloaded assets.
//!
//! Files live under the configured output directory and are exposed to
//! HTTP clients under [`GENERATED_URL_PREFIX`]. A batch writes into its
//! own timestamped folder; compose videos are written at the root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use promptreel_core::types::{ItemIndex, Timestamp};
use promptreel_luma::client::{AssetStream, JobClientError};
use tokio::io::AsyncWriteExt;

/// URL path under which the output directory is served.
pub const GENERATED_URL_PREFIX: &str = "/generated";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to download asset: {0}")]
    Download(#[from] JobClientError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
}

/// Writes downloaded assets and reports where they can be fetched.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create a folder (relative to the store root) for a batch's files.
    async fn create_folder(&self, folder: &str) -> Result<(), StorageError>;

    /// Drain `stream` into `relative_path` and return the local reference
    /// (a URL path) of the stored file.
    async fn store(&self, relative_path: &str, stream: AssetStream)
        -> Result<String, StorageError>;
}

/// Folder name for a batch started at `now`: `images_{YYYYMMDDTHHMMSS}`.
pub fn batch_folder_name(now: Timestamp) -> String {
    format!("images_{}", now.format(TIMESTAMP_FORMAT))
}

/// File name of the image for `index`: `image_{index+1:02}.png`.
pub fn image_file_name(index: ItemIndex) -> String {
    format!("image_{:02}.png", index + 1)
}

/// File name for the compose video of `job_handle`, started at `now`:
/// `video_{YYYYMMDDTHHMMSS}_{job_handle}.mp4`.
pub fn video_file_name(now: Timestamp, job_handle: &str) -> String {
    format!("video_{}_{job_handle}.mp4", now.format(TIMESTAMP_FORMAT))
}

/// [`ArtifactStore`] on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path under the root, refusing anything that
    /// could escape it.
    fn resolve(&self, relative_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(relative_path);
        let safe = !relative_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, std::path::Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidPath(relative_path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn create_folder(&self, folder: &str) -> Result<(), StorageError> {
        let path = self.resolve(folder)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }

    async fn store(
        &self,
        relative_path: &str,
        mut stream: AssetStream,
    ) -> Result<String, StorageError> {
        let path = self.resolve(relative_path)?;
        let io_err = |source| StorageError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let file = tokio::fs::File::create(&path).await.map_err(io_err)?;
        let written = match drain(file, &mut stream, &path).await {
            Ok(written) => written,
            Err(e) => {
                // A partial file must not be served under the output root.
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %remove, "Failed to remove partial asset");
                }
                return Err(e);
            }
        };

        tracing::debug!(path = %path.display(), bytes = written, "Asset stored");
        Ok(format!("{GENERATED_URL_PREFIX}/{relative_path}"))
    }
}

/// Write every chunk of `stream` into `file`, returning the byte count.
async fn drain(
    mut file: tokio::fs::File,
    stream: &mut AssetStream,
    path: &Path,
) -> Result<usize, StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len();
        file.write_all(&chunk).await.map_err(io_err)?;
    }
    file.flush().await.map_err(io_err)?;
    Ok(written)
}
