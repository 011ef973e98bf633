//! Compose jobs: chain finished images into one clip.
//!
//! Submission happens inside the caller's request so submission errors are
//! reported directly. Polling then continues on a tracked background task,
//! and callers follow it through an opaque handle and
//! [`ComposeOrchestrator::status`].
//!
//! Finished statuses stay pollable until [`DEFAULT_FINISHED_CAPACITY`]
//! newer jobs have finished; the oldest are evicted first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use promptreel_core::compose::{ComposeAccepted, ComposeRequest, ComposeStatus};
use promptreel_core::error::CoreError;
use promptreel_luma::client::{JobClient, JobClientError, JobHandle, JobSpec, RemoteStatus};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::poller::{PollObserver, PollPolicy, Poller};
use crate::storage::{video_file_name, ArtifactStore};

/// Number of finished compose statuses retained for polling.
pub const DEFAULT_FINISHED_CAPACITY: usize = 256;

type SharedRegistry = Arc<RwLock<Registry>>;

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Failed to submit compose job: {0}")]
    Submit(#[source] JobClientError),
}

/// Handle -> status, with finished entries kept in completion order.
#[derive(Debug)]
struct Registry {
    statuses: HashMap<String, ComposeStatus>,
    finished: VecDeque<String>,
    capacity: usize,
}

impl Registry {
    fn new(capacity: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            finished: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert_queued(&mut self, job_handle: String) {
        self.statuses.insert(job_handle, ComposeStatus::Queued);
    }

    /// `queued -> running`. Terminal entries are left alone.
    fn mark_running(&mut self, job_handle: &str) {
        if let Some(status) = self.statuses.get_mut(job_handle) {
            if !status.is_terminal() {
                *status = ComposeStatus::Running;
            }
        }
    }

    fn finish(&mut self, job_handle: String, status: ComposeStatus) {
        self.statuses.insert(job_handle.clone(), status);
        self.finished.push_back(job_handle);

        while self.finished.len() > self.capacity {
            if let Some(evicted) = self.finished.pop_front() {
                self.statuses.remove(&evicted);
                tracing::debug!(handle = %evicted, "Evicted finished compose status");
            }
        }
    }

    fn get(&self, job_handle: &str) -> Option<&ComposeStatus> {
        self.statuses.get(job_handle)
    }
}

#[derive(Clone)]
pub struct ComposeOrchestrator {
    client: Arc<dyn JobClient>,
    poller: Poller,
    registry: SharedRegistry,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ComposeOrchestrator {
    pub fn new(
        client: Arc<dyn JobClient>,
        store: Arc<dyn ArtifactStore>,
        policy: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            poller: Poller::new(client.clone(), store, policy, cancel.clone()),
            client,
            registry: Arc::new(RwLock::new(Registry::new(DEFAULT_FINISHED_CAPACITY))),
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    /// Keep at most `capacity` finished statuses. Call before the first
    /// submission.
    pub fn with_finished_capacity(mut self, capacity: usize) -> Self {
        self.registry = Arc::new(RwLock::new(Registry::new(capacity)));
        self
    }

    /// Submit one compose job over `request.sources` (already ordered by
    /// originating index) and start tracking it.
    pub async fn submit(&self, request: ComposeRequest) -> Result<ComposeAccepted, ComposeError> {
        if !self.client.is_configured() {
            return Err(CoreError::Configuration("LUMA_API_KEY is not configured".to_string()).into());
        }
        request.validate()?;

        let spec = JobSpec::Compose {
            prompt: request.effective_instructions(),
            sources: request
                .sources
                .iter()
                .map(|s| s.remote_url.clone())
                .collect(),
        };
        let remote = self.client.submit(&spec).await.map_err(|e| {
            tracing::warn!(error = %e, "Compose submission failed");
            ComposeError::Submit(e)
        })?;

        let job_handle = uuid::Uuid::now_v7().to_string();
        self.registry.write().await.insert_queued(job_handle.clone());

        tracing::info!(
            handle = %job_handle,
            job_id = %remote.id,
            sources = request.sources.len(),
            "Compose job submitted",
        );

        let span = tracing::info_span!("compose", handle = %job_handle);
        let orchestrator = self.clone();
        let handle = job_handle.clone();
        self.tasks
            .spawn(async move { orchestrator.track(handle, remote).await }.instrument(span));

        Ok(ComposeAccepted { job_handle })
    }

    /// Current status of a compose job.
    pub async fn status(&self, job_handle: &str) -> Result<ComposeStatus, CoreError> {
        self.registry
            .read()
            .await
            .get(job_handle)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                entity: "ComposeJob",
                id: job_handle.to_string(),
            })
    }

    /// Stop polling outstanding jobs and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    // ---- private helpers ----

    async fn track(&self, job_handle: String, remote: JobHandle) {
        let destination = video_file_name(chrono::Utc::now(), &job_handle);
        let mut observer = MarkRunning {
            registry: self.registry.clone(),
            job_handle: job_handle.clone(),
            marked: false,
        };

        let status = match self.poller.run(&remote, &destination, &mut observer).await {
            Ok(asset) => {
                tracing::info!(job_id = %remote.id, "Compose job completed");
                ComposeStatus::completed(asset)
            }
            Err(failure) => {
                tracing::warn!(job_id = %remote.id, error = %failure, "Compose job failed");
                ComposeStatus::Failed {
                    error: failure.to_string(),
                }
            }
        };

        self.registry.write().await.finish(job_handle, status);
    }
}

/// Moves a job from `queued` to `running` on its first non-terminal poll.
struct MarkRunning {
    registry: SharedRegistry,
    job_handle: String,
    marked: bool,
}

#[async_trait]
impl PollObserver for MarkRunning {
    async fn observe(&mut self, _attempt: u32, status: &RemoteStatus) {
        if self.marked || status.is_terminal() {
            return;
        }
        self.marked = true;
        self.registry.write().await.mark_running(&self.job_handle);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
