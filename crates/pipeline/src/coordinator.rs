//! Serial batch processing.
//!
//! A [`BatchCoordinator`] accepts one batch at a time. Each prompt is
//! submitted, polled to a terminal state and reported before the next one
//! is touched, and every step is streamed to the caller through an
//! [`EventEmitter`]:
//!
//! ```text
//! progress(1) -> result(i0) -> progress(2) -> result(i1) -> ... -> complete
//! ```
//!
//! Per-item failures become `success: false` results and never stop the
//! loop. Only a vanished reader, an unusable output folder, or shutdown
//! abort the batch.

use std::sync::Arc;

use async_trait::async_trait;
use promptreel_core::batch::BatchRequest;
use promptreel_core::error::CoreError;
use promptreel_core::event::{BatchEvent, ItemResult};
use promptreel_core::job::{JobKind, JobRecord, LifecycleTable};
use promptreel_core::prompt::PromptItem;
use promptreel_events::{EventEmitter, EventStream, StreamClosed, DEFAULT_CAPACITY};
use promptreel_luma::client::{JobClient, JobSpec, RemoteStatus};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::poller::{PollObserver, PollPolicy, Poller};
use crate::storage::{batch_folder_name, image_file_name, ArtifactStore, StorageError};

/// Error reported for a prompt that is blank after trimming.
pub const EMPTY_PROMPT: &str = "empty prompt";

/// Why a batch stopped before emitting `complete`.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    StreamClosed(#[from] StreamClosed),

    #[error("Failed to create output folder: {0}")]
    OutputFolder(#[source] StorageError),

    #[error("Server is shutting down")]
    Cancelled,
}

/// A validated batch holding the single-batch lease.
///
/// Dropping it releases the lease.
#[derive(Debug)]
pub struct PreparedBatch {
    items: Vec<PromptItem>,
    fresh: bool,
    table: OwnedMutexGuard<LifecycleTable>,
}

impl PreparedBatch {
    pub fn items(&self) -> &[PromptItem] {
        &self.items
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

#[derive(Clone)]
pub struct BatchCoordinator {
    client: Arc<dyn JobClient>,
    store: Arc<dyn ArtifactStore>,
    poller: Poller,
    table: Arc<Mutex<LifecycleTable>>,
    cancel: CancellationToken,
}

impl BatchCoordinator {
    pub fn new(
        client: Arc<dyn JobClient>,
        store: Arc<dyn ArtifactStore>,
        policy: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let poller = Poller::new(client.clone(), store.clone(), policy, cancel.clone());
        Self {
            client,
            store,
            poller,
            table: Arc::new(Mutex::new(LifecycleTable::new())),
            cancel,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    /// Pre-flight checks, in order: credential present, request valid,
    /// no other batch running. Nothing is emitted or submitted here.
    pub fn prepare(&self, request: BatchRequest) -> Result<PreparedBatch, CoreError> {
        if !self.client.is_configured() {
            return Err(CoreError::Configuration(
                "LUMA_API_KEY is not configured".to_string(),
            ));
        }

        let fresh = request.is_fresh();
        let items = request.into_items()?;

        let table = self
            .table
            .clone()
            .try_lock_owned()
            .map_err(|_| CoreError::Conflict("A batch is already running".to_string()))?;

        Ok(PreparedBatch {
            items,
            fresh,
            table,
        })
    }

    /// Prepare `request` and process it on a background task, returning
    /// the stream of its events.
    pub fn start(&self, request: BatchRequest) -> Result<EventStream, CoreError> {
        let batch = self.prepare(request)?;
        let (emitter, stream) = EventEmitter::channel(DEFAULT_CAPACITY);

        let span = tracing::info_span!(
            "batch",
            total = batch.items.len(),
            fresh = batch.fresh,
        );
        let coordinator = self.clone();
        tokio::spawn(
            async move {
                // Failures are logged and reported on the stream by `run`.
                let _ = coordinator.run(batch, emitter).await;
            }
            .instrument(span),
        );

        Ok(stream)
    }

    /// Process every item of `batch` in order, emitting its events.
    ///
    /// Returns the results in processing order, or the reason the batch
    /// was aborted. On abort an `error` event is attempted.
    pub async fn run(
        &self,
        batch: PreparedBatch,
        emitter: EventEmitter,
    ) -> Result<Vec<ItemResult>, BatchError> {
        let result = self.drive(batch, &emitter).await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Batch aborted");
            if emitter.emit(BatchEvent::error(e.to_string())).await.is_err() {
                tracing::debug!("Reader gone; abort event not delivered");
            }
        }
        result
    }

    /// Copy of the lifecycle records of the latest batch family.
    ///
    /// Fails with `Conflict` while a batch holds the lease.
    pub fn records(&self) -> Result<Vec<JobRecord>, CoreError> {
        let table = self
            .table
            .try_lock()
            .map_err(|_| CoreError::Conflict("A batch is already running".to_string()))?;
        Ok(table.iter().cloned().collect())
    }

    // ---- private helpers ----

    async fn drive(
        &self,
        mut batch: PreparedBatch,
        emitter: &EventEmitter,
    ) -> Result<Vec<ItemResult>, BatchError> {
        if batch.fresh {
            batch.table.reset();
        }

        let folder = batch_folder_name(chrono::Utc::now());
        self.store
            .create_folder(&folder)
            .await
            .map_err(BatchError::OutputFolder)?;

        let total = batch.items.len();
        tracing::info!(total, folder = %folder, "Batch started");

        let mut results = Vec::with_capacity(total);
        for (position, item) in batch.items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(BatchError::Cancelled);
            }

            emitter
                .emit(BatchEvent::progress(
                    position + 1,
                    total,
                    format!("Generating image {}", item.index + 1),
                ))
                .await?;

            let (record, result) = self.process_item(&folder, item).await;
            batch.table.replace(record);

            emitter
                .emit(BatchEvent::Result {
                    result: result.clone(),
                })
                .await?;
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        tracing::info!(total, succeeded, failed = total - succeeded, "Batch complete");

        emitter
            .emit(BatchEvent::Complete {
                results: results.clone(),
            })
            .await?;
        Ok(results)
    }

    /// Run one item to its terminal state. Never fails: every error ends
    /// up in the returned result.
    async fn process_item(&self, folder: &str, item: &PromptItem) -> (JobRecord, ItemResult) {
        let mut record = JobRecord::new(item.index, JobKind::Image);

        if item.text.is_empty() {
            log_transition(record.fail(EMPTY_PROMPT));
            return (record, ItemResult::failed(item.index, &item.text, EMPTY_PROMPT));
        }

        let spec = JobSpec::Image {
            prompt: item.text.clone(),
        };
        let handle = match self.client.submit(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(index = item.index, error = %e, "Job submission failed");
                let reason = e.to_string();
                log_transition(record.fail(reason.as_str()));
                return (record, ItemResult::failed(item.index, &item.text, reason));
            }
        };

        tracing::info!(index = item.index, job_id = %handle.id, "Job submitted");
        log_transition(record.start_polling(handle.id.as_str()));

        let destination = format!("{folder}/{}", image_file_name(item.index));
        let outcome = self
            .poller
            .run(&handle, &destination, &mut AttemptRecorder(&mut record))
            .await;

        let result = match outcome {
            Ok(asset) => {
                log_transition(record.succeed(asset.clone()));
                ItemResult::succeeded(item.index, &item.text, asset)
            }
            Err(failure) => {
                tracing::warn!(
                    index = item.index,
                    job_id = %handle.id,
                    error = %failure,
                    "Job failed",
                );
                let reason = failure.to_string();
                log_transition(record.fail(reason.as_str()));
                ItemResult::failed(item.index, &item.text, reason)
            }
        };
        (record, result)
    }
}

/// Counts poll attempts on the item's record.
struct AttemptRecorder<'a>(&'a mut JobRecord);

#[async_trait]
impl<'a> PollObserver for AttemptRecorder<'a> {
    async fn observe(&mut self, _attempt: u32, _status: &RemoteStatus) {
        log_transition(self.0.record_attempt());
    }
}

fn log_transition<T>(result: Result<T, CoreError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Rejected job transition");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
