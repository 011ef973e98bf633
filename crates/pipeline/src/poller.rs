//! Drives one remote job handle to exactly one terminal outcome.
//!
//! The poller asks the service for the job's status at a fixed interval,
//! downloads and stores the asset once the job is done, and gives up after
//! a bounded number of polls. The sleep between polls is the only
//! suspension point that is not I/O, and it observes cancellation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use promptreel_core::types::AssetRef;
use promptreel_luma::client::{JobClient, JobClientError, JobHandle, RemoteStatus};
use tokio_util::sync::CancellationToken;

use crate::storage::{ArtifactStore, StorageError};

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Default number of polls before a job is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Why a job did not produce a stored asset.
///
/// The `Display` text is what clients see as the item's error.
#[derive(Debug, thiserror::Error)]
pub enum JobFailure {
    /// Talking to the service failed.
    #[error("{0}")]
    Transport(#[from] JobClientError),

    /// The service reported the job as failed.
    #[error("{0}")]
    Service(String),

    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("cancelled")]
    Cancelled,
}

/// Receives every poll observation, in order.
#[async_trait]
pub trait PollObserver: Send {
    async fn observe(&mut self, attempt: u32, status: &RemoteStatus);
}

#[async_trait]
impl PollObserver for () {
    async fn observe(&mut self, _attempt: u32, _status: &RemoteStatus) {}
}

#[derive(Clone)]
pub struct Poller {
    client: Arc<dyn JobClient>,
    store: Arc<dyn ArtifactStore>,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(
        client: Arc<dyn JobClient>,
        store: Arc<dyn ArtifactStore>,
        policy: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            store,
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Poll `handle` until it is terminal or the attempt budget is spent.
    ///
    /// On `Done` the asset is downloaded into `destination` (relative to
    /// the store root). Exactly `max_attempts` polls are issued before
    /// [`JobFailure::Timeout`], and no sleep follows the last one. A timed
    /// out job is abandoned on the service, not cancelled.
    pub async fn run(
        &self,
        handle: &JobHandle,
        destination: &str,
        observer: &mut dyn PollObserver,
    ) -> Result<AssetRef, JobFailure> {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            let status = tokio::select! {
                _ = self.cancel.cancelled() => return Err(JobFailure::Cancelled),
                result = self.client.poll(handle) => result?,
            };

            tracing::debug!(
                job_id = %handle.id,
                kind = %handle.kind,
                attempt,
                max_attempts,
                status = ?status,
                "Polled job",
            );
            observer.observe(attempt, &status).await;

            match status {
                RemoteStatus::Done { asset_url } => {
                    return self.download(handle, &asset_url, destination).await;
                }
                RemoteStatus::Error { reason } => {
                    tracing::info!(job_id = %handle.id, reason = %reason, "Job failed on service");
                    return Err(JobFailure::Service(reason));
                }
                RemoteStatus::Queued | RemoteStatus::Running => {}
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(JobFailure::Cancelled),
                    _ = tokio::time::sleep(self.policy.interval) => {}
                }
            }
        }

        tracing::warn!(
            job_id = %handle.id,
            kind = %handle.kind,
            attempts = max_attempts,
            "Abandoning job after poll budget was exhausted",
        );
        Err(JobFailure::Timeout)
    }

    async fn download(
        &self,
        handle: &JobHandle,
        asset_url: &str,
        destination: &str,
    ) -> Result<AssetRef, JobFailure> {
        let stream = self
            .client
            .fetch_asset(asset_url)
            .await
            .map_err(StorageError::Download)?;
        let local_ref = self.store.store(destination, stream).await?;

        tracing::info!(job_id = %handle.id, local_ref = %local_ref, "Job completed");
        Ok(AssetRef::remote(asset_url).with_local_ref(local_ref))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use promptreel_luma::client::JobSpec;
    use promptreel_luma::testing::{Script, ScriptedJobClient, Step};

    use super::*;
    use crate::storage::LocalArtifactStore;

    #[derive(Default)]
    struct Recorded(Vec<(u32, RemoteStatus)>);

    #[async_trait]
    impl PollObserver for Recorded {
        async fn observe(&mut self, attempt: u32, status: &RemoteStatus) {
            self.0.push((attempt, status.clone()));
        }
    }

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    async fn submit(client: &ScriptedJobClient, prompt: &str) -> JobHandle {
        client
            .submit(&JobSpec::Image {
                prompt: prompt.into(),
            })
            .await
            .unwrap()
    }

    fn poller(
        client: Arc<ScriptedJobClient>,
        dir: &tempfile::TempDir,
        policy: PollPolicy,
    ) -> Poller {
        Poller::new(
            client,
            Arc::new(LocalArtifactStore::new(dir.path())),
            policy,
            CancellationToken::new(),
        )
    }

    #[test]
    fn default_policy_is_two_seconds_thirty_attempts() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(2000));
        assert_eq!(policy.max_attempts, 30);
    }

    #[test]
    fn timeout_reads_timed_out() {
        assert_eq!(JobFailure::Timeout.to_string(), "timed out");
    }

    #[tokio::test]
    async fn done_job_is_downloaded_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedJobClient::new());
        let handle = submit(&client, "a fox").await;

        let mut seen = Recorded::default();
        let asset = poller(client.clone(), &dir, fast_policy(5))
            .run(&handle, "image_01.png", &mut seen)
            .await
            .unwrap();

        assert_eq!(asset.remote_url, ScriptedJobClient::asset_url(&handle.id));
        assert_eq!(asset.local_ref.as_deref(), Some("/generated/image_01.png"));
        assert_eq!(seen.0.len(), 2);
        assert_eq!(seen.0[0], (1, RemoteStatus::Queued));
        assert!(dir.path().join("image_01.png").exists());
    }

    #[tokio::test]
    async fn never_terminal_times_out_after_exactly_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedJobClient::new().with_default(Script::hang()));
        let handle = submit(&client, "slow").await;

        let mut seen = Recorded::default();
        let failure = poller(client.clone(), &dir, fast_policy(4))
            .run(&handle, "x.png", &mut seen)
            .await
            .unwrap_err();

        assert_matches!(failure, JobFailure::Timeout);
        assert_eq!(failure.to_string(), "timed out");
        assert_eq!(client.polls(&handle.id), 4);
        let attempts: Vec<_> = seen.0.iter().map(|(a, _)| *a).collect();
        assert_eq!(attempts, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn service_failure_stops_polling_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedJobClient::new().with_default(Script::fail("nsfw")));
        let handle = submit(&client, "b").await;

        let failure = poller(client.clone(), &dir, fast_policy(10))
            .run(&handle, "x.png", &mut ())
            .await
            .unwrap_err();

        assert_matches!(failure, JobFailure::Service(ref r) if r == "nsfw");
        assert_eq!(client.polls(&handle.id), 2);
    }

    #[tokio::test]
    async fn poll_transport_error_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedJobClient::new().with_default(Script::steps(vec![
            Step::Running,
            Step::PollFailure("bad gateway".into()),
        ])));
        let handle = submit(&client, "c").await;

        let failure = poller(client.clone(), &dir, fast_policy(10))
            .run(&handle, "x.png", &mut ())
            .await
            .unwrap_err();

        assert_matches!(failure, JobFailure::Transport(_));
        assert_eq!(client.polls(&handle.id), 2);
    }

    #[tokio::test]
    async fn failed_download_is_a_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client =
            Arc::new(ScriptedJobClient::new().with_default(Script::broken_asset("cdn down")));
        let handle = submit(&client, "d").await;

        let failure = poller(client, &dir, fast_policy(5))
            .run(&handle, "x.png", &mut ())
            .await
            .unwrap_err();

        assert_matches!(failure, JobFailure::Storage(StorageError::Download(_)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedJobClient::new().with_default(Script::hang()));
        let handle = submit(&client, "e").await;
        let cancel = CancellationToken::new();

        let poller = Poller::new(
            client.clone(),
            Arc::new(LocalArtifactStore::new(dir.path())),
            PollPolicy {
                interval: Duration::from_secs(60),
                max_attempts: 30,
            },
            cancel.clone(),
        );

        let task = tokio::spawn(async move { poller.run(&handle, "x.png", &mut ()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_matches!(task.await.unwrap(), Err(JobFailure::Cancelled));
    }
}
