//! Scripted in-memory [`JobClient`] for tests.
//!
//! Each submitted prompt follows a [`Script`]: an optional submission
//! rejection followed by the sequence of statuses its polls observe (the
//! last step repeats forever). Every submission and poll is recorded so
//! tests can assert on ordering and attempt counts.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::client::{AssetStream, JobClient, JobClientError, JobHandle, JobSpec, RemoteStatus};

/// One scripted poll observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Queued,
    Running,
    /// Done, with an asset URL derived from the job id.
    Done,
    Error(String),
    /// The poll call itself fails.
    PollFailure(String),
}

#[derive(Debug, Clone)]
pub struct Script {
    reject_submit: Option<String>,
    steps: Vec<Step>,
    asset_failure: Option<String>,
}

impl Script {
    /// Queued once, then done.
    pub fn succeed() -> Self {
        Self::steps(vec![Step::Queued, Step::Done])
    }

    /// Running once, then a service-reported failure.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::steps(vec![Step::Running, Step::Error(reason.into())])
    }

    /// Never reaches a terminal state.
    pub fn hang() -> Self {
        Self::steps(vec![Step::Running])
    }

    /// The create call is rejected with a 400.
    pub fn reject(body: impl Into<String>) -> Self {
        Self {
            reject_submit: Some(body.into()),
            ..Self::succeed()
        }
    }

    pub fn steps(steps: Vec<Step>) -> Self {
        Self {
            reject_submit: None,
            steps,
            asset_failure: None,
        }
    }

    /// Completes, but downloading the asset fails.
    pub fn broken_asset(reason: impl Into<String>) -> Self {
        Self {
            asset_failure: Some(reason.into()),
            ..Self::succeed()
        }
    }
}

struct ScriptedJob {
    script: Script,
    polls: u32,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<String, Script>,
    jobs: HashMap<String, ScriptedJob>,
    submissions: Vec<JobSpec>,
    failing_assets: HashMap<String, String>,
}

pub struct ScriptedJobClient {
    configured: bool,
    default_script: Script,
    inner: Mutex<Inner>,
}

impl Default for ScriptedJobClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedJobClient {
    /// A configured client where every prompt succeeds.
    pub fn new() -> Self {
        Self {
            configured: true,
            default_script: Script::succeed(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A client without a credential.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    /// Script used for prompts without their own script.
    pub fn with_default(mut self, script: Script) -> Self {
        self.default_script = script;
        self
    }

    /// Script the job created for `prompt`.
    pub fn with_script(self, prompt: impl Into<String>, script: Script) -> Self {
        self.set_script(prompt, script);
        self
    }

    /// Replace the script for `prompt` on a shared client.
    pub fn set_script(&self, prompt: impl Into<String>, script: Script) {
        self.lock().scripts.insert(prompt.into(), script);
    }

    /// Every accepted or rejected submission, in order.
    pub fn submissions(&self) -> Vec<JobSpec> {
        self.lock().submissions.clone()
    }

    /// Prompts of every submission, in order.
    pub fn submitted_prompts(&self) -> Vec<String> {
        self.submissions()
            .into_iter()
            .map(|spec| match spec {
                JobSpec::Image { prompt } | JobSpec::Compose { prompt, .. } => prompt,
            })
            .collect()
    }

    /// Number of polls issued for `job_id`.
    pub fn polls(&self, job_id: &str) -> u32 {
        self.lock().jobs.get(job_id).map_or(0, |j| j.polls)
    }

    /// Asset URL produced for a job id.
    pub fn asset_url(job_id: &str) -> String {
        format!("https://assets.test/{job_id}")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobClient for ScriptedJobClient {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, JobClientError> {
        if !self.configured {
            return Err(JobClientError::NotConfigured);
        }
        let prompt = match spec {
            JobSpec::Image { prompt } | JobSpec::Compose { prompt, .. } => prompt.clone(),
        };

        let mut inner = self.lock();
        inner.submissions.push(spec.clone());
        let script = inner
            .scripts
            .get(&prompt)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());

        if let Some(body) = script.reject_submit.clone() {
            return Err(JobClientError::Api { status: 400, body });
        }

        let id = format!("job-{}", inner.submissions.len());
        if let Some(reason) = script.asset_failure.clone() {
            inner.failing_assets.insert(Self::asset_url(&id), reason);
        }
        inner.jobs.insert(id.clone(), ScriptedJob { script, polls: 0 });

        Ok(JobHandle {
            id,
            kind: spec.kind(),
        })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, JobClientError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&handle.id)
            .ok_or_else(|| JobClientError::Api {
                status: 404,
                body: format!("unknown job {}", handle.id),
            })?;

        let cursor = (job.polls as usize).min(job.script.steps.len().saturating_sub(1));
        job.polls += 1;
        let step = job.script.steps.get(cursor).cloned().unwrap_or(Step::Running);

        match step {
            Step::Queued => Ok(RemoteStatus::Queued),
            Step::Running => Ok(RemoteStatus::Running),
            Step::Done => Ok(RemoteStatus::Done {
                asset_url: Self::asset_url(&handle.id),
            }),
            Step::Error(reason) => Ok(RemoteStatus::Error { reason }),
            Step::PollFailure(reason) => Err(JobClientError::Decode(reason)),
        }
    }

    async fn fetch_asset(&self, asset_url: &str) -> Result<AssetStream, JobClientError> {
        if let Some(reason) = self.lock().failing_assets.get(asset_url).cloned() {
            return Err(JobClientError::Api {
                status: 502,
                body: reason,
            });
        }
        let chunks = vec![
            Ok(Bytes::from_static(b"asset:")),
            Ok(Bytes::from(asset_url.to_string())),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use promptreel_core::job::JobKind;

    use super::*;

    #[tokio::test]
    async fn last_step_repeats() {
        let client = ScriptedJobClient::new().with_script("slow", Script::hang());
        let handle = client
            .submit(&JobSpec::Image {
                prompt: "slow".into(),
            })
            .await
            .unwrap();
        assert_eq!(handle.kind, JobKind::Image);

        for _ in 0..3 {
            assert_eq!(client.poll(&handle).await.unwrap(), RemoteStatus::Running);
        }
        assert_eq!(client.polls(&handle.id), 3);
    }

    #[tokio::test]
    async fn default_script_completes_after_one_queued_poll() {
        let client = ScriptedJobClient::new();
        let handle = client
            .submit(&JobSpec::Image { prompt: "a".into() })
            .await
            .unwrap();
        assert_eq!(client.poll(&handle).await.unwrap(), RemoteStatus::Queued);
        assert_eq!(
            client.poll(&handle).await.unwrap(),
            RemoteStatus::Done {
                asset_url: ScriptedJobClient::asset_url(&handle.id)
            }
        );
        assert_eq!(client.submitted_prompts(), vec!["a".to_string()]);
    }
}
