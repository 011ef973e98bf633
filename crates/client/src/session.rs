//! A reader's view of a batch and its retries.
//!
//! [`BatchSession`] owns the [`ReconciliationState`] and is the only thing
//! that applies events to it, one at a time in arrival order. UIs read
//! [`BatchSession::snapshot`] and [`BatchSession::actions`] and feed user
//! intent back through [`BatchSession::perform`].

use futures::StreamExt;
use promptreel_core::batch::BatchRequest;
use promptreel_core::compose::{ComposeAccepted, ComposeRequest};
use promptreel_core::error::CoreError;
use promptreel_core::prompt::{into_items, parse_prompts, PromptItem};
use promptreel_core::reconcile::{Applied, ReconciliationSnapshot, ReconciliationState};
use promptreel_core::types::{AssetRef, ItemIndex};

use crate::http::{ApiClient, ClientError};

/// An action offered for one item. Each variant carries everything needed
/// to perform it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemAction {
    /// Resubmit a failed index (original text plus supplemental text).
    Retry { index: ItemIndex },
    /// Turn one finished image into a clip.
    Compose { index: ItemIndex, asset: AssetRef },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Batch(BatchReport),
    Compose(ComposeAccepted),
}

/// Everything applying one batch's events did, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: Vec<Applied>,
}

impl BatchReport {
    pub fn succeeded(&self) -> Vec<ItemIndex> {
        self.applied
            .iter()
            .filter_map(|a| match a {
                Applied::Succeeded { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<(ItemIndex, String)> {
        self.applied
            .iter()
            .filter_map(|a| match a {
                Applied::Failed { index, error } => Some((*index, error.clone())),
                _ => None,
            })
            .collect()
    }

    /// Error of an aborted batch.
    pub fn aborted(&self) -> Option<&str> {
        self.applied.iter().find_map(|a| match a {
            Applied::Aborted { error } => Some(error.as_str()),
            _ => None,
        })
    }
}

/// Actions for every item with a terminal outcome, ascending by index.
pub fn item_actions(state: &ReconciliationState) -> Vec<ItemAction> {
    let mut actions: Vec<_> = state
        .failures()
        .keys()
        .map(|&index| ItemAction::Retry { index })
        .chain(
            state
                .successes()
                .iter()
                .map(|(&index, asset)| ItemAction::Compose {
                    index,
                    asset: asset.clone(),
                }),
        )
        .collect();
    actions.sort_by_key(|action| match action {
        ItemAction::Retry { index } | ItemAction::Compose { index, .. } => *index,
    });
    actions
}

pub struct BatchSession {
    api: ApiClient,
    state: ReconciliationState,
}

impl BatchSession {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            state: ReconciliationState::new(),
        }
    }

    /// Parse prompt-file text into items ready for [`BatchSession::generate`].
    pub fn load_prompts(text: &str) -> Vec<PromptItem> {
        into_items(&parse_prompts(text))
    }

    /// Run a fresh batch over `prompts`. Both maps are cleared first.
    pub async fn generate(&mut self, prompts: Vec<String>) -> Result<BatchReport, ClientError> {
        let request = BatchRequest::fresh(prompts);
        let items = request.clone().into_items()?;
        self.state.begin_fresh(&items)?;
        self.run(request).await
    }

    /// Retry `indices` in the given order.
    pub async fn retry(&mut self, indices: &[ItemIndex]) -> Result<BatchReport, ClientError> {
        let request = self.state.retry_request(indices)?;
        self.state.begin_retry(indices)?;
        self.run(request).await
    }

    /// Retry every failed index.
    pub async fn retry_all(&mut self) -> Result<BatchReport, ClientError> {
        let indices: Vec<_> = self.state.failures().keys().copied().collect();
        if indices.is_empty() {
            return Err(CoreError::Validation("There are no failed prompts".to_string()).into());
        }
        self.retry(&indices).await
    }

    /// Set the supplemental instructions used the next time `index` is
    /// retried.
    pub fn set_supplemental(
        &mut self,
        index: ItemIndex,
        text: impl Into<String>,
    ) -> Result<(), CoreError> {
        self.state.set_supplemental(index, text)
    }

    /// Submit one compose job over every successful asset, ordered by
    /// index. Only allowed once nothing is failed or in flight.
    pub async fn compose(
        &self,
        instructions: Option<String>,
    ) -> Result<ComposeAccepted, ClientError> {
        if !self.state.controls().compose {
            return Err(CoreError::Conflict(
                "Compose needs at least one success, no failures and no batch in flight"
                    .to_string(),
            )
            .into());
        }
        let request = ComposeRequest {
            sources: self.state.compose_sources(),
            instructions,
        };
        self.api.submit_compose(&request).await
    }

    pub fn actions(&self) -> Vec<ItemAction> {
        item_actions(&self.state)
    }

    pub async fn perform(&mut self, action: ItemAction) -> Result<ActionOutcome, ClientError> {
        match action {
            ItemAction::Retry { index } => Ok(ActionOutcome::Batch(self.retry(&[index]).await?)),
            ItemAction::Compose { index, asset } => {
                tracing::debug!(index, "Composing single item");
                let request = ComposeRequest {
                    sources: vec![asset],
                    instructions: None,
                };
                Ok(ActionOutcome::Compose(
                    self.api.submit_compose(&request).await?,
                ))
            }
        }
    }

    pub fn snapshot(&self) -> ReconciliationSnapshot {
        self.state.snapshot()
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    // ---- private helpers ----

    /// Stream `request`'s events into the state. The in-flight flag is
    /// cleared on every exit path.
    async fn run(&mut self, request: BatchRequest) -> Result<BatchReport, ClientError> {
        let mut events = match self.api.submit_batch(&request).await {
            Ok(events) => events,
            Err(e) => {
                self.state.abort();
                return Err(e);
            }
        };

        let mut report = BatchReport::default();
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Batch stream failed");
                    self.state.abort();
                    return Err(e);
                }
            };

            let applied = self.state.apply(&event);
            match &applied {
                Applied::Progress {
                    current,
                    total,
                    status,
                } => tracing::debug!(current, total, status = %status, "Batch progress"),
                Applied::Ignored { index } => {
                    tracing::warn!(index, "Ignoring result for an index that was not submitted")
                }
                _ => {}
            }
            report.applied.push(applied);

            if event.is_terminal() {
                return Ok(report);
            }
        }

        self.state.abort();
        Err(ClientError::StreamEnded)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
