//! Client-side reconciliation of a batch's event stream.
//!
//! [`ReconciliationState`] owns the success map (index -> asset) and the
//! failure map (index -> prompt + supplemental text). Every mutation goes
//! through [`ReconciliationState::apply`] or one of the explicit user-edit
//! methods, so events are applied one at a time in arrival order. Readers
//! get shared references or a cloned [`ReconciliationSnapshot`].
//!
//! Once the latest event for an index has been applied, that index is in
//! at most one of the two maps. A failed result evicts an earlier success
//! for the same index.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::batch::BatchRequest;
use crate::error::CoreError;
use crate::event::{BatchEvent, ItemOutcome, ItemResult};
use crate::prompt::PromptItem;
use crate::types::{AssetRef, ItemIndex};

/// Failure-map entry: what to resubmit for a failed index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPrompt {
    pub original_text: String,
    /// Extra instructions typed by the user for the next retry.
    pub supplemental_text: String,
}

impl FailedPrompt {
    /// Text to submit on retry: the original prompt, plus the supplemental
    /// text when there is any.
    pub fn retry_text(&self) -> String {
        let extra = self.supplemental_text.trim();
        if extra.is_empty() {
            self.original_text.clone()
        } else {
            format!("{} {}", self.original_text, extra)
        }
    }
}

/// Batch-level controls, derived from map contents only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchControls {
    /// A new batch may be started.
    pub generate: bool,
    /// "Retry all failed" is available.
    pub retry_all: bool,
    /// The compose stage may be started.
    pub compose: bool,
}

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Progress {
        current: usize,
        total: usize,
        status: String,
    },
    Succeeded {
        index: ItemIndex,
        asset: AssetRef,
    },
    Failed {
        index: ItemIndex,
        error: String,
    },
    /// A result for an index this client never submitted.
    Ignored { index: ItemIndex },
    Finished(BatchControls),
    Aborted { error: String },
}

/// Read-only copy of the reconciliation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationSnapshot {
    pub successes: BTreeMap<ItemIndex, AssetRef>,
    pub failures: BTreeMap<ItemIndex, FailedPrompt>,
    pub in_flight: bool,
    pub controls: BatchControls,
}

#[derive(Debug, Clone, Default)]
pub struct ReconciliationState {
    originals: BTreeMap<ItemIndex, String>,
    submitted: BTreeSet<ItemIndex>,
    successes: BTreeMap<ItemIndex, AssetRef>,
    failures: BTreeMap<ItemIndex, FailedPrompt>,
    in_flight: bool,
}

impl ReconciliationState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- batch boundaries ----

    /// Start a fresh batch over `items`: both maps are cleared and the
    /// item texts become the originals used for later retries.
    pub fn begin_fresh(&mut self, items: &[PromptItem]) -> Result<(), CoreError> {
        self.ensure_idle()?;
        self.successes.clear();
        self.failures.clear();
        self.originals = items.iter().map(|i| (i.index, i.text.clone())).collect();
        self.submitted = items.iter().map(|i| i.index).collect();
        self.in_flight = true;
        Ok(())
    }

    /// Start a retry of `indices`, all of which must have been submitted
    /// before.
    pub fn begin_retry(&mut self, indices: &[ItemIndex]) -> Result<(), CoreError> {
        self.ensure_idle()?;
        if let Some(unknown) = indices.iter().find(|i| !self.submitted.contains(*i)) {
            return Err(CoreError::Validation(format!(
                "Index {unknown} was never submitted in this batch"
            )));
        }
        self.in_flight = true;
        Ok(())
    }

    /// End the in-flight batch after a client-side transport failure (the
    /// stream broke before a terminal event arrived).
    pub fn abort(&mut self) {
        self.in_flight = false;
    }

    fn ensure_idle(&self) -> Result<(), CoreError> {
        if self.in_flight {
            Err(CoreError::Conflict(
                "A batch is already in flight".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    // ---- event application ----

    /// Apply one streamed event. Events must be applied in arrival order.
    /// Re-applying an event leaves the maps as after its first
    /// application.
    pub fn apply(&mut self, event: &BatchEvent) -> Applied {
        match event {
            BatchEvent::Progress {
                current,
                total,
                status,
            } => Applied::Progress {
                current: *current,
                total: *total,
                status: status.clone(),
            },
            BatchEvent::Result { result } => self.apply_result(result),
            BatchEvent::Complete { .. } => {
                // Per-item events already updated the maps; the payload is
                // not consulted.
                self.in_flight = false;
                Applied::Finished(self.controls())
            }
            BatchEvent::Error { error } => {
                self.in_flight = false;
                Applied::Aborted {
                    error: error.clone(),
                }
            }
        }
    }

    fn apply_result(&mut self, result: &ItemResult) -> Applied {
        let index = result.index;
        if !self.submitted.contains(&index) {
            return Applied::Ignored { index };
        }

        match &result.outcome {
            ItemOutcome::Succeeded(asset) => {
                self.failures.remove(&index);
                self.successes.insert(index, asset.clone());
                Applied::Succeeded {
                    index,
                    asset: asset.clone(),
                }
            }
            ItemOutcome::Failed(error) => {
                self.successes.remove(&index);
                let original_text = self
                    .originals
                    .get(&index)
                    .cloned()
                    .unwrap_or_else(|| result.prompt.clone());
                let supplemental_text = self
                    .failures
                    .get(&index)
                    .map(|f| f.supplemental_text.clone())
                    .unwrap_or_default();
                self.failures.insert(
                    index,
                    FailedPrompt {
                        original_text,
                        supplemental_text,
                    },
                );
                Applied::Failed {
                    index,
                    error: error.clone(),
                }
            }
        }
    }

    // ---- user edits ----

    /// Set the supplemental instructions for a failed index.
    pub fn set_supplemental(
        &mut self,
        index: ItemIndex,
        text: impl Into<String>,
    ) -> Result<(), CoreError> {
        let entry = self.failures.get_mut(&index).ok_or(CoreError::NotFound {
            entity: "FailedPrompt",
            id: index.to_string(),
        })?;
        entry.supplemental_text = text.into();
        Ok(())
    }

    // ---- derived requests ----

    /// Build the retry request for `indices`, in the given order.
    ///
    /// Failed indices resubmit their original text plus supplemental text;
    /// any other submitted index resubmits its original text.
    pub fn retry_request(&self, indices: &[ItemIndex]) -> Result<BatchRequest, CoreError> {
        if indices.is_empty() {
            return Err(CoreError::Validation("No indices to retry".to_string()));
        }
        let prompts = indices
            .iter()
            .map(|index| {
                if let Some(failed) = self.failures.get(index) {
                    Ok(failed.retry_text())
                } else {
                    self.originals.get(index).cloned().ok_or(CoreError::NotFound {
                        entity: "Prompt",
                        id: index.to_string(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BatchRequest::retry(prompts, indices.to_vec()))
    }

    /// Retry request for every failed index, ascending.
    pub fn retry_all_request(&self) -> Option<BatchRequest> {
        let indices: Vec<_> = self.failures.keys().copied().collect();
        self.retry_request(&indices).ok()
    }

    /// Successful assets ordered by originating index.
    pub fn compose_sources(&self) -> Vec<AssetRef> {
        self.successes.values().cloned().collect()
    }

    // ---- read access ----

    pub fn controls(&self) -> BatchControls {
        BatchControls {
            generate: !self.in_flight,
            retry_all: !self.in_flight && !self.failures.is_empty(),
            compose: !self.in_flight && !self.successes.is_empty() && self.failures.is_empty(),
        }
    }

    pub fn successes(&self) -> &BTreeMap<ItemIndex, AssetRef> {
        &self.successes
    }

    pub fn failures(&self) -> &BTreeMap<ItemIndex, FailedPrompt> {
        &self.failures
    }

    pub fn original_text(&self, index: ItemIndex) -> Option<&str> {
        self.originals.get(&index).map(String::as_str)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn snapshot(&self) -> ReconciliationSnapshot {
        ReconciliationSnapshot {
            successes: self.successes.clone(),
            failures: self.failures.clone(),
            in_flight: self.in_flight,
            controls: self.controls(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn asset(index: ItemIndex) -> AssetRef {
        AssetRef::remote(format!("https://cdn/{index}.png"))
    }

    fn ok(index: ItemIndex, prompt: &str) -> BatchEvent {
        BatchEvent::Result {
            result: ItemResult::succeeded(index, prompt, asset(index)),
        }
    }

    fn fail(index: ItemIndex, prompt: &str) -> BatchEvent {
        BatchEvent::Result {
            result: ItemResult::failed(index, prompt, "Generation failed: nsfw"),
        }
    }

    fn complete() -> BatchEvent {
        BatchEvent::Complete { results: vec![] }
    }

    fn abc() -> Vec<PromptItem> {
        vec![
            PromptItem::new(0, "A"),
            PromptItem::new(1, "B"),
            PromptItem::new(2, "C"),
        ]
    }

    /// A/B/C with index 1 failing, then index 1 retried successfully.
    #[test]
    fn failed_item_retried_with_supplemental_text() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        state.apply(&ok(0, "A"));
        state.apply(&fail(1, "B"));
        state.apply(&ok(2, "C"));
        assert_matches!(state.apply(&complete()), Applied::Finished(controls) => {
            assert!(controls.retry_all);
            assert!(!controls.compose);
        });

        assert_eq!(state.successes().keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(
            state.failures().get(&1),
            Some(&FailedPrompt {
                original_text: "B".into(),
                supplemental_text: String::new(),
            })
        );

        state.set_supplemental(1, "make it blue").unwrap();
        let request = state.retry_request(&[1]).unwrap();
        assert_eq!(request, BatchRequest::retry(vec!["B make it blue".into()], vec![1]));

        state.begin_retry(&[1]).unwrap();
        state.apply(&ok(1, "B make it blue"));
        state.apply(&complete());

        assert_eq!(state.successes().keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(state.failures().is_empty());
        assert!(state.controls().compose);
    }

    #[test]
    fn replaying_a_result_is_idempotent() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        state.apply(&fail(1, "B"));
        state.apply(&ok(1, "B"));
        let once = state.snapshot();

        state.apply(&ok(1, "B"));
        assert_eq!(state.snapshot(), once);
        assert!(!state.failures().contains_key(&1));
    }

    #[test]
    fn failure_preserves_typed_supplemental_text() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        state.apply(&fail(1, "B"));
        state.apply(&complete());
        state.set_supplemental(1, "more contrast").unwrap();

        state.begin_retry(&[1]).unwrap();
        state.apply(&fail(1, "B more contrast"));

        let entry = &state.failures()[&1];
        assert_eq!(entry.original_text, "B");
        assert_eq!(entry.supplemental_text, "more contrast");
        assert_eq!(entry.retry_text(), "B more contrast");
    }

    #[test]
    fn failed_retry_evicts_previous_success() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        for event in [ok(0, "A"), ok(1, "B"), ok(2, "C"), complete()] {
            state.apply(&event);
        }

        let request = state.retry_request(&[2]).unwrap();
        assert_eq!(request.prompts, vec!["C".to_string()]);

        state.begin_retry(&[2]).unwrap();
        state.apply(&fail(2, "C"));
        state.apply(&complete());

        assert!(!state.successes().contains_key(&2));
        assert!(state.failures().contains_key(&2));
        for index in state.successes().keys() {
            assert!(!state.failures().contains_key(index));
        }
    }

    #[test]
    fn results_for_unknown_indices_are_ignored() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        assert_eq!(state.apply(&ok(7, "?")), Applied::Ignored { index: 7 });
        assert!(state.successes().is_empty());
    }

    #[test]
    fn concurrent_batches_are_refused() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        assert_matches!(state.begin_retry(&[0]), Err(CoreError::Conflict(_)));
        assert_matches!(state.begin_fresh(&abc()), Err(CoreError::Conflict(_)));
        assert!(!state.controls().generate);

        state.apply(&BatchEvent::error("stream failed"));
        assert!(state.controls().generate);
        state.begin_retry(&[0]).unwrap();
    }

    #[test]
    fn retry_of_never_submitted_index_is_rejected() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        state.apply(&complete());
        assert_matches!(state.begin_retry(&[5]), Err(CoreError::Validation(_)));
        assert_matches!(state.retry_request(&[5]), Err(CoreError::NotFound { .. }));
    }

    #[test]
    fn fresh_batch_clears_previous_maps() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        state.apply(&ok(0, "A"));
        state.apply(&fail(1, "B"));
        state.apply(&complete());

        state.begin_fresh(&[PromptItem::new(0, "Z")]).unwrap();
        assert!(state.successes().is_empty());
        assert!(state.failures().is_empty());
        assert_eq!(state.original_text(0), Some("Z"));
        assert_eq!(state.original_text(1), None);
    }

    #[test]
    fn compose_sources_follow_index_not_arrival_order() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        state.apply(&fail(0, "A"));
        state.apply(&ok(1, "B"));
        state.apply(&fail(2, "C"));
        state.apply(&complete());

        // Retry finishes index 2 before index 0.
        state.begin_retry(&[2, 0]).unwrap();
        state.apply(&ok(2, "C"));
        state.apply(&ok(0, "A"));
        state.apply(&complete());

        let urls: Vec<_> = state.compose_sources().into_iter().map(|a| a.remote_url).collect();
        assert_eq!(urls, vec!["https://cdn/0.png", "https://cdn/1.png", "https://cdn/2.png"]);
    }

    #[test]
    fn retry_all_targets_every_failed_index() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        state.apply(&fail(2, "C"));
        state.apply(&ok(1, "B"));
        state.apply(&fail(0, "A"));
        state.apply(&complete());

        let request = state.retry_all_request().unwrap();
        assert_eq!(request.indices, Some(vec![0, 2]));
        assert_eq!(request.prompts, vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn supplemental_edit_requires_a_failure_entry() {
        let mut state = ReconciliationState::new();
        state.begin_fresh(&abc()).unwrap();
        assert_matches!(
            state.set_supplemental(0, "x"),
            Err(CoreError::NotFound { entity: "FailedPrompt", .. })
        );
    }
}
