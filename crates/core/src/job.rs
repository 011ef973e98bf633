//! Per-index job lifecycle records and the batch lifecycle table.
//!
//! A [`JobRecord`] moves monotonically along
//! `Pending -> Polling -> {Succeeded | Failed}`. A record may also fail
//! straight from `Pending` when the create call itself is rejected.
//! Terminal records never change again; illegal transitions are reported
//! as [`CoreError::InvalidTransition`] and leave the record untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::CoreError;
use crate::types::{AssetRef, ItemIndex, Timestamp};

// ---------------------------------------------------------------------------
// Kinds and states
// ---------------------------------------------------------------------------

/// The two kinds of external job the orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Text prompt to still image.
    Image,
    /// One or more completed assets to a derived clip.
    Compose,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Image => f.write_str("image"),
            JobKind::Compose => f.write_str("compose"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Polling,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Polling => "polling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Lifecycle of one submission (fresh or retry) for one index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    /// Remote job id, known once the create call succeeded.
    pub id: Option<String>,
    pub index: ItemIndex,
    pub kind: JobKind,
    pub state: JobState,
    /// Number of status polls issued while `Polling`.
    pub attempts: u32,
    pub result: Option<AssetRef>,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl JobRecord {
    pub fn new(index: ItemIndex, kind: JobKind) -> Self {
        Self {
            id: None,
            index,
            kind,
            state: JobState::Pending,
            attempts: 0,
            result: None,
            failure_reason: None,
            created_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    /// `Pending -> Polling`, recording the remote job id.
    pub fn start_polling(&mut self, job_id: impl Into<String>) -> Result<(), CoreError> {
        self.guard(JobState::Pending, JobState::Polling)?;
        self.id = Some(job_id.into());
        self.state = JobState::Polling;
        Ok(())
    }

    /// Count one status poll. Returns the new attempt number.
    pub fn record_attempt(&mut self) -> Result<u32, CoreError> {
        self.guard(JobState::Polling, JobState::Polling)?;
        self.attempts += 1;
        Ok(self.attempts)
    }

    /// `Polling -> Succeeded`.
    pub fn succeed(&mut self, asset: AssetRef) -> Result<(), CoreError> {
        self.guard(JobState::Polling, JobState::Succeeded)?;
        self.state = JobState::Succeeded;
        self.result = Some(asset);
        self.finished_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// `Pending | Polling -> Failed`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        if self.state.is_terminal() {
            return Err(self.invalid(JobState::Failed));
        }
        self.state = JobState::Failed;
        self.failure_reason = Some(reason.into());
        self.finished_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn guard(&self, expected: JobState, to: JobState) -> Result<(), CoreError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    fn invalid(&self, to: JobState) -> CoreError {
        CoreError::InvalidTransition {
            index: self.index,
            from: self.state,
            to,
        }
    }
}

// ---------------------------------------------------------------------------
// LifecycleTable
// ---------------------------------------------------------------------------

/// Index -> current [`JobRecord`] for one batch and its retries.
///
/// Holds at most one record per index. A retry's record replaces the
/// earlier one; the earlier record is returned to the caller and dropped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleTable {
    records: BTreeMap<ItemIndex, JobRecord>,
}

impl LifecycleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every record (start of a fresh batch).
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Install `record` as the active record for its index, returning the
    /// record it superseded.
    pub fn replace(&mut self, record: JobRecord) -> Option<JobRecord> {
        self.records.insert(record.index, record)
    }

    pub fn get(&self, index: ItemIndex) -> Option<&JobRecord> {
        self.records.get(&index)
    }

    pub fn get_mut(&mut self, index: ItemIndex) -> Option<&mut JobRecord> {
        self.records.get_mut(&index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.values()
    }

    /// Assets of every succeeded record, ascending by index.
    pub fn succeeded_assets(&self) -> Vec<(ItemIndex, AssetRef)> {
        self.records
            .values()
            .filter_map(|r| match (&r.state, &r.result) {
                (JobState::Succeeded, Some(asset)) => Some((r.index, asset.clone())),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
