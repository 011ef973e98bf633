//! Server-side job orchestration.
//!
//! - [`poller`] - drives one remote job to a terminal outcome.
//! - [`coordinator`] - serial batch processing with streamed events.
//! - [`compose`] - compose jobs tracked behind pollable handles.
//! - [`storage`] - local copies of finished assets.

pub mod compose;
pub mod coordinator;
pub mod poller;
pub mod storage;

pub use compose::{ComposeError, ComposeOrchestrator};
pub use coordinator::{BatchCoordinator, BatchError, PreparedBatch};
pub use poller::{JobFailure, PollPolicy, Poller};
pub use storage::{ArtifactStore, LocalArtifactStore, StorageError};
