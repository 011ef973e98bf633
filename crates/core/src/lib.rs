//! Domain types shared by the promptreel server and client.
//!
//! Nothing in this crate performs I/O. The pipeline crate drives these
//! types server-side; the client crate drives [`reconcile`] from the
//! streamed events.

pub mod batch;
pub mod compose;
pub mod error;
pub mod event;
pub mod job;
pub mod prompt;
pub mod reconcile;
pub mod types;
