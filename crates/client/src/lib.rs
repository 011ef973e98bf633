//! Client for the promptreel server.
//!
//! - [`http::ApiClient`] - typed access to the generation endpoints,
//!   including the streamed batch response.
//! - [`session::BatchSession`] - applies streamed events to the
//!   reconciliation state and builds retry and compose requests from it.

pub mod http;
pub mod session;

pub use http::{ApiClient, BatchEvents, ClientError};
pub use session::{ActionOutcome, BatchReport, BatchSession, ItemAction};
