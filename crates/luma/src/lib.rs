//! External job client for the Luma Dream Machine generation API.
//!
//! [`client::JobClient`] is the uniform create/poll/fetch contract the
//! pipeline drives; [`api::LumaApi`] implements it over the Luma REST
//! endpoints using [`reqwest`]. Wire types live in [`messages`].
//!
//! The adapter never retries. Transport problems come back as
//! [`client::JobClientError`]; a failure reported by the service is a
//! regular [`client::RemoteStatus::Error`] value.

pub mod api;
pub mod client;
pub mod messages;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
