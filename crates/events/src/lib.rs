//! Batch event delivery.
//!
//! - [`EventEmitter`] / [`EventStream`] - ordered single-reader channel
//!   between the batch coordinator and the HTTP response.
//! - [`SseDecoder`] - incremental decoder for the `data: {json}` frames a
//!   reader receives over the wire.

pub mod emitter;
pub mod sse;

pub use emitter::{EventEmitter, EventStream, StreamClosed, DEFAULT_CAPACITY};
pub use sse::{DecodeError, SseDecoder};
