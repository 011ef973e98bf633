//! Ordered per-batch event channel backed by `tokio::sync::mpsc`.
//!
//! The batch coordinator holds the [`EventEmitter`]; the HTTP layer turns
//! the [`EventStream`] into the response body. There is exactly one reader
//! per batch, and events arrive in the order they were emitted.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use promptreel_core::event::BatchEvent;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default buffer capacity of a batch event channel.
///
/// When the buffer is full, [`EventEmitter::emit`] waits for the reader
/// instead of dropping events.
pub const DEFAULT_CAPACITY: usize = 64;

/// The reader of a batch's events has gone away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Event stream closed by the reader")]
pub struct StreamClosed;

/// Sending half of a batch event channel.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: mpsc::Sender<BatchEvent>,
}

impl EventEmitter {
    /// Create a connected emitter/stream pair.
    pub fn channel(capacity: usize) -> (EventEmitter, EventStream) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            EventEmitter { sender },
            EventStream {
                inner: ReceiverStream::new(receiver),
            },
        )
    }

    /// Queue `event` behind every previously emitted event.
    ///
    /// Fails with [`StreamClosed`] once the reader has been dropped.
    pub async fn emit(&self, event: BatchEvent) -> Result<(), StreamClosed> {
        self.sender.send(event).await.map_err(|_| StreamClosed)
    }

    /// Whether the reader has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half of a batch event channel.
///
/// Ends after the last [`EventEmitter`] clone is dropped and every queued
/// event has been yielded.
#[derive(Debug)]
pub struct EventStream {
    inner: ReceiverStream<BatchEvent>,
}

impl Stream for EventStream {
    type Item = BatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
