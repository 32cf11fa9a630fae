//! Lifecycle events emitted by persistence engines.
//!
//! Every engine owns a broadcast channel; [`Persist::watch`] hands out a
//! [`WatchStream`] of what happened to its storage entry.
//!
//! [`Persist::watch`]: crate::persist::Persist::watch

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use crate::error::ErrorKind;

/// What happened to a persisted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// A hydration attempt finished (the store may or may not have changed).
    Hydrated,
    /// State was written to storage.
    Written,
    /// The storage entry was removed.
    Cleared,
    /// A failure was reported through `on_error`.
    Failed(ErrorKind),
}

/// An event for one engine's storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistEvent {
    /// The storage key.
    pub key: String,
    /// What happened.
    pub event_type: EventType,
}

impl PersistEvent {
    /// Create a new Hydrated event.
    pub fn hydrated(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Hydrated,
        }
    }

    /// Create a new Written event.
    pub fn written(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Written,
        }
    }

    /// Create a new Cleared event.
    pub fn cleared(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Cleared,
        }
    }

    /// Create a new Failed event.
    pub fn failed(key: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Failed(kind),
        }
    }
}

/// A stream of persistence events.
///
/// Events missed because the receiver lagged behind are skipped.
pub struct WatchStream {
    inner: BroadcastStream<PersistEvent>,
}

impl WatchStream {
    /// Create a new watch stream from a broadcast receiver.
    pub fn new(receiver: broadcast::Receiver<PersistEvent>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
        }
    }
}

impl Stream for WatchStream {
    type Item = PersistEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                // Lagged: skip what was missed and keep reading
                Poll::Ready(Some(Err(_))) => continue,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Handle for sending persistence events to watchers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<PersistEvent>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all watchers.
    pub fn send(&self, event: PersistEvent) {
        // No watchers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> WatchStream {
        WatchStream::new(self.sender.subscribe())
    }

    /// Get the number of current watchers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(256)
    }
}
