//! Event types for the FDC event system
//!
//! The host environment (connectivity monitor, app shell) and the capture
//! engine talk through one broadcast [`EventBus`]. Nothing in the engine
//! depends on a UI being attached: a background-sync request is just another
//! event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Tag the app shell uses to request a drain without a foreground UI
pub const BACKGROUND_SYNC_TAG: &str = "sync-encuestas";

/// FDC event types
///
/// Events are broadcast via EventBus and can be serialized for logging or
/// forwarding to a UI process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FdcEvent {
    /// Host reports network connectivity restored
    ///
    /// Triggers:
    /// - Sync Engine: drain the offline queue
    NetworkOnline { timestamp: DateTime<Utc> },

    /// Host reports network connectivity lost
    ///
    /// Triggers:
    /// - Capture session: skip the direct send and queue immediately
    NetworkOffline { timestamp: DateTime<Utc> },

    /// App shell background-sync hook fired
    ///
    /// Only [`BACKGROUND_SYNC_TAG`] triggers a drain; other tags belong to
    /// other features of the shell.
    BackgroundSync {
        tag: String,
        timestamp: DateTime<Utc>,
    },

    /// A response was inserted remotely on the direct-send path
    SubmissionSent { timestamp: DateTime<Utc> },

    /// A response was stored in the offline queue
    SubmissionQueued {
        /// Queue size after the save
        pending: usize,
        timestamp: DateTime<Utc>,
    },

    /// One drain finished
    SyncCompleted {
        synced: usize,
        failed: usize,
        /// True queue size after the drain
        pending: usize,
        timestamp: DateTime<Utc>,
    },
}

impl FdcEvent {
    pub fn network_online() -> Self {
        FdcEvent::NetworkOnline { timestamp: Utc::now() }
    }

    pub fn network_offline() -> Self {
        FdcEvent::NetworkOffline { timestamp: Utc::now() }
    }

    pub fn background_sync(tag: impl Into<String>) -> Self {
        FdcEvent::BackgroundSync {
            tag: tag.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this event should start a drain
    pub fn requests_drain(&self) -> bool {
        match self {
            FdcEvent::NetworkOnline { .. } => true,
            FdcEvent::BackgroundSync { tag, .. } => tag == BACKGROUND_SYNC_TAG,
            _ => false,
        }
    }
}

/// Event bus for broadcasting events to multiple subscribers
///
/// Thin wrapper over `tokio::sync::broadcast`. Slow subscribers lose the
/// oldest events (`RecvError::Lagged`) instead of blocking emitters.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FdcEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use fdc_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(64);
    /// assert_eq!(event_bus.capacity(), 64);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<FdcEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: FdcEvent) -> Result<usize, broadcast::error::SendError<FdcEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: FdcEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
