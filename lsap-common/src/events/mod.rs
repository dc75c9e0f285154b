//! Event types for the LSAP event system
//!
//! Provides the engine → host event definitions and the EventBus.
//!
//! The engine reports to its host through exactly four event kinds:
//! - `Error`: a classified, user-facing failure with an actionable suggestion
//! - `Recovery`: an operation that had been failing succeeded again
//! - `QualityChange`: the stream quality band changed
//! - `ActivationRequired`: the output device needs an external activation
//!   signal before playback can proceed

mod health_types;

pub use health_types::{HealthState, HealthStatus, QualityBand};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Engine events delivered to the host/UI collaborator
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// to a UI process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// An operation failed in a way the host should know about
    Error {
        /// Operation that failed (e.g. "decode", "playback", "recovery")
        operation: String,
        /// Short classified message, never a raw internal error
        message: String,
        /// Actionable suggestion for the user
        suggestion: String,
        /// Whether the engine expects to continue on its own
        recoverable: bool,
        /// When the failure was observed
        timestamp: DateTime<Utc>,
    },

    /// An operation recovered after one or more failures
    Recovery {
        /// Operation that recovered
        operation: String,
        /// Description of the recovery
        message: String,
        /// When recovery was observed
        timestamp: DateTime<Utc>,
    },

    /// Stream quality band changed
    QualityChange {
        /// New quality band
        status: QualityBand,
    },

    /// Output device requires external activation (e.g. a user gesture)
    ActivationRequired {
        /// Operation that was blocked
        operation: String,
        /// Description for the UI
        message: String,
        /// When the block was observed
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::Error { .. } => "Error",
            EngineEvent::Recovery { .. } => "Recovery",
            EngineEvent::QualityChange { .. } => "QualityChange",
            EngineEvent::ActivationRequired { .. } => "ActivationRequired",
        }
    }
}

/// Central event bus for engine → host notification
///
/// Thin wrapper over a tokio broadcast channel. Slow subscribers lag and lose
/// the oldest events rather than blocking the engine.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers lag
    ///
    /// # Examples
    ///
    /// ```
    /// use lsap_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
