//! Telemetry and health
//!
//! [`Telemetry`] is the single sink components report into: it owns the
//! rolling metrics and error history, and is the only place engine events
//! are emitted from. Every error reaching the host goes through
//! [`Error::classify`] first.

pub mod health;
pub mod metrics;

pub use health::{HealthIssue, HealthReport, QueueReport, ReportInputs};
pub use metrics::{ErrorRecord, Metrics, MetricsSnapshot};

use crate::error::{Error, UserFacingError};
use lsap_common::events::{EngineEvent, EventBus, QualityBand};
use metrics::ErrorHistory;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Metrics, error history and event emission
pub struct Telemetry {
    events: Arc<EventBus>,
    metrics: Mutex<Metrics>,
    errors: Mutex<ErrorHistory>,
    memory_pressure: AtomicBool,
}

impl Telemetry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            metrics: Mutex::new(Metrics::new()),
            errors: Mutex::new(ErrorHistory::new()),
            memory_pressure: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn record_arrival(&self, at: Instant) {
        self.metrics.lock().record_arrival(at);
    }

    pub fn record_decode_time(&self, elapsed: Duration) {
        self.metrics.lock().record_decode_time(elapsed);
    }

    pub fn record_queue_size(&self, size: usize) {
        self.metrics.lock().record_queue_size(size);
    }

    pub fn record_processed(&self) {
        self.metrics.lock().record_processed();
    }

    pub fn record_dropped(&self) {
        self.metrics.lock().record_dropped();
    }

    /// Set or clear the external memory-pressure signal
    pub fn set_memory_pressure(&self, active: bool) {
        let previous = self.memory_pressure.swap(active, Ordering::SeqCst);
        if previous != active {
            info!("External memory pressure {}", if active { "raised" } else { "cleared" });
        }
    }

    pub fn memory_pressure(&self) -> bool {
        self.memory_pressure.load(Ordering::SeqCst)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.lock().snapshot()
    }

    pub fn average_latency_ms(&self) -> f64 {
        self.metrics.lock().average_latency_ms()
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().recent()
    }

    /// Classify an error, record it, and emit an `Error` event.
    ///
    /// The raw error is logged; only the classified form leaves the engine.
    pub fn report_error(&self, operation: &str, error: &Error) -> UserFacingError {
        warn!("{} failed: {}", operation, error);
        let classified = error.classify();
        self.emit_error(operation, &classified);
        classified
    }

    /// Record and emit an already classified error
    pub fn emit_error(&self, operation: &str, classified: &UserFacingError) {
        self.errors
            .lock()
            .push(operation, &classified.message, classified.recoverable);
        self.events.emit_lossy(EngineEvent::Error {
            operation: operation.to_string(),
            message: classified.message.clone(),
            suggestion: classified.suggestion.clone(),
            recoverable: classified.recoverable,
            timestamp: lsap_common::time::now(),
        });
    }

    pub fn report_recovery(&self, operation: &str, message: impl Into<String>) {
        let message = message.into();
        info!("✅ {}: {}", operation, message);
        self.events.emit_lossy(EngineEvent::Recovery {
            operation: operation.to_string(),
            message,
            timestamp: lsap_common::time::now(),
        });
    }

    pub fn report_activation_required(&self, operation: &str) {
        warn!("{} blocked: output device requires activation", operation);
        self.events.emit_lossy(EngineEvent::ActivationRequired {
            operation: operation.to_string(),
            message: "Audio output is suspended and needs to be activated".to_string(),
            timestamp: lsap_common::time::now(),
        });
    }

    pub fn report_quality_change(&self, status: QualityBand) {
        info!("Stream quality changed to {}", status);
        self.events.emit_lossy(EngineEvent::QualityChange { status });
    }
}
