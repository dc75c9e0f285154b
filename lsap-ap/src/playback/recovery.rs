//! Recovery state machine
//!
//! Two states, Normal and Recovery. The decode pipeline and the scheduler
//! feed one shared consecutive-failure counter; once it exceeds
//! [`FAILURE_THRESHOLD`] the engine degrades:
//! - queue max count halved (not below [`RECOVERY_QUEUE_FLOOR`])
//! - max decode time doubled
//! - decode and playback retries cut to a single attempt
//! - emergency queue cleanup
//!
//! Recovery ends automatically after [`RECOVERY_COOLDOWN`]. Any success
//! resets the counter.

use crate::config::EngineConfig;
use crate::error::UserFacingError;
use crate::playback::queue::SharedQueue;
use crate::telemetry::Telemetry;
use lsap_common::events::HealthState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Consecutive failures tolerated before entering Recovery
pub const FAILURE_THRESHOLD: u32 = 10;

/// Time spent in Recovery before returning to Normal
pub const RECOVERY_COOLDOWN: Duration = Duration::from_secs(30);

/// Smallest queue count limit Recovery will impose
pub const RECOVERY_QUEUE_FLOOR: usize = 10;

/// Decode attempts per chunk in Normal
pub const DEFAULT_DECODE_ATTEMPTS: u32 = 3;

/// Playback scheduling attempts per buffer in Normal
pub const DEFAULT_PLAYBACK_ATTEMPTS: u32 = 2;

/// Limits the decode pipeline and scheduler operate under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingLimits {
    pub queue_max_count: usize,
    pub max_decode_time: Duration,
    pub decode_attempts: u32,
    pub playback_attempts: u32,
}

impl OperatingLimits {
    /// Normal-mode limits from configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            queue_max_count: config.queue.max_count,
            max_decode_time: config.decode.max_time(),
            decode_attempts: DEFAULT_DECODE_ATTEMPTS,
            playback_attempts: DEFAULT_PLAYBACK_ATTEMPTS,
        }
    }

    /// Narrowed limits applied in Recovery
    pub fn degraded(&self) -> Self {
        let floor = RECOVERY_QUEUE_FLOOR.min(self.queue_max_count);
        Self {
            queue_max_count: (self.queue_max_count / 2).max(floor),
            max_decode_time: self.max_decode_time * 2,
            decode_attempts: 1,
            playback_attempts: 1,
        }
    }
}

struct RecoveryInner {
    state: HealthState,
    consecutive_failures: u32,
    limits: OperatingLimits,
}

/// Shared failure counter plus the Normal/Recovery state machine
pub struct RecoveryManager {
    inner: Mutex<RecoveryInner>,
    defaults: OperatingLimits,
    cooldown: Duration,
    queue: SharedQueue,
    telemetry: Arc<Telemetry>,
    cooldown_task: Mutex<Option<JoinHandle<()>>>,
}

impl RecoveryManager {
    pub fn new(defaults: OperatingLimits, queue: SharedQueue, telemetry: Arc<Telemetry>) -> Self {
        Self::with_cooldown(defaults, RECOVERY_COOLDOWN, queue, telemetry)
    }

    pub fn with_cooldown(
        defaults: OperatingLimits,
        cooldown: Duration,
        queue: SharedQueue,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            inner: Mutex::new(RecoveryInner {
                state: HealthState::Normal,
                consecutive_failures: 0,
                limits: defaults,
            }),
            defaults,
            cooldown,
            queue,
            telemetry,
            cooldown_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> HealthState {
        self.inner.lock().state
    }

    pub fn is_recovering(&self) -> bool {
        self.state() == HealthState::Recovery
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Limits in effect right now
    pub fn limits(&self) -> OperatingLimits {
        self.inner.lock().limits
    }

    /// Count a failure; enters Recovery once the count exceeds the threshold.
    ///
    /// Returns the updated count.
    pub fn record_failure(self: &Arc<Self>, operation: &str) -> u32 {
        let (count, should_enter) = {
            let mut inner = self.inner.lock();
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            let count = inner.consecutive_failures;
            (count, inner.state == HealthState::Normal && count > FAILURE_THRESHOLD)
        };

        if count > 1 {
            warn!("{} failure ({} consecutive)", operation, count);
        }
        if should_enter {
            self.enter_recovery();
        }
        count
    }

    /// Reset the counter; emits a `Recovery` event if it was nonzero
    pub fn record_success(&self, operation: &str) {
        let previous = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.consecutive_failures, 0)
        };
        if previous > 0 {
            self.telemetry.report_recovery(
                operation,
                format!("{} succeeded after {} consecutive failure(s)", operation, previous),
            );
        }
    }

    /// Switch to Recovery (no-op if already there)
    pub fn enter_recovery(self: &Arc<Self>) {
        let limits = {
            let mut inner = self.inner.lock();
            if inner.state == HealthState::Recovery {
                return;
            }
            inner.state = HealthState::Recovery;
            inner.limits = self.defaults.degraded();
            inner.limits
        };

        let discarded = {
            let mut queue = self.queue.lock();
            queue.set_max_count(limits.queue_max_count);
            queue.emergency_cleanup()
        };

        warn!(
            "⚠️ Entering recovery mode: queue limit {}, max decode time {:?}, {} buffers discarded",
            limits.queue_max_count, limits.max_decode_time, discarded
        );
        self.telemetry.emit_error(
            "recovery",
            &UserFacingError {
                message: "Audio stream is unstable; switched to recovery mode".to_string(),
                suggestion: "Playback continues with reduced buffering; check your network connection"
                    .to_string(),
                recoverable: true,
            },
        );

        let manager = Arc::downgrade(self);
        let cooldown = self.cooldown;
        let task = tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if let Some(manager) = manager.upgrade() {
                manager.exit_recovery();
            }
        });
        if let Some(previous) = self.cooldown_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Return to Normal with default limits (no-op if already Normal)
    pub fn exit_recovery(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == HealthState::Normal {
                return;
            }
            inner.state = HealthState::Normal;
            inner.consecutive_failures = 0;
            inner.limits = self.defaults;
        }
        if let Some(task) = self.cooldown_task.lock().take() {
            // Harmless when called from the cooldown task itself: no await follows
            task.abort();
        }
        self.queue.lock().set_max_count(self.defaults.queue_max_count);
        self.telemetry
            .report_recovery("recovery", "Stream stabilized; normal operation restored");
    }

    /// Teardown: cancel the cooldown and restore Normal silently
    pub fn reset(&self) {
        if let Some(task) = self.cooldown_task.lock().take() {
            task.abort();
        }
        {
            let mut inner = self.inner.lock();
            inner.state = HealthState::Normal;
            inner.consecutive_failures = 0;
            inner.limits = self.defaults;
        }
        self.queue.lock().set_max_count(self.defaults.queue_max_count);
        info!("Recovery state reset");
    }
}

impl Drop for RecoveryManager {
    fn drop(&mut self) {
        if let Some(task) = self.cooldown_task.get_mut().take() {
            task.abort();
        }
    }
}
