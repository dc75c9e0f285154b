//! Gapless scheduler
//!
//! Pulls decoded buffers from the queue and places them back-to-back on the
//! output device clock. `next_playback_time` is the device time at which the
//! previously scheduled buffer ends; each new buffer starts at
//! `max(now, next_playback_time)`, so consecutive buffers neither overlap nor
//! leave a gap unless the queue ran dry.
//!
//! The poll interval adapts to queue occupancy: 25ms when nearly full,
//! 100ms when nearly empty, 50ms otherwise.

use crate::audio::output::{DeviceState, OutputDevice};
use crate::audio::types::DecodedBuffer;
use crate::error::{ContextError, Error, PlaybackError, Result};
use crate::playback::activation::ActivationGate;
use crate::playback::buffer_pool::BufferPool;
use crate::playback::queue::SharedQueue;
use crate::playback::recovery::RecoveryManager;
use crate::telemetry::Telemetry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Poll interval when the queue is more than 80% full
pub const FAST_POLL: Duration = Duration::from_millis(25);

/// Poll interval between 20% and 80%
pub const NORMAL_POLL: Duration = Duration::from_millis(50);

/// Poll interval when the queue is less than 20% full
pub const SLOW_POLL: Duration = Duration::from_millis(100);

/// Grace added to a buffer's duration before playback is declared hung
pub const PLAYBACK_GRACE: Duration = Duration::from_secs(1);

/// Linear backoff unit between playback scheduling attempts
pub const PLAYBACK_BACKOFF: Duration = Duration::from_millis(500);

/// Poll interval for a queue fill ratio
pub fn poll_interval(occupancy: f64) -> Duration {
    if occupancy > 0.8 {
        FAST_POLL
    } else if occupancy < 0.2 {
        SLOW_POLL
    } else {
        NORMAL_POLL
    }
}

/// A buffer scheduled against the output clock
pub struct PlaybackHandle {
    pub id: Uuid,
    pub sequence: u64,
    pub start_time: f64,
    pub duration: f64,
    buffer: Arc<DecodedBuffer>,
    watcher: Option<JoinHandle<()>>,
}

/// What a scheduler tick placed on the clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub id: Uuid,
    pub sequence: u64,
    pub start_time: f64,
    pub duration: f64,
}

/// Everything a tick reads and writes, kept under one lock so that a tick
/// and `stop_streaming` never interleave
#[derive(Default)]
struct SchedulerState {
    streaming: bool,
    next_playback_time: Option<f64>,
    active: HashMap<Uuid, PlaybackHandle>,
}

type SharedState = Arc<Mutex<SchedulerState>>;

pub struct Scheduler {
    device: Arc<dyn OutputDevice>,
    queue: SharedQueue,
    pool: Arc<BufferPool>,
    gate: Arc<ActivationGate>,
    recovery: Arc<RecoveryManager>,
    telemetry: Arc<Telemetry>,
    state: SharedState,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        queue: SharedQueue,
        pool: Arc<BufferPool>,
        gate: Arc<ActivationGate>,
        recovery: Arc<RecoveryManager>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            device: Arc::clone(gate.device()),
            queue,
            pool,
            gate,
            recovery,
            telemetry,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            loop_task: Mutex::new(None),
        }
    }

    /// Anchor the schedule at the current device time and start polling.
    ///
    /// Calling again while streaming does nothing.
    pub fn start_streaming(self: &Arc<Self>) {
        let mut task = self.loop_task.lock();
        let now = {
            let mut state = self.state.lock();
            if state.streaming {
                debug!("Streaming already running");
                return;
            }
            let now = self.device.current_time();
            state.streaming = true;
            state.next_playback_time = Some(now);
            now
        };

        let scheduler = Arc::downgrade(self);
        *task = Some(tokio::spawn(async move {
            loop {
                let interval = match scheduler.upgrade() {
                    Some(scheduler) => {
                        scheduler.schedule_next(true);
                        poll_interval(scheduler.queue.lock().occupancy())
                    }
                    None => break,
                };
                tokio::time::sleep(interval).await;
            }
        }));

        info!("▶️ Streaming started at device time {:.3}s", now);
    }

    /// Stop polling, cancel every active playback, clear the queue.
    ///
    /// A tick already in progress finishes first and its playback is
    /// cancelled with the rest. Safe to call repeatedly.
    pub fn stop_streaming(&self) {
        if let Some(task) = self.loop_task.lock().take() {
            task.abort();
        }

        let cancelled = {
            let mut state = self.state.lock();
            state.streaming = false;
            state.next_playback_time = None;
            let handles: Vec<PlaybackHandle> = state.active.drain().map(|(_, h)| h).collect();
            let cancelled = handles.len();
            for handle in handles {
                self.device.stop(handle.id);
                if let Some(watcher) = handle.watcher {
                    watcher.abort();
                }
                recycle(&self.pool, handle.buffer);
            }
            cancelled
        };

        self.queue.lock().clear();

        if cancelled > 0 {
            info!("⏹️ Streaming stopped ({} active playbacks cancelled)", cancelled);
        } else {
            debug!("Streaming stopped");
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Device time at which the last scheduled buffer ends
    pub fn next_playback_time(&self) -> Option<f64> {
        self.state.lock().next_playback_time
    }

    /// Number of buffers scheduled or playing
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// One scheduling step: place at most one queued buffer on the clock.
    ///
    /// Does nothing while the device is not active; buffers stay queued.
    pub fn tick(&self) -> Option<ScheduledPlayback> {
        self.schedule_next(false)
    }

    /// Dequeue, schedule and record one buffer under the state lock.
    ///
    /// With `require_streaming` the step is skipped once streaming stopped.
    fn schedule_next(&self, require_streaming: bool) -> Option<ScheduledPlayback> {
        let size = self.queue.lock().size();
        self.telemetry.record_queue_size(size);

        let mut state = self.state.lock();
        if require_streaming && !state.streaming {
            return None;
        }
        if self.device.state() != DeviceState::Active {
            return None;
        }

        let buffer = self.queue.lock().dequeue()?;
        let now = self.device.current_time();
        let start_time = state.next_playback_time.map_or(now, |next| next.max(now));

        let buffer = Arc::new(buffer);
        let id = Uuid::new_v4();
        let receiver = match self.device.schedule(id, Arc::clone(&buffer), start_time) {
            Ok(receiver) => receiver,
            Err(e) => {
                drop(state);
                let error = Error::from(e);
                if error.counts_as_failure() {
                    self.recovery.record_failure("playback");
                }
                self.telemetry.report_error("playback", &error);
                recycle(&self.pool, buffer);
                return None;
            }
        };

        let scheduled = ScheduledPlayback {
            id,
            sequence: buffer.sequence,
            start_time,
            duration: buffer.duration,
        };
        state.next_playback_time = Some(start_time + buffer.duration);

        let shared = Arc::clone(&self.state);
        let pool = Arc::clone(&self.pool);
        let recovery = Arc::clone(&self.recovery);
        let watcher = tokio::spawn(async move {
            // Err means the voice was stopped; stop_streaming owns cleanup then
            if receiver.await.is_ok() {
                let handle = shared.lock().active.remove(&id);
                if let Some(handle) = handle {
                    recycle(&pool, handle.buffer);
                }
                recovery.record_success("playback");
            }
        });

        state.active.insert(
            id,
            PlaybackHandle {
                id,
                sequence: buffer.sequence,
                start_time,
                duration: buffer.duration,
                buffer,
                watcher: Some(watcher),
            },
        );
        drop(state);

        debug!(
            "Scheduled buffer #{} at {:.3}s for {:.3}s (now {:.3}s)",
            scheduled.sequence, start_time, scheduled.duration, now
        );
        Some(scheduled)
    }

    /// Play one buffer immediately, outside the streaming loop, and wait for
    /// it to finish.
    pub async fn play_buffer(&self, buffer: DecodedBuffer) -> Result<()> {
        if let Err(e) = self.gate.ensure_active("playback").await {
            recycle(&self.pool, Arc::new(buffer));
            let error = Error::from(e);
            if !matches!(error, Error::Context(ContextError::ActivationRequired)) {
                self.telemetry.report_error("playback", &error);
            }
            return Err(error);
        }

        let buffer = Arc::new(buffer);
        let mut attempt = 0u32;
        let (id, receiver) = loop {
            attempt += 1;
            let id = Uuid::new_v4();
            let scheduled = {
                let mut state = self.state.lock();
                let now = self.device.current_time();
                self.device
                    .schedule(id, Arc::clone(&buffer), now)
                    .map(|receiver| {
                        state.active.insert(
                            id,
                            PlaybackHandle {
                                id,
                                sequence: buffer.sequence,
                                start_time: now,
                                duration: buffer.duration,
                                buffer: Arc::clone(&buffer),
                                watcher: None,
                            },
                        );
                        receiver
                    })
            };
            match scheduled {
                Ok(receiver) => break (id, receiver),
                Err(e) => {
                    let error = Error::from(e);
                    if !error.counts_as_failure() {
                        recycle(&self.pool, buffer);
                        return Err(error);
                    }
                    self.recovery.record_failure("playback");
                    if attempt >= self.recovery.limits().playback_attempts {
                        self.telemetry.report_error("playback", &error);
                        recycle(&self.pool, buffer);
                        return Err(error);
                    }
                    warn!("Playback attempt {} failed: {}, retrying", attempt, error);
                    tokio::time::sleep(PLAYBACK_BACKOFF * attempt).await;
                }
            }
        };

        let timeout = Duration::from_secs_f64(buffer.duration) + PLAYBACK_GRACE;
        let outcome = tokio::time::timeout(timeout, receiver).await;
        let handle = self.state.lock().active.remove(&id);
        drop(handle);

        let result: Result<()> = match outcome {
            Ok(Ok(())) => {
                self.recovery.record_success("playback");
                Ok(())
            }
            Ok(Err(_)) => {
                debug!("Playback of buffer #{} cancelled", buffer.sequence);
                Err(PlaybackError::Cancelled.into())
            }
            Err(_) => {
                self.device.stop(id);
                Err(PlaybackError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        };

        if let Err(error) = &result {
            if error.counts_as_failure() {
                self.recovery.record_failure("playback");
                self.telemetry.report_error("playback", error);
            }
        }

        recycle(&self.pool, buffer);
        result
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(task) = self.loop_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Return storage to the pool if nobody else still references it
fn recycle(pool: &BufferPool, buffer: Arc<DecodedBuffer>) {
    if let Ok(buffer) = Arc::try_unwrap(buffer) {
        pool.release_buffer(buffer);
    }
}
