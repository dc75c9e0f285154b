//! Test helpers for lsap-ap integration tests
//!
//! Provides reusable test infrastructure:
//! - MockDecoder: scripted decoder (succeed / fail / hang per call)
//! - MockDevice: output device with a manually driven clock
//! - engine builders and buffer factories

#![allow(dead_code)]

use futures::future::BoxFuture;
use lsap_ap::audio::{ChunkDecoder, DecodedAudio, DecodedBuffer, DeviceState, OutputDevice};
use lsap_ap::error::{ContextError, DecodeError, PlaybackError};
use lsap_ap::{EngineConfig, StreamEngine};
use lsap_common::events::EngineEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// What the mock decoder does for one call
#[derive(Debug, Clone)]
pub enum DecodeBehavior {
    /// Produce `frames` frames of a constant signal
    Succeed {
        frames: usize,
        sample_rate: u32,
        channels: u16,
    },
    /// Produce audio after a delay
    Slow {
        delay: Duration,
        frames: usize,
        sample_rate: u32,
    },
    /// Fail immediately
    Fail(DecodeError),
    /// Never complete (forces a timeout)
    Hang,
    /// Produce audio that fails validation
    ZeroSampleRate,
}

impl DecodeBehavior {
    /// Half a second of 48 kHz stereo
    pub fn half_second() -> Self {
        DecodeBehavior::Succeed {
            frames: 24_000,
            sample_rate: 48_000,
            channels: 2,
        }
    }

    pub fn malformed() -> Self {
        DecodeBehavior::Fail(DecodeError::Malformed("bad frame header".to_string()))
    }
}

/// Decoder that follows a script, then falls back to a default behavior
pub struct MockDecoder {
    script: Mutex<VecDeque<DecodeBehavior>>,
    default: DecodeBehavior,
    calls: AtomicUsize,
}

impl MockDecoder {
    pub fn new(default: DecodeBehavior) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(DecodeBehavior::half_second())
    }

    pub fn failing() -> Arc<Self> {
        Self::new(DecodeBehavior::malformed())
    }

    /// Queue behaviors for the next calls
    pub fn push(&self, behaviors: impl IntoIterator<Item = DecodeBehavior>) {
        self.script.lock().extend(behaviors);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fill(mut scratch: Vec<f32>, frames: usize, sample_rate: u32, channels: u16) -> DecodedAudio {
    scratch.clear();
    scratch.resize(frames * channels as usize, 0.1);
    DecodedAudio {
        samples: scratch,
        sample_rate,
        channels,
    }
}

impl ChunkDecoder for MockDecoder {
    fn decode(
        &self,
        _data: Arc<[u8]>,
        scratch: Vec<f32>,
    ) -> BoxFuture<'static, Result<DecodedAudio, DecodeError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        Box::pin(async move {
            match behavior {
                DecodeBehavior::Succeed {
                    frames,
                    sample_rate,
                    channels,
                } => Ok(fill(scratch, frames, sample_rate, channels)),
                DecodeBehavior::Slow {
                    delay,
                    frames,
                    sample_rate,
                } => {
                    tokio::time::sleep(delay).await;
                    Ok(fill(scratch, frames, sample_rate, 1))
                }
                DecodeBehavior::Fail(e) => Err(e),
                DecodeBehavior::Hang => futures::future::pending().await,
                DecodeBehavior::ZeroSampleRate => Ok(DecodedAudio {
                    samples: scratch,
                    sample_rate: 0,
                    channels: 2,
                }),
            }
        })
    }
}

/// One call to `MockDevice::schedule`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledCall {
    pub id: Uuid,
    pub sequence: u64,
    pub start_time: f64,
    pub duration: f64,
    pub sample_rate: u32,
}

struct MockDeviceState {
    time: f64,
    state: DeviceState,
    requires_activation: bool,
    resume_calls: usize,
    schedule_failures: usize,
    scheduled: Vec<ScheduledCall>,
    pending: HashMap<Uuid, oneshot::Sender<()>>,
    stopped: Vec<Uuid>,
    schedule_delay: Duration,
}

/// Output device with a clock the test moves by hand
pub struct MockDevice {
    inner: Mutex<MockDeviceState>,
    sample_rate: u32,
}

impl MockDevice {
    fn with_state(state: DeviceState, requires_activation: bool) -> Arc<Self> {
        Self::build(state, requires_activation, 48_000)
    }

    fn build(state: DeviceState, requires_activation: bool, sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            inner: Mutex::new(MockDeviceState {
                time: 0.0,
                state,
                requires_activation,
                resume_calls: 0,
                schedule_failures: 0,
                scheduled: Vec::new(),
                pending: HashMap::new(),
                stopped: Vec::new(),
                schedule_delay: Duration::ZERO,
            }),
        })
    }

    /// Running 48 kHz device at time 0
    pub fn new() -> Arc<Self> {
        Self::with_state(DeviceState::Active, false)
    }

    /// Running device at a specific output rate
    pub fn with_sample_rate(sample_rate: u32) -> Arc<Self> {
        Self::build(DeviceState::Active, false, sample_rate)
    }

    /// Suspended device; `requires_activation` refuses automatic resume
    pub fn suspended(requires_activation: bool) -> Arc<Self> {
        Self::with_state(DeviceState::Suspended, requires_activation)
    }

    pub fn set_time(&self, time: f64) {
        self.inner.lock().time = time;
    }

    pub fn set_state(&self, state: DeviceState) {
        self.inner.lock().state = state;
    }

    /// Block the calling thread this long inside every `schedule` call
    pub fn set_schedule_delay(&self, delay: Duration) {
        self.inner.lock().schedule_delay = delay;
    }

    /// Refuse the next `count` schedule calls
    pub fn fail_next_schedules(&self, count: usize) {
        self.inner.lock().schedule_failures = count;
    }

    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        self.inner.lock().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<Uuid> {
        self.inner.lock().stopped.clone()
    }

    pub fn resume_calls(&self) -> usize {
        self.inner.lock().resume_calls
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Finish one voice naturally
    pub fn complete(&self, id: Uuid) -> bool {
        let sender = self.inner.lock().pending.remove(&id);
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Finish every pending voice naturally
    pub fn complete_all(&self) -> usize {
        let senders: Vec<_> = self.inner.lock().pending.drain().map(|(_, tx)| tx).collect();
        let count = senders.len();
        for tx in senders {
            let _ = tx.send(());
        }
        count
    }
}

impl OutputDevice for MockDevice {
    fn current_time(&self) -> f64 {
        self.inner.lock().time
    }

    fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&self) -> BoxFuture<'static, Result<(), ContextError>> {
        let result = {
            let mut inner = self.inner.lock();
            inner.resume_calls += 1;
            if inner.state == DeviceState::Closed {
                Err(ContextError::Unavailable("closed".to_string()))
            } else if inner.requires_activation {
                Err(ContextError::ActivationRequired)
            } else {
                inner.state = DeviceState::Active;
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn activate(&self) -> BoxFuture<'static, Result<(), ContextError>> {
        let result = {
            let mut inner = self.inner.lock();
            if inner.state == DeviceState::Closed {
                Err(ContextError::Unavailable("closed".to_string()))
            } else {
                inner.requires_activation = false;
                inner.state = DeviceState::Active;
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn schedule(
        &self,
        voice_id: Uuid,
        buffer: Arc<DecodedBuffer>,
        start_time: f64,
    ) -> Result<oneshot::Receiver<()>, PlaybackError> {
        let delay = self.inner.lock().schedule_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut inner = self.inner.lock();
        if inner.state == DeviceState::Closed {
            return Err(PlaybackError::Device("closed".to_string()));
        }
        if inner.schedule_failures > 0 {
            inner.schedule_failures -= 1;
            return Err(PlaybackError::Scheduling("device busy".to_string()));
        }
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(voice_id, tx);
        inner.scheduled.push(ScheduledCall {
            id: voice_id,
            sequence: buffer.sequence,
            start_time,
            duration: buffer.duration,
            sample_rate: buffer.sample_rate,
        });
        Ok(rx)
    }

    fn stop(&self, voice_id: Uuid) {
        let mut inner = self.inner.lock();
        inner.pending.remove(&voice_id);
        inner.stopped.push(voice_id);
    }
}

/// Mono 1 kHz buffer of `secs` seconds
pub fn buffer(sequence: u64, secs: f64) -> DecodedBuffer {
    let frames = (secs * 1_000.0).round() as usize;
    DecodedBuffer::from_decoded(
        sequence,
        DecodedAudio {
            samples: vec![0.1; frames],
            sample_rate: 1_000,
            channels: 1,
        },
    )
    .unwrap()
}

/// Non-empty payload; content is ignored by the mock decoder
pub fn chunk() -> Vec<u8> {
    vec![0xAB; 256]
}

pub async fn engine_with(
    config: EngineConfig,
    decoder: Arc<MockDecoder>,
    device: Arc<MockDevice>,
) -> Arc<StreamEngine> {
    StreamEngine::new(config, decoder, device).await.unwrap()
}

pub async fn engine(decoder: Arc<MockDecoder>, device: Arc<MockDevice>) -> Arc<StreamEngine> {
    engine_with(EngineConfig::default(), decoder, device).await
}

/// Drain every event currently buffered
pub fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let spawned tasks run (auto-advances a paused clock by a hair)
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
