//! Audio output devices
//!
//! [`OutputDevice`] is the scheduler's view of the sound card: a monotonic
//! clock, an activation state, and the ability to start a buffer at a precise
//! time on that clock.
//!
//! [`CpalOutputDevice`] implements it on top of cpal. The cpal stream is not
//! `Send`, so it lives on a dedicated thread that only keeps it alive and
//! services play/pause commands. The audio callback renders a shared
//! [`Timeline`] of scheduled voices; the device clock is the number of frames
//! rendered so far, so it stands still while the stream is paused.
//!
//! Buffers must already be at the device rate (see
//! [`crate::audio::resampler`]); the callback only copies and channel-maps.

use crate::audio::types::DecodedBuffer;
use crate::error::{ContextError, PlaybackError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Activation state of an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Clock running, buffers can be scheduled
    Active,
    /// Clock stopped; needs resume (possibly external activation)
    Suspended,
    /// Device gone; nothing will play
    Closed,
}

impl DeviceState {
    fn from_u8(value: u8) -> Self {
        match value {
            STATE_ACTIVE => DeviceState::Active,
            STATE_SUSPENDED => DeviceState::Suspended,
            _ => DeviceState::Closed,
        }
    }
}

const STATE_ACTIVE: u8 = 0;
const STATE_SUSPENDED: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Output device collaborator
pub trait OutputDevice: Send + Sync + 'static {
    /// Current time on the device clock, in seconds
    fn current_time(&self) -> f64;

    /// Current activation state
    fn state(&self) -> DeviceState;

    /// Output sample rate in Hz; scheduled buffers must match it
    fn sample_rate(&self) -> u32;

    /// Request the device to resume.
    ///
    /// Must not block waiting for a user: if resuming needs an external
    /// activation signal, fail with [`ContextError::ActivationRequired`].
    fn resume(&self) -> BoxFuture<'static, Result<(), ContextError>>;

    /// External activation signal (user gesture or host policy grant)
    fn activate(&self) -> BoxFuture<'static, Result<(), ContextError>> {
        self.resume()
    }

    /// Schedule `buffer` to start at `start_time` on the device clock.
    ///
    /// The returned receiver resolves when the buffer finishes playing; it
    /// errors (sender dropped) if the voice is stopped first.
    fn schedule(
        &self,
        voice_id: Uuid,
        buffer: Arc<DecodedBuffer>,
        start_time: f64,
    ) -> Result<oneshot::Receiver<()>, PlaybackError>;

    /// Stop a scheduled or playing voice immediately
    fn stop(&self, voice_id: Uuid);
}

/// One buffer placed on the timeline
struct Voice {
    id: Uuid,
    buffer: Arc<DecodedBuffer>,
    start_frame: u64,
    end_frame: u64,
    completion: Option<oneshot::Sender<()>>,
}

impl Voice {
    /// Sample for device frame `position` and device channel `out_channel`.
    ///
    /// Mono feeds every output; extra source channels are ignored.
    fn sample_at(&self, position: u64, out_channel: usize) -> f32 {
        if position < self.start_frame || position >= self.end_frame {
            return 0.0;
        }

        let src_channels = self.buffer.channels as usize;
        let index = (position - self.start_frame) as usize;
        let channel = if src_channels == 1 {
            0
        } else {
            out_channel.min(src_channels - 1)
        };
        self.buffer
            .samples
            .get(index * src_channels + channel)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Sample-accurate schedule of voices rendered by the audio callback
pub struct Timeline {
    frames_rendered: u64,
    sample_rate: u32,
    channels: usize,
    voices: Vec<Voice>,
}

impl Timeline {
    /// Create an empty timeline for a device format
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            frames_rendered: 0,
            sample_rate,
            channels: channels.max(1) as usize,
            voices: Vec::new(),
        }
    }

    /// Device clock in seconds
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Number of voices scheduled or playing
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Place a buffer on the timeline.
    ///
    /// The buffer plays one frame per device frame; callers convert its rate
    /// beforehand.
    pub fn schedule(
        &mut self,
        id: Uuid,
        buffer: Arc<DecodedBuffer>,
        start_time: f64,
    ) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let start_frame = (start_time.max(0.0) * self.sample_rate as f64).round() as u64;
        // Never schedule into frames already rendered
        let start_frame = start_frame.max(self.frames_rendered);
        let length = buffer.frames() as u64;
        self.voices.push(Voice {
            id,
            buffer,
            start_frame,
            end_frame: start_frame + length,
            completion: Some(tx),
        });
        rx
    }

    /// Remove a voice without signalling completion
    pub fn stop(&mut self, id: Uuid) -> bool {
        let before = self.voices.len();
        self.voices.retain(|voice| voice.id != id);
        self.voices.len() != before
    }

    /// Remove every voice without signalling completion
    pub fn clear(&mut self) {
        self.voices.clear();
    }

    /// Render interleaved output frames and advance the clock.
    ///
    /// Voices whose last frame has been rendered are completed and removed.
    pub fn render<T>(&mut self, data: &mut [T])
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.channels;
        let frames = data.len() / channels;

        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let position = self.frames_rendered + i as u64;
            for (channel, out) in frame.iter_mut().enumerate() {
                let mixed: f32 = self
                    .voices
                    .iter()
                    .map(|voice| voice.sample_at(position, channel))
                    .sum();
                *out = T::from_sample(mixed.clamp(-1.0, 1.0));
            }
        }

        self.frames_rendered += frames as u64;
        let now = self.frames_rendered;
        let mut finished = Vec::new();
        self.voices.retain_mut(|voice| {
            if voice.end_frame <= now {
                finished.extend(voice.completion.take());
                false
            } else {
                true
            }
        });

        // Signal after the voices (and their buffer references) are gone
        for tx in finished {
            let _ = tx.send(());
        }
    }
}

/// Commands serviced by the output thread
enum DeviceCommand {
    Play(oneshot::Sender<Result<(), String>>),
    Pause,
    Shutdown,
}

/// cpal-backed output device
pub struct CpalOutputDevice {
    timeline: Arc<Mutex<Timeline>>,
    state: Arc<AtomicU8>,
    activation_required: Arc<AtomicBool>,
    control_tx: Mutex<mpsc::Sender<DeviceCommand>>,
    sample_rate: u32,
    channels: u16,
}

impl CpalOutputDevice {
    /// Open an output device on a dedicated thread.
    ///
    /// # Arguments
    /// - `device_name`: Optional device name (None = default device); falls
    ///   back to the default device if the name is not found
    /// - `start_suspended`: open paused; automatic resume is refused with
    ///   `ActivationRequired` until [`OutputDevice::activate`] is called
    pub fn open(device_name: Option<String>, start_suspended: bool) -> Result<Self, ContextError> {
        let (control_tx, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let state = Arc::new(AtomicU8::new(STATE_SUSPENDED));
        let state_clone = Arc::clone(&state);

        std::thread::Builder::new()
            .name("lsap-output".to_string())
            .spawn(move || {
                output_thread(device_name, start_suspended, state_clone, control_rx, ready_tx)
            })
            .map_err(|e| ContextError::Unavailable(format!("failed to spawn output thread: {}", e)))?;

        let (sample_rate, channels, timeline) = ready_rx
            .recv()
            .map_err(|_| ContextError::Unavailable("output thread exited during startup".to_string()))?
            .map_err(ContextError::Unavailable)?;

        info!(
            "Output device ready: {}Hz, {} channels, {}",
            sample_rate,
            channels,
            if start_suspended { "suspended" } else { "active" }
        );

        Ok(Self {
            timeline,
            state,
            activation_required: Arc::new(AtomicBool::new(start_suspended)),
            control_tx: Mutex::new(control_tx),
            sample_rate,
            channels,
        })
    }

    /// Device channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Pause the stream (clock stops; scheduled voices keep their frames)
    pub fn suspend(&self) {
        let _ = self.control_tx.lock().send(DeviceCommand::Pause);
    }

    fn request_play(&self) -> BoxFuture<'static, Result<(), ContextError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self.control_tx.lock().send(DeviceCommand::Play(reply_tx));
        Box::pin(async move {
            sent.map_err(|_| ContextError::Unavailable("output thread stopped".to_string()))?;
            reply_rx
                .await
                .map_err(|_| ContextError::Unavailable("output thread stopped".to_string()))?
                .map_err(ContextError::Unavailable)
        })
    }
}

impl OutputDevice for CpalOutputDevice {
    fn current_time(&self) -> f64 {
        self.timeline.lock().current_time()
    }

    fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&self) -> BoxFuture<'static, Result<(), ContextError>> {
        match self.state() {
            DeviceState::Active => Box::pin(async { Ok(()) }),
            DeviceState::Closed => Box::pin(async {
                Err(ContextError::Unavailable("output device closed".to_string()))
            }),
            DeviceState::Suspended if self.activation_required.load(Ordering::SeqCst) => {
                Box::pin(async { Err(ContextError::ActivationRequired) })
            }
            DeviceState::Suspended => self.request_play(),
        }
    }

    fn activate(&self) -> BoxFuture<'static, Result<(), ContextError>> {
        self.activation_required.store(false, Ordering::SeqCst);
        self.resume()
    }

    fn schedule(
        &self,
        voice_id: Uuid,
        buffer: Arc<DecodedBuffer>,
        start_time: f64,
    ) -> Result<oneshot::Receiver<()>, PlaybackError> {
        if self.state() == DeviceState::Closed {
            return Err(PlaybackError::Device("output device closed".to_string()));
        }
        if buffer.sample_rate != self.sample_rate {
            return Err(PlaybackError::Scheduling(format!(
                "buffer at {}Hz does not match device rate {}Hz",
                buffer.sample_rate, self.sample_rate
            )));
        }
        Ok(self.timeline.lock().schedule(voice_id, buffer, start_time))
    }

    fn stop(&self, voice_id: Uuid) {
        if self.timeline.lock().stop(voice_id) {
            debug!("Stopped voice {}", voice_id);
        }
    }
}

impl Drop for CpalOutputDevice {
    fn drop(&mut self) {
        let _ = self.control_tx.lock().send(DeviceCommand::Shutdown);
    }
}

type ReadySender = mpsc::Sender<Result<(u32, u16, Arc<Mutex<Timeline>>), String>>;

/// Output thread: owns the cpal stream for its whole life
fn output_thread(
    device_name: Option<String>,
    start_suspended: bool,
    state: Arc<AtomicU8>,
    control_rx: mpsc::Receiver<DeviceCommand>,
    ready_tx: ReadySender,
) {
    let opened = open_stream(device_name, Arc::clone(&state));
    let (stream, sample_rate, channels, timeline) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            error!("Failed to open audio output: {}", e);
            state.store(STATE_CLOSED, Ordering::SeqCst);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let initial = if start_suspended {
        stream.pause().map_err(|e| e.to_string())
    } else {
        stream.play().map_err(|e| e.to_string())
    };
    if let Err(e) = initial {
        error!("Failed to set initial stream state: {}", e);
        state.store(STATE_CLOSED, Ordering::SeqCst);
        let _ = ready_tx.send(Err(e));
        return;
    }
    state.store(
        if start_suspended { STATE_SUSPENDED } else { STATE_ACTIVE },
        Ordering::SeqCst,
    );
    let _ = ready_tx.send(Ok((sample_rate, channels, Arc::clone(&timeline))));

    // Keep the stream alive and service commands until shutdown
    while let Ok(command) = control_rx.recv() {
        match command {
            DeviceCommand::Play(reply) => {
                let result = stream.play().map_err(|e| e.to_string());
                if result.is_ok() {
                    state.store(STATE_ACTIVE, Ordering::SeqCst);
                    debug!("Output stream resumed");
                } else {
                    warn!("Failed to resume output stream: {:?}", result);
                }
                let _ = reply.send(result);
            }
            DeviceCommand::Pause => match stream.pause() {
                Ok(()) => {
                    state.store(STATE_SUSPENDED, Ordering::SeqCst);
                    debug!("Output stream suspended");
                }
                Err(e) => warn!("Failed to pause output stream: {}", e),
            },
            DeviceCommand::Shutdown => break,
        }
    }

    state.store(STATE_CLOSED, Ordering::SeqCst);
    timeline.lock().clear();
    info!("Audio output stopped");
}

/// Find the device, pick its default config, and build the stream
fn open_stream(
    device_name: Option<String>,
    state: Arc<AtomicU8>,
) -> Result<(Stream, u32, u16, Arc<Mutex<Timeline>>), String> {
    let host = cpal::default_host();

    let device = match device_name.as_ref() {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| format!("Failed to enumerate devices: {}", e))?;
            match devices.find(|d| d.name().ok().as_ref() == Some(name)) {
                Some(dev) => {
                    info!("Found requested audio device: {}", name);
                    dev
                }
                None => {
                    warn!("Requested device '{}' not found, falling back to default device", name);
                    host.default_output_device().ok_or_else(|| {
                        format!("Device '{}' not found and no default device available", name)
                    })?
                }
            }
        }
        None => host
            .default_output_device()
            .ok_or_else(|| "No default output device found".to_string())?,
    };

    let supported = device
        .default_output_config()
        .map_err(|e| format!("Failed to get default config: {}", e))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}",
        sample_rate, channels, sample_format
    );

    let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate, channels)));

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&timeline), state)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&timeline), state)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&timeline), state)?,
        other => return Err(format!("Unsupported sample format: {:?}", other)),
    };

    Ok((stream, sample_rate, channels, timeline))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    timeline: Arc<Mutex<Timeline>>,
    state: Arc<AtomicU8>,
) -> Result<Stream, String>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                timeline.lock().render(data);
            },
            move |err| {
                error!("Audio stream error: {} - closing device", err);
                state.store(STATE_CLOSED, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| format!("Failed to build stream: {}", e))
}
