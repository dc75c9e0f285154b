//! Core audio data types
//!
//! Defines the units flowing through the pipeline:
//! transport → [`EncodedChunk`] → decoder → [`DecodedAudio`] → validation →
//! [`DecodedBuffer`] → queue → scheduler → output device.

use crate::error::ValidationError;
use std::sync::Arc;
use tokio::time::Instant;

/// Upper bound on a plausible decoded chunk duration
pub const MAX_BUFFER_DURATION_SECS: f64 = 30.0;

/// Bytes per sample used for memory estimates (worst-case f32 accounting)
pub const BYTES_PER_SAMPLE: u64 = 4;

/// One unit of encoded audio as received from the transport.
///
/// The payload is opaque and self-describing; it is shared (`Arc`) so that
/// retries can hand the same bytes to the decoder without copying.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Arrival sequence number (monotonic per engine)
    pub sequence: u64,

    /// Encoded bytes
    pub data: Arc<[u8]>,

    /// When the chunk arrived
    pub received_at: Instant,
}

impl EncodedChunk {
    /// Create a chunk stamped with the current instant
    pub fn new(sequence: u64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sequence,
            data: data.into(),
            received_at: Instant::now(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Raw decoder output before validation.
///
/// **Format:** interleaved f32 samples `[c0, c1, ..., c0, c1, ...]`.
#[derive(Debug, Clone, Default)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Validated PCM buffer ready for queueing and playback.
///
/// Invariants (enforced by [`DecodedBuffer::from_decoded`]):
/// - `sample_rate > 0`
/// - `channels > 0`
/// - `0 < duration < 30s`
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    /// Sequence number of the chunk this buffer was decoded from
    pub sequence: u64,

    /// Interleaved f32 samples
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,

    /// Duration in seconds
    pub duration: f64,
}

impl DecodedBuffer {
    /// Validate decoder output and wrap it as a playable buffer.
    ///
    /// A structurally valid but out-of-bounds result is rejected; on error
    /// the sample storage is handed back so it can be recycled.
    pub fn from_decoded(
        sequence: u64,
        audio: DecodedAudio,
    ) -> std::result::Result<Self, (ValidationError, Vec<f32>)> {
        let DecodedAudio {
            samples,
            sample_rate,
            channels,
        } = audio;

        if sample_rate == 0 {
            return Err((ValidationError::InvalidSampleRate(sample_rate), samples));
        }
        if channels == 0 {
            return Err((ValidationError::InvalidChannelCount(channels), samples));
        }
        if samples.len() % channels as usize != 0 {
            let len = samples.len();
            return Err((
                ValidationError::MisalignedSamples {
                    samples: len,
                    channels,
                },
                samples,
            ));
        }

        let frames = samples.len() / channels as usize;
        let duration = frames as f64 / sample_rate as f64;
        if !(duration > 0.0 && duration < MAX_BUFFER_DURATION_SECS) {
            return Err((ValidationError::ImplausibleDuration(duration), samples));
        }

        Ok(Self {
            sequence,
            samples,
            sample_rate,
            channels,
            duration,
        })
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Estimated memory footprint: `sample_rate × channels × duration × 4`.
    ///
    /// A soft admission heuristic for the queue, not exact accounting.
    pub fn estimated_bytes(&self) -> u64 {
        (self.sample_rate as f64 * self.channels as f64 * self.duration * BYTES_PER_SAMPLE as f64)
            .round() as u64
    }

    /// Give up the sample storage (for recycling)
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}
