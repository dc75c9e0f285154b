//! Error types for lsap-ap
//!
//! Defines the engine's error taxonomy using thiserror:
//! - [`DecodeError`]: chunk could not be turned into PCM (malformed, unsupported,
//!   timeout, size bounds, memory pressure)
//! - [`ContextError`]: output device unavailable or awaiting external activation
//! - [`PlaybackError`]: scheduling/device failure, playback timeout, cancellation
//! - [`ValidationError`]: decoded buffer violates sanity bounds
//!
//! None of these are fatal to the engine. Anything surfaced to the host goes
//! through [`Error::classify`], which yields a short message plus an actionable
//! suggestion instead of the raw internal error.

use thiserror::Error;

/// Main error type for lsap-ap
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Chunk decode failures
    #[error("Audio decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Output device context failures
    #[error("Audio context error: {0}")]
    Context(#[from] ContextError),

    /// Playback scheduling failures
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// Decoded buffer failed sanity checks
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Queue admission failures
    #[error("Queue error: {0}")]
    Queue(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Decode failure causes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Zero-length chunk
    #[error("chunk is empty")]
    Empty,

    /// Chunk below the configured minimum size
    #[error("chunk of {size} bytes is below the {min}-byte minimum")]
    Undersized { size: usize, min: usize },

    /// Chunk above the configured maximum size
    #[error("chunk of {size} bytes exceeds the {max}-byte maximum")]
    Oversized { size: usize, max: usize },

    /// Bytes could not be parsed or decoded
    #[error("malformed audio data: {0}")]
    Malformed(String),

    /// Container or codec not supported
    #[error("unsupported audio format: {0}")]
    Unsupported(String),

    /// Decode attempt did not finish in time
    #[error("decode attempt {attempt} timed out after {timeout_ms}ms")]
    Timeout { attempt: u32, timeout_ms: u64 },

    /// Decoded audio could not be converted to the device rate
    #[error("sample rate conversion failed: {0}")]
    Resample(String),

    /// Chunk dropped because the queue stayed too full after cleanup
    #[error("dropped under memory pressure ({queued}/{max_count} queued)")]
    MemoryPressure { queued: usize, max_count: usize },
}

/// Output device context failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    /// Device is suspended and resuming requires an external activation signal
    #[error("output device requires activation")]
    ActivationRequired,

    /// Device is closed or could not be opened/resumed
    #[error("output device unavailable: {0}")]
    Unavailable(String),
}

/// Playback failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Device refused to schedule the buffer
    #[error("failed to schedule buffer: {0}")]
    Scheduling(String),

    /// Device failed during playback
    #[error("output device failure: {0}")]
    Device(String),

    /// Playback did not complete within duration + grace
    #[error("playback timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Playback was cancelled by stop
    #[error("playback cancelled")]
    Cancelled,
}

/// Decoded buffer sanity violations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),

    #[error("invalid channel count {0}")]
    InvalidChannelCount(u16),

    #[error("implausible duration {0:.3}s")]
    ImplausibleDuration(f64),

    #[error("sample count {samples} is not a multiple of {channels} channels")]
    MisalignedSamples { samples: usize, channels: u16 },
}

/// User-facing classification of an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFacingError {
    /// Short classified message
    pub message: String,
    /// Actionable suggestion
    pub suggestion: String,
    /// Whether the engine continues on its own
    pub recoverable: bool,
}

impl UserFacingError {
    fn new(message: &str, suggestion: &str, recoverable: bool) -> Self {
        Self {
            message: message.to_string(),
            suggestion: suggestion.to_string(),
            recoverable,
        }
    }
}

impl Error {
    /// Classify into a short message plus actionable suggestion
    pub fn classify(&self) -> UserFacingError {
        match self {
            Error::Decode(DecodeError::Timeout { .. }) => UserFacingError::new(
                "Audio processing timed out",
                "Check your network connection; playback continues with the next chunk",
                true,
            ),
            Error::Decode(DecodeError::Malformed(_)) => UserFacingError::new(
                "Received corrupted audio data",
                "Playback continues with the next chunk; restart the stream if this persists",
                true,
            ),
            Error::Decode(DecodeError::Unsupported(_)) => UserFacingError::new(
                "Audio format not supported",
                "Make sure the sender is streaming a supported audio format",
                true,
            ),
            Error::Decode(DecodeError::Resample(_)) => UserFacingError::new(
                "Audio could not be prepared for the output device",
                "Playback continues with the next chunk; check the sender's sample rate",
                true,
            ),
            Error::Decode(
                DecodeError::Empty | DecodeError::Undersized { .. } | DecodeError::Oversized { .. },
            ) => UserFacingError::new(
                "Received an invalid audio chunk",
                "The chunk was skipped; check the sender if this keeps happening",
                true,
            ),
            Error::Decode(DecodeError::MemoryPressure { .. }) => UserFacingError::new(
                "System is low on memory",
                "Close other applications to free memory; some audio was skipped",
                true,
            ),
            Error::Context(ContextError::ActivationRequired) => UserFacingError::new(
                "Audio playback needs to be enabled",
                "Activate audio output (for example by clicking the page) to continue",
                true,
            ),
            Error::Context(ContextError::Unavailable(_)) => UserFacingError::new(
                "Audio output device unavailable",
                "Check that an output device is connected and not in use",
                false,
            ),
            Error::Playback(PlaybackError::Timeout { .. }) => UserFacingError::new(
                "Audio playback timed out",
                "Playback was stopped; try again or check the output device",
                true,
            ),
            Error::Playback(PlaybackError::Cancelled) => UserFacingError::new(
                "Audio playback was stopped",
                "Start the stream again to resume playback",
                true,
            ),
            Error::Playback(_) => UserFacingError::new(
                "Audio playback failed",
                "Playback will retry automatically; check the output device if it persists",
                true,
            ),
            Error::Validation(_) => UserFacingError::new(
                "Received audio with invalid parameters",
                "The chunk was skipped; check the sender's audio settings",
                true,
            ),
            Error::Queue(_) => UserFacingError::new(
                "Audio buffer is full",
                "Some audio was skipped to keep playback in sync",
                true,
            ),
            Error::Config(_) => UserFacingError::new(
                "Audio engine is misconfigured",
                "Check the configuration file and restart",
                false,
            ),
            Error::Internal(_) => UserFacingError::new(
                "Unexpected audio engine error",
                "Restart the stream; report the problem if it persists",
                true,
            ),
        }
    }

    /// True for errors that count toward the consecutive-failure threshold.
    ///
    /// Everything else (size bounds, memory pressure, activation, cancel) is
    /// a drop or a state, not a failure, and is not retried.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Error::Decode(
                DecodeError::Malformed(_)
                    | DecodeError::Unsupported(_)
                    | DecodeError::Timeout { .. }
                    | DecodeError::Resample(_)
            ) | Error::Validation(_)
                | Error::Playback(
                    PlaybackError::Scheduling(_) | PlaybackError::Device(_) | PlaybackError::Timeout { .. }
                )
        )
    }
}

/// Convenience Result type using lsap-ap Error
pub type Result<T> = std::result::Result<T, Error>;
