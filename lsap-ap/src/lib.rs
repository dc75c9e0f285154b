//! # Live Stream Audio Playback Engine (lsap-ap)
//!
//! Playback side of a live streaming audio pipeline.
//!
//! **Purpose:** Receive independently encoded audio chunks over an
//! unreliable, bursty transport and turn them into continuous, gapless,
//! low-latency output while tolerating jitter, decode failures and memory
//! pressure.
//!
//! **Architecture:** bounded jitter queue + clock-aligned scheduler +
//! Normal/Recovery state machine, using symphonia for decoding and cpal for
//! output.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use playback::StreamEngine;
