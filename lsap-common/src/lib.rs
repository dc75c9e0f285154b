//! # LSAP Common Library
//!
//! Shared code for the live stream audio player and its host collaborators:
//! - Event types (EngineEvent enum) and the EventBus
//! - Health and quality enums reported to the UI
//! - Configuration file discovery
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
