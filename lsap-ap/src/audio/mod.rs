//! Audio subsystem: chunk types, decoder backends, rate conversion and output devices

pub mod decoder;
pub mod output;
pub mod resampler;
pub mod types;

pub use decoder::{ChunkDecoder, SymphoniaChunkDecoder};
pub use output::{CpalOutputDevice, DeviceState, OutputDevice, Timeline};
pub use types::{DecodedAudio, DecodedBuffer, EncodedChunk};
