//! Chunk decoder backends
//!
//! [`ChunkDecoder`] is the seam between the decode pipeline and the codec.
//! The pipeline owns retry, timeout, and validation policy; a decoder only
//! turns one chunk's bytes into interleaved f32 PCM.
//!
//! [`SymphoniaChunkDecoder`] is the production backend: each chunk is a
//! self-describing container (WAV, Ogg, MP3, FLAC, ...) probed and decoded
//! entirely from memory.

use crate::audio::types::DecodedAudio;
use crate::error::DecodeError;
use futures::future::BoxFuture;
use std::io::Cursor;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Decodes one encoded chunk into PCM
///
/// `scratch` is a recycled sample buffer from the buffer pool; implementations
/// should fill it (it arrives cleared) and return it inside [`DecodedAudio`].
///
/// The returned future is raced against a timeout by the pipeline, so it must
/// be cancel-safe: dropping it releases everything it holds.
pub trait ChunkDecoder: Send + Sync + 'static {
    fn decode(
        &self,
        data: Arc<[u8]>,
        scratch: Vec<f32>,
    ) -> BoxFuture<'static, Result<DecodedAudio, DecodeError>>;
}

/// Symphonia-backed decoder for self-describing chunks
///
/// CPU work runs on tokio's blocking pool so decodes never stall the
/// scheduler loop.
#[derive(Debug, Clone, Default)]
pub struct SymphoniaChunkDecoder {
    /// Optional container hint (file extension such as "ogg" or "wav")
    extension: Option<String>,
}

impl SymphoniaChunkDecoder {
    /// Create decoder that probes every chunk without a hint
    pub fn new() -> Self {
        Self { extension: None }
    }

    /// Create decoder with a container hint
    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: Some(extension.into()),
        }
    }

    /// Decode a complete in-memory chunk (blocking)
    pub fn decode_blocking(
        data: Arc<[u8]>,
        extension: Option<&str>,
        mut scratch: Vec<f32>,
    ) -> Result<DecodedAudio, DecodeError> {
        scratch.clear();

        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        // Probe format
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
                other => DecodeError::Malformed(other.to_string()),
            })?;

        let mut format = probed.format;

        // Get default track
        let track = format
            .default_track()
            .ok_or_else(|| DecodeError::Unsupported("no audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break; // End of chunk
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Malformed(e.to_string())),
            };

            // Skip packets from other tracks
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count();

                    // Grow the conversion buffer when a packet is larger than any before
                    let needed = decoded.capacity() * channels;
                    if sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                        sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        scratch.extend_from_slice(buf.samples());
                    }
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    // Corrupt packet inside an otherwise readable chunk: skip it
                    skipped_packets += 1;
                    debug!("Skipping undecodable packet: {}", msg);
                }
                Err(e) => return Err(DecodeError::Malformed(e.to_string())),
            }
        }

        if skipped_packets > 0 {
            warn!("Decoded chunk with {} corrupt packet(s) skipped", skipped_packets);
        }

        Ok(DecodedAudio {
            samples: scratch,
            sample_rate,
            channels: u16::try_from(channels).unwrap_or(0),
        })
    }
}

impl ChunkDecoder for SymphoniaChunkDecoder {
    fn decode(
        &self,
        data: Arc<[u8]>,
        scratch: Vec<f32>,
    ) -> BoxFuture<'static, Result<DecodedAudio, DecodeError>> {
        let extension = self.extension.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                Self::decode_blocking(data, extension.as_deref(), scratch)
            })
            .await
            .map_err(|e| DecodeError::Malformed(format!("decoder task failed: {}", e)))?
        })
    }
}
