//! Sample rate conversion to the output device rate
//!
//! Chunks arrive at whatever rate the stream was encoded with. Each decoded
//! buffer is converted once, on a blocking worker, before it is queued; the
//! audio callback then only copies frames.
//!
//! Uses rubato's `FastFixedIn` with the whole chunk as a single input block.

use crate::error::DecodeError;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};

/// Convert interleaved `input` from `input_rate` to `output_rate`.
///
/// The converted samples are written into `output` (cleared first) so pooled
/// storage can be reused. With matching rates this is a plain copy.
pub fn resample(
    input: &[f32],
    input_rate: u32,
    output_rate: u32,
    channels: u16,
    mut output: Vec<f32>,
) -> Result<Vec<f32>, DecodeError> {
    output.clear();

    if input_rate == output_rate {
        output.extend_from_slice(input);
        return Ok(output);
    }
    if input_rate == 0 || output_rate == 0 || channels == 0 {
        return Err(DecodeError::Resample(format!(
            "invalid conversion {}Hz -> {}Hz with {} channels",
            input_rate, output_rate, channels
        )));
    }

    let channels = channels as usize;
    let input_frames = input.len() / channels;
    if input_frames == 0 {
        return Ok(output);
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Septic,
        input_frames,
        channels,
    )
    .map_err(|e| DecodeError::Resample(format!("failed to create resampler: {}", e)))?;

    let planar_input = deinterleave(input, channels);
    let planar_output = resampler
        .process(&planar_input, None)
        .map_err(|e| DecodeError::Resample(format!("conversion failed: {}", e)))?;

    interleave_into(&planar_output, &mut output);
    Ok(output)
}

/// Interleaved `[L, R, L, R]` → planar `[[L, L], [R, R]]`
fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = interleaved.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (channel, &sample) in frame.iter().enumerate() {
            planar[channel].push(sample);
        }
    }
    planar
}

/// Planar channels → interleaved, appended to `out`
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let frames = planar.first().map_or(0, |channel| channel.len());
    out.reserve(frames * planar.len());
    for frame in 0..frames {
        for channel in planar {
            out.push(channel[frame]);
        }
    }
}
