use anyhow::{anyhow, Result};
use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use super::chunk::AudioChunk;

/// Input block size handed to the FFT resampler.
const RESAMPLE_CHUNK: usize = 1024;

/// Converts signed 16-bit samples to f32 in [-1, 1].
pub fn normalize(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Concatenates chunks into one normalized buffer.
pub fn normalize_chunks(chunks: &[AudioChunk]) -> Vec<f32> {
    let total = chunks.iter().map(AudioChunk::len).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend(chunk.samples().iter().map(|&s| s as f32 / 32768.0));
    }
    out
}

/// Resamples a mono buffer from `from_rate` to `to_rate`. Returns the input
/// unchanged when the rates already match.
pub fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        2, // sub-chunks
        1, // mono
    )
    .map_err(|e| anyhow!("failed to create resampler: {}", e))?;

    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    let mut offset = 0;

    loop {
        let needed = resampler.input_frames_next();
        if samples.len() - offset < needed {
            break;
        }
        let block = [&samples[offset..offset + needed]];
        let out = resampler
            .process(&block[..], None)
            .map_err(|e| anyhow!("resample failed: {}", e))?;
        output.extend_from_slice(&out[0]);
        offset += needed;
    }

    if offset < samples.len() {
        let tail = [&samples[offset..]];
        let out = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|e| anyhow!("resample failed: {}", e))?;
        output.extend_from_slice(&out[0]);
    }

    // Flush what is still held back by the filter delay.
    let delay = resampler.output_delay();
    for _ in 0..4 {
        if output.len() >= expected + delay {
            break;
        }
        let out = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| anyhow!("resample flush failed: {}", e))?;
        output.extend_from_slice(&out[0]);
    }

    // Drop the filter delay so the result lines up with the input.
    let delay = delay.min(output.len());
    output.drain(..delay);
    output.truncate(expected);

    debug!(from_rate, to_rate, input = samples.len(), output = output.len(), "resampled phrase");
    Ok(output)
}
