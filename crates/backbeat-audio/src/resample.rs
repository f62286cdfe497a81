//! Audio resampling using rubato.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use backbeat_core::{Error, Result};
use rubato::{FftFixedIn, Resampler};
use tracing::debug;

/// Frames fed to the resampler per call.
const CHUNK_FRAMES: usize = 1024;

/// Resample a whole interleaved buffer from `input_rate` to `output_rate`.
pub fn resample_interleaved(
    input: &[f32],
    channels: usize,
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<f32>> {
    if input_rate == output_rate || input.is_empty() || channels == 0 {
        return Ok(input.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        input_rate as usize,
        output_rate as usize,
        CHUNK_FRAMES,
        2,
        channels,
    )
    .map_err(|e| Error::AudioDecode(format!("Failed to create resampler: {e}")))?;

    debug!("Resampling {input_rate}Hz -> {output_rate}Hz, {channels} channels");

    let planes = deinterleave(input, channels);
    let input_frames = planes[0].len();
    let expected_frames =
        (input_frames as f64 * f64::from(output_rate) / f64::from(input_rate)).round() as usize;

    let mut output_planes: Vec<Vec<f32>> = vec![Vec::with_capacity(expected_frames); channels];
    let mut offset = 0;

    while offset < input_frames {
        let end = (offset + CHUNK_FRAMES).min(input_frames);
        let chunk: Vec<Vec<f32>> = planes
            .iter()
            .map(|plane| {
                let mut data = plane[offset..end].to_vec();
                data.resize(CHUNK_FRAMES, 0.0);
                data
            })
            .collect();

        let resampled = resampler
            .process(&chunk, None)
            .map_err(|e| Error::AudioDecode(format!("Resample failed: {e}")))?;

        for (out, plane) in output_planes.iter_mut().zip(resampled) {
            out.extend(plane);
        }
        offset = end;
    }

    for plane in &mut output_planes {
        plane.truncate(expected_frames);
    }

    Ok(interleave(&output_planes))
}

/// Split interleaved samples into one buffer per channel.
fn deinterleave(input: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = input.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];

    for frame in input.chunks_exact(channels) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(sample);
        }
    }

    planes
}

/// Join per-channel buffers into interleaved samples.
fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = planes.first() else {
        return Vec::new();
    };

    let frames = planes.iter().map(Vec::len).min().unwrap_or(first.len());
    let mut output = Vec::with_capacity(frames * planes.len());

    for frame in 0..frames {
        for plane in planes {
            output.push(plane[frame]);
        }
    }

    output
}
