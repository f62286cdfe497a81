//! Audio decoding using symphonia.

use std::fs::File;
use std::path::Path;

use backbeat_core::{Error, Result};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, trace, warn};

use crate::mixer::MIX_CHANNELS;
use crate::resample;

/// A fully decoded sound as interleaved stereo samples.
#[derive(Debug, Clone)]
pub struct DecodedSound {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedSound {
    pub fn frames(&self) -> usize {
        self.samples.len() / MIX_CHANNELS
    }
}

/// Audio decoder wrapping symphonia.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

impl AudioDecoder {
    /// Open a file, guessing the container from its extension.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| {
                Error::AudioDecode(format!("Failed to probe {}: {e}", path.display()))
            })?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                Error::AudioDecode(format!("No audio tracks in {}", path.display()))
            })?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(48000);
        let channels = track.codec_params.channels.map_or(2, |c| c.count());

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::AudioDecode(format!("Failed to create decoder: {e}")))?;

        debug!(
            "Opened {}: track={}, {} Hz, {} channels",
            path.display(),
            track_id,
            sample_rate,
            channels
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Length from the container header, if it declares one.
    pub fn duration_ms(&self) -> Option<u64> {
        let track = self
            .format
            .tracks()
            .iter()
            .find(|t| t.id == self.track_id)?;
        let n_frames = track.codec_params.n_frames?;
        let rate = u64::from(track.codec_params.sample_rate?);
        (rate > 0).then(|| n_frames * 1000 / rate)
    }

    /// Decode the next packet and return interleaved f32 samples.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    self.channels = spec.channels.count();
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    return Ok(Some(buffer.samples().to_vec()));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping packet): {e}");
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Decode failed: {e}")));
                }
            }
        }
    }
}

/// Fold any channel layout down to interleaved stereo.
fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Decode a whole file to stereo PCM at `target_rate`.
pub fn load_pcm(path: &Path, target_rate: u32) -> Result<DecodedSound> {
    let mut decoder = AudioDecoder::open(path)?;
    let mut samples = Vec::new();

    while let Some(chunk) = decoder.decode_next()? {
        samples.extend(to_stereo(&chunk, decoder.channels()));
    }
    trace!("Decoded {} samples from {}", samples.len(), path.display());

    let samples = if decoder.sample_rate() == target_rate {
        samples
    } else {
        resample::resample_interleaved(&samples, MIX_CHANNELS, decoder.sample_rate(), target_rate)?
    };

    Ok(DecodedSound {
        samples,
        sample_rate: target_rate,
    })
}

/// Length of a file in milliseconds, decoding it when the header is silent.
pub fn probe_length_ms(path: &Path) -> Result<u64> {
    let mut decoder = AudioDecoder::open(path)?;
    if let Some(length) = decoder.duration_ms() {
        return Ok(length);
    }

    let mut frames = 0u64;
    while let Some(chunk) = decoder.decode_next()? {
        frames += (chunk.len() / decoder.channels().max(1)) as u64;
    }
    Ok(frames * 1000 / u64::from(decoder.sample_rate().max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_stereo_layouts() {
        assert_eq!(to_stereo(&[0.1, 0.2], 1), vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(to_stereo(&[0.1, 0.2], 2), vec![0.1, 0.2]);
        assert_eq!(
            to_stereo(&[0.1, 0.2, 0.9, 0.3, 0.4, 0.9], 3),
            vec![0.1, 0.2, 0.3, 0.4]
        );
    }

    #[test]
    fn test_open_missing_file() {
        let result = AudioDecoder::open(Path::new("/nonexistent/backbeat.ogg"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
