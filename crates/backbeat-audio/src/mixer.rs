//! Software voice table shared by the engine backends.
//!
//! The mixer owns every loaded sound and every channel ("voice"). A voice's
//! cursor is measured in frames of its sound's sample rate, so the same table
//! can be advanced either by rendering PCM for a device or by a simulated
//! clock.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backbeat_core::{Error, Result};
use tracing::trace;

use crate::engine::{ChannelId, SoundId};

/// Interleaved channel count of decoded sounds.
pub const MIX_CHANNELS: usize = 2;

/// A loaded sound.
#[derive(Debug, Clone)]
pub struct SoundData {
    pub path: PathBuf,
    /// Interleaved stereo samples, absent for clock-only sounds.
    pub samples: Option<Arc<[f32]>>,
    pub sample_rate: u32,
    pub frames: u64,
}

impl SoundData {
    /// Sound without PCM whose length is known up front.
    pub fn silent(path: impl Into<PathBuf>, length_ms: u64) -> Self {
        Self {
            path: path.into(),
            samples: None,
            sample_rate: 1000,
            frames: length_ms,
        }
    }

    /// Sound backed by interleaved stereo PCM.
    pub fn pcm(path: impl Into<PathBuf>, samples: Vec<f32>, sample_rate: u32) -> Self {
        let frames = (samples.len() / MIX_CHANNELS) as u64;
        Self {
            path: path.into(),
            samples: Some(samples.into()),
            sample_rate,
            frames,
        }
    }

    pub fn length_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames * 1000 / u64::from(self.sample_rate)
    }
}

#[derive(Debug, Clone)]
struct Voice {
    sound: SoundId,
    cursor: f64,
    volume: f32,
    pitch: f32,
    paused: bool,
    playing: bool,
}

/// Table of sounds and voices.
#[derive(Debug, Default)]
pub struct Mixer {
    sounds: HashMap<SoundId, SoundData>,
    voices: HashMap<ChannelId, Voice>,
    next_sound: u64,
    next_channel: u64,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sound(&mut self, data: SoundData) -> SoundId {
        self.next_sound += 1;
        let id = SoundId(self.next_sound);
        trace!("Loaded {id} from {} ({} ms)", data.path.display(), data.length_ms());
        self.sounds.insert(id, data);
        id
    }

    pub fn sound(&self, sound: SoundId) -> Result<&SoundData> {
        self.sounds
            .get(&sound)
            .ok_or_else(|| Error::Engine(format!("invalid sound handle {sound}")))
    }

    pub fn sound_length(&self, sound: SoundId) -> Result<u64> {
        self.sound(sound).map(SoundData::length_ms)
    }

    pub fn release_sound(&mut self, sound: SoundId) -> Result<()> {
        self.sounds
            .remove(&sound)
            .ok_or_else(|| Error::Engine(format!("invalid sound handle {sound}")))?;
        self.voices.retain(|_, voice| voice.sound != sound);
        Ok(())
    }

    pub fn play(&mut self, sound: SoundId, paused: bool) -> Result<ChannelId> {
        self.sound(sound)?;
        self.next_channel += 1;
        let id = ChannelId(self.next_channel);
        self.voices.insert(
            id,
            Voice {
                sound,
                cursor: 0.0,
                volume: 1.0,
                pitch: 1.0,
                paused,
                playing: true,
            },
        );
        Ok(id)
    }

    pub fn stop(&mut self, channel: ChannelId) -> Result<()> {
        self.voices
            .remove(&channel)
            .map(|_| ())
            .ok_or_else(|| invalid_channel(channel))
    }

    pub fn stop_all(&mut self) {
        self.voices.clear();
    }

    fn voice(&self, channel: ChannelId) -> Result<&Voice> {
        self.voices.get(&channel).ok_or_else(|| invalid_channel(channel))
    }

    fn voice_mut(&mut self, channel: ChannelId) -> Result<&mut Voice> {
        self.voices
            .get_mut(&channel)
            .ok_or_else(|| invalid_channel(channel))
    }

    pub fn set_volume(&mut self, channel: ChannelId, volume: f32) -> Result<()> {
        let volume = if volume.is_nan() { 0.0 } else { volume.max(0.0) };
        self.voice_mut(channel)?.volume = volume;
        Ok(())
    }

    pub fn volume(&self, channel: ChannelId) -> Result<f32> {
        self.voice(channel).map(|v| v.volume)
    }

    pub fn set_pitch(&mut self, channel: ChannelId, pitch: f32) -> Result<()> {
        if !(pitch.is_finite() && pitch > 0.0) {
            return Err(Error::Engine(format!("invalid pitch {pitch}")));
        }
        self.voice_mut(channel)?.pitch = pitch;
        Ok(())
    }

    pub fn pitch(&self, channel: ChannelId) -> Result<f32> {
        self.voice(channel).map(|v| v.pitch)
    }

    pub fn set_position(&mut self, channel: ChannelId, position_ms: u64) -> Result<()> {
        let sound = self.voice(channel)?.sound;
        let data = self.sound(sound)?;
        let frame = position_ms as f64 * f64::from(data.sample_rate) / 1000.0;
        if frame >= data.frames as f64 {
            return Err(Error::Engine(format!(
                "position {position_ms} ms is past the end of {sound}"
            )));
        }
        let voice = self.voice_mut(channel)?;
        voice.cursor = frame;
        voice.playing = true;
        Ok(())
    }

    pub fn position(&self, channel: ChannelId) -> Result<u64> {
        let voice = self.voice(channel)?;
        let data = self.sound(voice.sound)?;
        if data.sample_rate == 0 {
            return Ok(0);
        }
        Ok((voice.cursor * 1000.0 / f64::from(data.sample_rate)) as u64)
    }

    pub fn is_playing(&self, channel: ChannelId) -> Result<bool> {
        self.voice(channel).map(|v| v.playing)
    }

    pub fn set_paused(&mut self, channel: ChannelId, paused: bool) -> Result<()> {
        self.voice_mut(channel)?.paused = paused;
        Ok(())
    }

    pub fn is_paused(&self, channel: ChannelId) -> Result<bool> {
        self.voice(channel).map(|v| v.paused)
    }

    pub fn current_sound(&self, channel: ChannelId) -> Result<SoundId> {
        self.voice(channel).map(|v| v.sound)
    }

    /// Channels that have not been stopped, in creation order.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.voices.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Advance every audible voice by wall-clock time.
    pub fn advance(&mut self, elapsed: Duration) {
        let nanos = elapsed.as_nanos() as f64;
        for voice in self.voices.values_mut() {
            if !voice.playing || voice.paused {
                continue;
            }
            let Some(data) = self.sounds.get(&voice.sound) else {
                continue;
            };
            // Multiply before dividing so whole-millisecond steps stay exact.
            voice.cursor +=
                nanos * f64::from(data.sample_rate) / 1_000_000_000.0 * f64::from(voice.pitch);
            if voice.cursor >= data.frames as f64 {
                voice.cursor = data.frames as f64;
                voice.playing = false;
            }
        }
    }

    /// Mix every audible voice into `out`, an interleaved buffer with
    /// `out_channels` channels at `out_rate` Hz. Voices advance by the
    /// frames rendered.
    pub fn render(&mut self, out: &mut [f32], out_channels: usize, out_rate: u32) {
        out.fill(0.0);
        if out_channels == 0 || out_rate == 0 {
            return;
        }
        let frames_out = out.len() / out_channels;

        for voice in self.voices.values_mut() {
            if !voice.playing || voice.paused {
                continue;
            }
            let Some(data) = self.sounds.get(&voice.sound) else {
                continue;
            };
            let step = f64::from(data.sample_rate) / f64::from(out_rate) * f64::from(voice.pitch);
            let Some(samples) = data.samples.as_deref() else {
                voice.cursor += frames_out as f64 * f64::from(data.sample_rate)
                    * f64::from(voice.pitch)
                    / f64::from(out_rate);
                if voice.cursor >= data.frames as f64 {
                    voice.cursor = data.frames as f64;
                    voice.playing = false;
                }
                continue;
            };

            for frame in out.chunks_exact_mut(out_channels) {
                let index = voice.cursor as usize;
                if index as u64 >= data.frames {
                    voice.playing = false;
                    break;
                }
                let left = samples[index * MIX_CHANNELS] * voice.volume;
                let right = samples[index * MIX_CHANNELS + 1] * voice.volume;
                if out_channels == 1 {
                    frame[0] += (left + right) * 0.5;
                } else {
                    frame[0] += left;
                    frame[1] += right;
                }
                voice.cursor += step;
            }
            if voice.cursor >= data.frames as f64 {
                voice.playing = false;
            }
        }
    }
}

fn invalid_channel(channel: ChannelId) -> Error {
    Error::Engine(format!("invalid channel handle {channel}"))
}
