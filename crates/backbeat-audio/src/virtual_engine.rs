//! Clock-driven engine without an output device.
//!
//! Channels advance only when [`AudioEngine::update`] is called, which makes
//! playback fully deterministic. Used for headless runs and as the engine in
//! tests, where individual channels can be made to fail on demand.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use backbeat_core::{Error, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::decode;
use crate::engine::{AudioEngine, ChannelId, SoundId, SoundMode};
use crate::mixer::{Mixer, SoundData};

/// Simulated audio engine.
#[derive(Debug, Default)]
pub struct VirtualEngine {
    mixer: Mutex<Mixer>,
    /// Known file lengths, consulted before probing the filesystem.
    catalog: Mutex<HashMap<PathBuf, u64>>,
    faulty: Mutex<HashSet<ChannelId>>,
    probe_files: bool,
}

impl VirtualEngine {
    /// Engine that only knows sounds registered with [`Self::insert_sound`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that reads real file lengths for paths it has not been told about.
    pub fn with_file_probe() -> Self {
        Self {
            probe_files: true,
            ..Self::default()
        }
    }

    /// Declare a file and its length.
    pub fn insert_sound(&self, path: impl Into<PathBuf>, length_ms: u64) {
        self.catalog.lock().insert(path.into(), length_ms);
    }

    /// Make every subsequent call on `channel` fail.
    pub fn fail_channel(&self, channel: ChannelId) {
        warn!("Injecting failure on {channel}");
        self.faulty.lock().insert(channel);
    }

    /// Channels that have not been stopped.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.mixer.lock().channels()
    }

    /// Channels that are still producing audio.
    pub fn playing_channels(&self) -> Vec<ChannelId> {
        let mixer = self.mixer.lock();
        mixer
            .channels()
            .into_iter()
            .filter(|&ch| mixer.is_playing(ch).unwrap_or(false))
            .collect()
    }

    fn check(&self, channel: ChannelId) -> Result<()> {
        if self.faulty.lock().contains(&channel) {
            return Err(Error::Engine(format!("injected failure on {channel}")));
        }
        Ok(())
    }

    fn lookup_length(&self, path: &Path) -> Result<u64> {
        if let Some(length) = self.catalog.lock().get(path) {
            return Ok(*length);
        }
        if self.probe_files {
            return decode::probe_length_ms(path);
        }
        Err(Error::not_found("sound file", path.display().to_string()))
    }
}

impl AudioEngine for VirtualEngine {
    fn create_sound(&self, path: &Path, mode: SoundMode) -> Result<SoundId> {
        let length = self.lookup_length(path)?;
        let id = self.mixer.lock().insert_sound(SoundData::silent(path, length));
        debug!("Created {id} ({mode:?}) for {}", path.display());
        Ok(id)
    }

    fn sound_length(&self, sound: SoundId) -> Result<u64> {
        self.mixer.lock().sound_length(sound)
    }

    fn release_sound(&self, sound: SoundId) -> Result<()> {
        self.mixer.lock().release_sound(sound)
    }

    fn play(&self, sound: SoundId, paused: bool) -> Result<ChannelId> {
        self.mixer.lock().play(sound, paused)
    }

    fn stop(&self, channel: ChannelId) -> Result<()> {
        self.faulty.lock().remove(&channel);
        self.mixer.lock().stop(channel)
    }

    fn set_volume(&self, channel: ChannelId, volume: f32) -> Result<()> {
        self.check(channel)?;
        self.mixer.lock().set_volume(channel, volume)
    }

    fn volume(&self, channel: ChannelId) -> Result<f32> {
        self.check(channel)?;
        self.mixer.lock().volume(channel)
    }

    fn set_pitch(&self, channel: ChannelId, pitch: f32) -> Result<()> {
        self.check(channel)?;
        self.mixer.lock().set_pitch(channel, pitch)
    }

    fn pitch(&self, channel: ChannelId) -> Result<f32> {
        self.check(channel)?;
        self.mixer.lock().pitch(channel)
    }

    fn set_position(&self, channel: ChannelId, position_ms: u64) -> Result<()> {
        self.check(channel)?;
        self.mixer.lock().set_position(channel, position_ms)
    }

    fn position(&self, channel: ChannelId) -> Result<u64> {
        self.check(channel)?;
        self.mixer.lock().position(channel)
    }

    fn is_playing(&self, channel: ChannelId) -> Result<bool> {
        self.check(channel)?;
        self.mixer.lock().is_playing(channel)
    }

    fn set_paused(&self, channel: ChannelId, paused: bool) -> Result<()> {
        self.check(channel)?;
        self.mixer.lock().set_paused(channel, paused)
    }

    fn is_paused(&self, channel: ChannelId) -> Result<bool> {
        self.check(channel)?;
        self.mixer.lock().is_paused(channel)
    }

    fn current_sound(&self, channel: ChannelId) -> Result<SoundId> {
        self.check(channel)?;
        self.mixer.lock().current_sound(channel)
    }

    fn update(&self, elapsed: Duration) -> Result<()> {
        self.mixer.lock().advance(elapsed);
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.mixer.lock().stop_all();
        self.faulty.lock().clear();
        info!("Virtual engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_file_is_not_found() {
        let engine = VirtualEngine::new();
        let result = engine.create_sound(Path::new("missing.mp3"), SoundMode::Stream);
        assert!(matches!(result, Err(Error::ResourceNotFound { .. })));
    }

    #[test]
    fn test_playback_follows_clock() {
        let engine = VirtualEngine::new();
        engine.insert_sound("song.mp3", 2_000);
        let sound = engine
            .create_sound(Path::new("song.mp3"), SoundMode::Stream)
            .unwrap();
        assert_eq!(engine.sound_length(sound).unwrap(), 2_000);

        let channel = engine.play(sound, false).unwrap();
        engine.update(Duration::from_millis(1_500)).unwrap();
        assert_eq!(engine.position(channel).unwrap(), 1_500);
        assert_eq!(engine.playing_channels(), vec![channel]);

        engine.update(Duration::from_millis(600)).unwrap();
        assert!(!engine.is_playing(channel).unwrap());
        assert!(engine.playing_channels().is_empty());
        assert_eq!(engine.channels(), vec![channel]);
    }

    #[test]
    fn test_injected_failure() {
        let engine = VirtualEngine::new();
        engine.insert_sound("song.mp3", 2_000);
        let sound = engine
            .create_sound(Path::new("song.mp3"), SoundMode::Stream)
            .unwrap();
        let channel = engine.play(sound, false).unwrap();

        engine.fail_channel(channel);
        assert!(engine.is_playing(channel).is_err());
        assert!(engine.position(channel).unwrap_err().is_engine_failure());

        engine.stop(channel).unwrap();
        assert!(engine.channels().is_empty());
    }

    #[test]
    fn test_shutdown_stops_channels() {
        let engine = VirtualEngine::new();
        engine.insert_sound("song.mp3", 2_000);
        let sound = engine
            .create_sound(Path::new("song.mp3"), SoundMode::Stream)
            .unwrap();
        engine.play(sound, false).unwrap();
        engine.shutdown().unwrap();
        assert!(engine.channels().is_empty());
    }
}
