//! The audio engine interface consumed by the playback services.
//!
//! Sounds and channels are addressed by small `Copy` handles. A handle stays
//! valid until the sound is released or the channel is stopped; after that
//! every call on it fails with [`Error::Engine`](backbeat_core::Error::Engine).
//! A channel that reaches the end of its sound stays valid and reports
//! `is_playing() == Ok(false)` until it is stopped.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use backbeat_core::Result;

/// Handle to a loaded sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SoundId(pub u64);

/// Handle to a live playback instance of a sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sound#{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// How a sound is held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoundMode {
    /// Long music file.
    #[default]
    Stream,
    /// Short effect or announcement.
    Sample,
}

/// Engine that owns sounds and mixes playing channels.
///
/// Every call may fail; callers log the failure and treat the call as
/// having had no effect.
pub trait AudioEngine: Send + Sync {
    /// Load a sound from disk.
    fn create_sound(&self, path: &Path, mode: SoundMode) -> Result<SoundId>;

    /// Length of a sound in milliseconds.
    fn sound_length(&self, sound: SoundId) -> Result<u64>;

    /// Free a sound, stopping any channel still playing it.
    fn release_sound(&self, sound: SoundId) -> Result<()>;

    /// Start a new channel for `sound`, optionally paused.
    fn play(&self, sound: SoundId, paused: bool) -> Result<ChannelId>;

    /// Stop a channel and invalidate its handle.
    fn stop(&self, channel: ChannelId) -> Result<()>;

    fn set_volume(&self, channel: ChannelId, volume: f32) -> Result<()>;

    fn volume(&self, channel: ChannelId) -> Result<f32>;

    fn set_pitch(&self, channel: ChannelId, pitch: f32) -> Result<()>;

    fn pitch(&self, channel: ChannelId) -> Result<f32>;

    /// Seek a channel to `position_ms`.
    fn set_position(&self, channel: ChannelId, position_ms: u64) -> Result<()>;

    /// Current playback position in milliseconds.
    fn position(&self, channel: ChannelId) -> Result<u64>;

    /// Whether the channel is still producing audio (paused counts as playing).
    fn is_playing(&self, channel: ChannelId) -> Result<bool>;

    fn set_paused(&self, channel: ChannelId, paused: bool) -> Result<()>;

    fn is_paused(&self, channel: ChannelId) -> Result<bool>;

    /// Sound a channel was started from.
    fn current_sound(&self, channel: ChannelId) -> Result<SoundId>;

    /// Per-tick housekeeping.
    fn update(&self, _elapsed: Duration) -> Result<()> {
        Ok(())
    }

    /// Stop everything and release the output device.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
