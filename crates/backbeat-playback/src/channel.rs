//! Engine call helpers shared by the playback services.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use backbeat_audio::{AudioEngine, ChannelId, SoundId};
use backbeat_core::Result;
use tracing::{debug, warn};

/// Start `sound` at `offset_ms` with `volume`. The channel is created paused
/// and only unpaused once positioned, so nothing is heard from the wrong
/// place. On failure the half-started channel is stopped.
pub fn start(
    engine: &dyn AudioEngine,
    sound: SoundId,
    offset_ms: u64,
    volume: f32,
) -> Result<ChannelId> {
    let channel = engine.play(sound, true)?;
    if let Err(e) = prepare(engine, channel, offset_ms, volume) {
        stop_quietly(engine, channel);
        return Err(e);
    }
    Ok(channel)
}

fn prepare(engine: &dyn AudioEngine, channel: ChannelId, offset_ms: u64, volume: f32) -> Result<()> {
    if offset_ms > 0 {
        engine.set_position(channel, offset_ms)?;
    }
    engine.set_volume(channel, volume)?;
    engine.set_paused(channel, false)
}

/// Stop a channel, logging instead of failing.
pub fn stop_quietly(engine: &dyn AudioEngine, channel: ChannelId) {
    if let Err(e) = engine.stop(channel) {
        debug!("Stopping {channel} failed: {e}");
    }
}

pub fn set_volume_logged(engine: &dyn AudioEngine, channel: ChannelId, volume: f32) {
    if let Err(e) = engine.set_volume(channel, volume) {
        warn!("Failed to set volume on {channel}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backbeat_audio::{SoundMode, VirtualEngine};
    use std::path::Path;

    #[test]
    fn test_start_at_offset() {
        let engine = VirtualEngine::new();
        engine.insert_sound("a.mp3", 10_000);
        let sound = engine
            .create_sound(Path::new("a.mp3"), SoundMode::Stream)
            .unwrap();

        let channel = start(&engine, sound, 4_000, 0.5).unwrap();
        assert_eq!(engine.position(channel).unwrap(), 4_000);
        assert!(!engine.is_paused(channel).unwrap());
        assert!((engine.volume(channel).unwrap() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_failed_seek_stops_channel() {
        let engine = VirtualEngine::new();
        engine.insert_sound("a.mp3", 1_000);
        let sound = engine
            .create_sound(Path::new("a.mp3"), SoundMode::Stream)
            .unwrap();

        assert!(start(&engine, sound, 5_000, 1.0).is_err());
        assert!(engine.channels().is_empty());
    }
}
