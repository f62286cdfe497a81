//! Engine backed by the system output device.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use backbeat_core::{Error, Result};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::decode;
use crate::engine::{AudioEngine, ChannelId, SoundId, SoundMode};
use crate::mixer::{Mixer, SoundData};
use crate::output::AudioOutput;

/// Commands for the output thread.
#[derive(Debug, Clone, Copy)]
enum OutputCommand {
    Shutdown,
}

/// Audio engine that renders into a cpal stream.
///
/// The stream lives on its own thread because `cpal::Stream` is not `Send`;
/// the rest of the engine talks to it only through the shared mixer.
pub struct DeviceEngine {
    mixer: Arc<Mutex<Mixer>>,
    command_tx: Sender<OutputCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sample_rate: u32,
}

impl DeviceEngine {
    /// Open the default device and start the output thread.
    pub fn new() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::new()));
        let (command_tx, command_rx) = bounded::<OutputCommand>(4);
        let (ready_tx, ready_rx) = bounded::<Result<u32>>(1);

        let mixer_clone = Arc::clone(&mixer);
        let worker = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match AudioOutput::new(mixer_clone) {
                Ok(output) => {
                    info!(
                        "Audio output initialized: {} Hz, {} channels, device: {}",
                        output.sample_rate(),
                        output.channels(),
                        output.device_name()
                    );
                    let _ = ready_tx.send(Ok(output.sample_rate()));

                    // Hold the stream until told to stop or the engine is dropped.
                    match command_rx.recv() {
                        Ok(OutputCommand::Shutdown) | Err(_) => {
                            debug!("Output thread exiting");
                        }
                    }
                    drop(output);
                }
                Err(e) => {
                    error!("Failed to initialize audio output: {e}");
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Output thread exited during startup".to_string()))??;

        Ok(Self {
            mixer,
            command_tx,
            worker: Mutex::new(Some(worker)),
            sample_rate,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioEngine for DeviceEngine {
    fn create_sound(&self, path: &Path, mode: SoundMode) -> Result<SoundId> {
        if !path.exists() {
            return Err(Error::not_found("sound file", path.display().to_string()));
        }
        let decoded = decode::load_pcm(path, self.sample_rate)?;
        let id = self.mixer.lock().insert_sound(SoundData::pcm(
            path,
            decoded.samples,
            decoded.sample_rate,
        ));
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
        self.mixer.lock().stop(channel)
    }

    fn set_volume(&self, channel: ChannelId, volume: f32) -> Result<()> {
        self.mixer.lock().set_volume(channel, volume)
    }

    fn volume(&self, channel: ChannelId) -> Result<f32> {
        self.mixer.lock().volume(channel)
    }

    fn set_pitch(&self, channel: ChannelId, pitch: f32) -> Result<()> {
        self.mixer.lock().set_pitch(channel, pitch)
    }

    fn pitch(&self, channel: ChannelId) -> Result<f32> {
        self.mixer.lock().pitch(channel)
    }

    fn set_position(&self, channel: ChannelId, position_ms: u64) -> Result<()> {
        self.mixer.lock().set_position(channel, position_ms)
    }

    fn position(&self, channel: ChannelId) -> Result<u64> {
        self.mixer.lock().position(channel)
    }

    fn is_playing(&self, channel: ChannelId) -> Result<bool> {
        self.mixer.lock().is_playing(channel)
    }

    fn set_paused(&self, channel: ChannelId, paused: bool) -> Result<()> {
        self.mixer.lock().set_paused(channel, paused)
    }

    fn is_paused(&self, channel: ChannelId) -> Result<bool> {
        self.mixer.lock().is_paused(channel)
    }

    fn current_sound(&self, channel: ChannelId) -> Result<SoundId> {
        self.mixer.lock().current_sound(channel)
    }

    fn shutdown(&self) -> Result<()> {
        self.mixer.lock().stop_all();

        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        if self.command_tx.send(OutputCommand::Shutdown).is_err() {
            warn!("Output thread already gone");
        }
        worker
            .join()
            .map_err(|_| Error::AudioOutput("Output thread panicked".to_string()))?;
        info!("Audio output closed");
        Ok(())
    }
}

impl Drop for DeviceEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error closing audio output: {e}");
        }
    }
}
