//! The runtime that owns every playback service.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;
use std::time::Duration;

use backbeat_audio::AudioEngine;
use backbeat_core::{Error, LockManager, Result, DEFAULT_LOCK_TIMEOUT};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::announcement::{AnnouncementSequencer, SequencerConfig};
use crate::mix::{shared_levels, MixLevels, SharedLevels, VolumeSink};
use crate::orchestrator::{OrchestratorConfig, PlaylistOrchestrator};
use crate::scheduler::{PlaybackScheduler, SchedulerConfig};

#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub orchestrator: OrchestratorConfig,
    pub scheduler: SchedulerConfig,
    pub sequencer: SequencerConfig,
    pub levels: MixLevels,
    /// Lock timeout applied to every service.
    pub lock_timeout: Duration,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            scheduler: SchedulerConfig::default(),
            sequencer: SequencerConfig::default(),
            levels: MixLevels::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Shared handles to the engine, the lock manager and all services.
pub struct Venue {
    engine: Arc<dyn AudioEngine>,
    locks: Arc<LockManager>,
    levels: SharedLevels,
    orchestrator: Arc<PlaylistOrchestrator>,
    scheduler: Arc<PlaybackScheduler>,
    sequencer: Arc<AnnouncementSequencer>,
}

impl Venue {
    /// Build every service on top of `engine` and wire ducking to the music
    /// services.
    pub fn init(engine: Arc<dyn AudioEngine>, mut config: VenueConfig) -> Self {
        config.orchestrator.lock_timeout = config.lock_timeout;
        config.scheduler.lock_timeout = config.lock_timeout;
        config.sequencer.lock_timeout = config.lock_timeout;

        let locks = Arc::new(LockManager::new());
        let levels = shared_levels(config.levels);

        let orchestrator = Arc::new(PlaylistOrchestrator::new(
            engine.clone(),
            locks.clone(),
            levels.clone(),
            config.orchestrator,
        ));
        let scheduler = Arc::new(PlaybackScheduler::new(
            engine.clone(),
            locks.clone(),
            levels.clone(),
            config.scheduler,
        ));
        let sequencer = Arc::new(AnnouncementSequencer::new(
            engine.clone(),
            locks.clone(),
            levels.clone(),
            config.sequencer,
        ));
        sequencer.add_volume_sink(orchestrator.clone());
        sequencer.add_volume_sink(scheduler.clone());

        info!("Venue initialized");
        Self {
            engine,
            locks,
            levels,
            orchestrator,
            scheduler,
            sequencer,
        }
    }

    /// Run one tick of every service. Failures are logged and the remaining
    /// services still run.
    pub fn tick(&self, elapsed: Duration, now: NaiveDateTime) {
        log_failure("engine update", self.engine.update(elapsed));
        log_failure("playlist update", self.orchestrator.update(elapsed));
        log_failure("scheduler update", self.scheduler.update(elapsed));
        log_failure("announcement update", self.sequencer.update(elapsed));
        match self.sequencer.poll_schedule(now) {
            Ok(Some(id)) => debug!("Schedule started announcement {id}"),
            Ok(None) => {}
            Err(e) => log_error("schedule scan", &e),
        }
    }

    /// Replace the shared mix levels and re-apply them to playing music.
    pub fn set_levels(&self, levels: MixLevels) {
        let duck = self.levels.read().duck;
        *self.levels.write() = MixLevels { duck, ..levels };
        self.orchestrator.refresh_volumes();
        self.scheduler.refresh_volumes();
    }

    pub fn levels(&self) -> MixLevels {
        *self.levels.read()
    }

    pub fn engine(&self) -> &Arc<dyn AudioEngine> {
        &self.engine
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn orchestrator(&self) -> &Arc<PlaylistOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.scheduler
    }

    pub fn sequencer(&self) -> &Arc<AnnouncementSequencer> {
        &self.sequencer
    }

    /// Stop everything, release every sound and drop every held lock.
    pub fn shutdown(&self) {
        log_failure("announcement shutdown", self.sequencer.shutdown());
        log_failure("playlist shutdown", self.orchestrator.shutdown());
        log_failure("scheduler shutdown", self.scheduler.clear());
        log_failure("engine shutdown", self.engine.shutdown());
        self.locks.release_all_locks();
        info!("Venue shut down");
    }
}

fn log_failure(what: &str, result: Result<()>) {
    if let Err(e) = result {
        log_error(what, &e);
    }
}

fn log_error(what: &str, e: &Error) {
    if e.is_transient() {
        debug!("Skipped {what}: {e}");
    } else {
        warn!("{what} failed: {e}");
    }
}
