//! Announcement sequencing and the daily announcement schedule.
//!
//! An announcement runs as a ducking state machine:
//!
//! ```text
//! Idle -> DuckingIn -> [PlayingSfxBefore] -> PlayingAnnouncement
//!      -> [PlayingSfxAfter] -> DuckingOut -> Idle
//! ```
//!
//! The sound effect stages are skipped when disabled or not loaded. Ducking
//! works through [`MixLevels::duck`](crate::mix::MixLevels), and every
//! registered [`VolumeSink`] is refreshed whenever the duck factor changes.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use backbeat_audio::{AudioEngine, ChannelId, SoundId, SoundMode};
use backbeat_core::{
    Error, LockManager, ResourceGuard, ResourceType, Result, Schedule, ScheduledAnnouncement,
    DEFAULT_LOCK_TIMEOUT,
};
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::channel;
use crate::crossfade::Ramp;
use crate::mix::{SharedLevels, VolumeSink};

const SEQUENCER_LOCK: &str = "sequencer";

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Duck factor applied to music while an announcement plays.
    pub duck_volume: f32,
    pub duck_fade: Duration,
    pub lead_sfx_enabled: bool,
    pub trail_sfx_enabled: bool,
    pub lock_timeout: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            duck_volume: 0.3,
            duck_fade: Duration::from_secs(1),
            lead_sfx_enabled: true,
            trail_sfx_enabled: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Stage of the announcement sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceState {
    #[default]
    Idle,
    DuckingIn,
    PlayingSfxBefore,
    PlayingAnnouncement,
    PlayingSfxAfter,
    DuckingOut,
}

impl SequenceState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DuckingIn => "ducking in",
            Self::PlayingSfxBefore => "lead sfx",
            Self::PlayingAnnouncement => "announcement",
            Self::PlayingSfxAfter => "trail sfx",
            Self::DuckingOut => "ducking out",
        }
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Announcement {
    path: PathBuf,
    sound: SoundId,
}

#[derive(Debug)]
struct SequencerState {
    announcements: BTreeMap<String, Announcement>,
    lead_sfx: Option<SoundId>,
    trail_sfx: Option<SoundId>,
    lead_sfx_enabled: bool,
    trail_sfx_enabled: bool,
    duck_volume: f32,
    duck_fade: Duration,

    phase: SequenceState,
    ramp: Ramp,
    /// Announcement the running sequence plays.
    pending: Option<String>,
    channel: Option<ChannelId>,

    schedule: Schedule,
    last_scan_date: Option<NaiveDate>,
}

/// Plays announcements over ducked music.
pub struct AnnouncementSequencer {
    engine: Arc<dyn AudioEngine>,
    locks: Arc<LockManager>,
    levels: SharedLevels,
    lock_timeout: Duration,
    state: Mutex<SequencerState>,
    sinks: Mutex<Vec<Arc<dyn VolumeSink>>>,
}

impl AnnouncementSequencer {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        locks: Arc<LockManager>,
        levels: SharedLevels,
        config: SequencerConfig,
    ) -> Self {
        Self {
            engine,
            locks,
            levels,
            lock_timeout: config.lock_timeout,
            state: Mutex::new(SequencerState {
                announcements: BTreeMap::new(),
                lead_sfx: None,
                trail_sfx: None,
                lead_sfx_enabled: config.lead_sfx_enabled,
                trail_sfx_enabled: config.trail_sfx_enabled,
                duck_volume: config.duck_volume.clamp(0.0, 1.0),
                duck_fade: config.duck_fade,
                phase: SequenceState::Idle,
                ramp: Ramp::new(config.duck_fade),
                pending: None,
                channel: None,
                schedule: Schedule::new(),
                last_scan_date: None,
            }),
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Register a service whose music volumes follow the duck factor.
    pub fn add_volume_sink(&self, sink: Arc<dyn VolumeSink>) {
        self.sinks.lock().push(sink);
    }

    // ---- Library ----

    pub fn register_announcement(&self, id: &str, path: &Path) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "Announcement id must not be empty".into(),
            ));
        }
        let _guard = self.lock()?;
        if self.state.lock().announcements.contains_key(id) {
            return Err(Error::already_exists("announcement", id));
        }

        let sound = self.engine.create_sound(path, SoundMode::Stream)?;
        self.state.lock().announcements.insert(
            id.to_string(),
            Announcement {
                path: path.to_path_buf(),
                sound,
            },
        );
        info!("Registered announcement {id} ({})", path.display());
        Ok(())
    }

    /// Registered announcement ids with their files.
    pub fn announcements(&self) -> Vec<(String, PathBuf)> {
        self.state
            .lock()
            .announcements
            .iter()
            .map(|(id, a)| (id.clone(), a.path.clone()))
            .collect()
    }

    /// Load (or with `None`, unload) the effect played before announcements.
    pub fn set_lead_sfx(&self, path: Option<&Path>) -> Result<()> {
        self.replace_sfx(path, |st| &mut st.lead_sfx, "lead")
    }

    /// Load (or with `None`, unload) the effect played after announcements.
    pub fn set_trail_sfx(&self, path: Option<&Path>) -> Result<()> {
        self.replace_sfx(path, |st| &mut st.trail_sfx, "trail")
    }

    fn replace_sfx(
        &self,
        path: Option<&Path>,
        slot: fn(&mut SequencerState) -> &mut Option<SoundId>,
        label: &str,
    ) -> Result<()> {
        let _guard = self.lock()?;
        let sound = path
            .map(|p| self.engine.create_sound(p, SoundMode::Sample))
            .transpose()?;

        let previous = std::mem::replace(slot(&mut self.state.lock()), sound);
        if let Some(previous) = previous {
            if let Err(e) = self.engine.release_sound(previous) {
                debug!("Releasing previous {label} sfx failed: {e}");
            }
        }
        match path {
            Some(p) => info!("Loaded {label} sfx {}", p.display()),
            None => info!("Cleared {label} sfx"),
        }
        Ok(())
    }

    pub fn set_lead_sfx_enabled(&self, enabled: bool) -> Result<()> {
        let _guard = self.lock()?;
        self.state.lock().lead_sfx_enabled = enabled;
        Ok(())
    }

    pub fn set_trail_sfx_enabled(&self, enabled: bool) -> Result<()> {
        let _guard = self.lock()?;
        self.state.lock().trail_sfx_enabled = enabled;
        Ok(())
    }

    /// Takes effect from the next ramp.
    pub fn set_duck_volume(&self, volume: f32) -> Result<()> {
        let _guard = self.lock()?;
        self.state.lock().duck_volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn set_duck_fade(&self, fade: Duration) -> Result<()> {
        let _guard = self.lock()?;
        self.state.lock().duck_fade = fade;
        Ok(())
    }

    // ---- Sequence ----

    /// Start the sequence for `id`, interrupting any sequence in progress.
    pub fn play_announcement(&self, id: &str) -> Result<()> {
        let _guard = self.lock()?;
        {
            let mut st = self.state.lock();
            if !st.announcements.contains_key(id) {
                return Err(Error::not_found("announcement", id));
            }
            if st.phase != SequenceState::Idle {
                info!(
                    "Interrupting announcement {} ({})",
                    st.pending.as_deref().unwrap_or("?"),
                    st.phase
                );
                self.abort(&mut st);
            }

            st.pending = Some(id.to_string());
            st.ramp = Ramp::new(st.duck_fade);
            st.phase = SequenceState::DuckingIn;
            info!("Starting announcement {id}");
        }
        self.refresh_sinks();
        Ok(())
    }

    /// Abort the running sequence and restore the music level.
    pub fn stop_announcement(&self) -> Result<()> {
        let _guard = self.lock()?;
        {
            let mut st = self.state.lock();
            if st.phase == SequenceState::Idle {
                return Ok(());
            }
            info!(
                "Stopping announcement {}",
                st.pending.as_deref().unwrap_or("?")
            );
            self.abort(&mut st);
        }
        self.refresh_sinks();
        Ok(())
    }

    pub fn state(&self) -> SequenceState {
        self.state.lock().phase
    }

    pub fn is_active(&self) -> bool {
        self.state() != SequenceState::Idle
    }

    /// Announcement the running sequence plays.
    pub fn current_announcement(&self) -> Option<String> {
        self.state.lock().pending.clone()
    }

    /// Advance the sequence by `elapsed`.
    pub fn update(&self, elapsed: Duration) -> Result<()> {
        let _guard = self.lock()?;
        let refresh = {
            let mut st = self.state.lock();
            self.step(&mut st, elapsed)
        };
        if refresh {
            self.refresh_sinks();
        }
        Ok(())
    }

    /// Returns whether the duck factor changed.
    fn step(&self, st: &mut SequencerState, elapsed: Duration) -> bool {
        match st.phase {
            SequenceState::Idle => false,
            SequenceState::DuckingIn => {
                st.ramp.advance(elapsed);
                let p = st.ramp.progress();
                self.set_duck(1.0 - (1.0 - st.duck_volume) * p);
                if st.ramp.is_complete() {
                    self.enter_lead(st);
                }
                true
            }
            SequenceState::PlayingSfxBefore => {
                if self.channel_finished(st) {
                    self.enter_announcement(st);
                    return true;
                }
                false
            }
            SequenceState::PlayingAnnouncement => {
                if self.channel_finished(st) {
                    debug!(
                        "Announcement {} finished",
                        st.pending.as_deref().unwrap_or("?")
                    );
                    self.enter_trail(st);
                    return true;
                }
                false
            }
            SequenceState::PlayingSfxAfter => {
                if self.channel_finished(st) {
                    self.enter_ducking_out(st);
                    return true;
                }
                false
            }
            SequenceState::DuckingOut => {
                st.ramp.advance(elapsed);
                let p = st.ramp.progress();
                self.set_duck(st.duck_volume + (1.0 - st.duck_volume) * p);
                if st.ramp.is_complete() {
                    self.set_duck(1.0);
                    st.phase = SequenceState::Idle;
                    let finished = st.pending.take();
                    info!(
                        "Announcement {} complete",
                        finished.as_deref().unwrap_or("?")
                    );
                }
                true
            }
        }
    }

    fn enter_lead(&self, st: &mut SequencerState) {
        match st.lead_sfx.filter(|_| st.lead_sfx_enabled) {
            Some(sound) if self.start_channel(st, sound, "lead sfx") => {
                self.transition(st, SequenceState::PlayingSfxBefore);
            }
            _ => self.enter_announcement(st),
        }
    }

    fn enter_announcement(&self, st: &mut SequencerState) {
        let sound = st
            .pending
            .as_ref()
            .and_then(|id| st.announcements.get(id))
            .map(|a| a.sound);
        match sound {
            Some(sound) if self.start_channel(st, sound, "announcement") => {
                self.transition(st, SequenceState::PlayingAnnouncement);
            }
            _ => {
                error!(
                    "Announcement {} could not be played",
                    st.pending.as_deref().unwrap_or("?")
                );
                self.enter_trail(st);
            }
        }
    }

    fn enter_trail(&self, st: &mut SequencerState) {
        match st.trail_sfx.filter(|_| st.trail_sfx_enabled) {
            Some(sound) if self.start_channel(st, sound, "trail sfx") => {
                self.transition(st, SequenceState::PlayingSfxAfter);
            }
            _ => self.enter_ducking_out(st),
        }
    }

    fn enter_ducking_out(&self, st: &mut SequencerState) {
        self.stop_channel(st);
        st.ramp = Ramp::new(st.duck_fade);
        self.transition(st, SequenceState::DuckingOut);
    }

    fn transition(&self, st: &mut SequencerState, to: SequenceState) {
        debug!("Announcement sequence: {} -> {to}", st.phase);
        st.phase = to;
    }

    /// Replace the sequence channel with `sound`. Returns false on failure.
    fn start_channel(&self, st: &mut SequencerState, sound: SoundId, what: &str) -> bool {
        self.stop_channel(st);
        let volume = self.levels.read().announcement_gain();
        match channel::start(self.engine.as_ref(), sound, 0, volume) {
            Ok(ch) => {
                st.channel = Some(ch);
                true
            }
            Err(e) => {
                warn!("Could not play {what}: {e}");
                false
            }
        }
    }

    fn channel_finished(&self, st: &SequencerState) -> bool {
        let Some(ch) = st.channel else {
            return true;
        };
        match self.engine.is_playing(ch) {
            Ok(playing) => {
                trace!("Sequence channel {ch} playing: {playing}");
                !playing
            }
            Err(e) => {
                warn!("Sequence channel {ch} failed ({e}), moving on");
                true
            }
        }
    }

    fn stop_channel(&self, st: &mut SequencerState) {
        if let Some(ch) = st.channel.take() {
            channel::stop_quietly(self.engine.as_ref(), ch);
        }
    }

    fn abort(&self, st: &mut SequencerState) {
        self.stop_channel(st);
        st.phase = SequenceState::Idle;
        st.pending = None;
        self.set_duck(1.0);
    }

    fn set_duck(&self, duck: f32) {
        self.levels.write().duck = duck.clamp(0.0, 1.0);
    }

    fn refresh_sinks(&self) {
        let sinks = self.sinks.lock().clone();
        for sink in sinks {
            sink.refresh_volumes();
        }
    }

    // ---- Schedule ----

    /// Fire the first due schedule entry. Returns the announcement started.
    ///
    /// Triggered flags are cleared when the date differs from the previous
    /// scan. A due entry interrupts any sequence that is still running.
    pub fn poll_schedule(&self, now: NaiveDateTime) -> Result<Option<String>> {
        let _guard = self.lock()?;
        let id = {
            let mut st = self.state.lock();
            let today = now.date();
            if st.last_scan_date.is_some_and(|date| date != today) {
                info!("New day ({today}), resetting announcement schedule");
                st.schedule.reset();
            }
            st.last_scan_date = Some(today);

            let Some(index) = st.schedule.next_due(&now.time()) else {
                return Ok(None);
            };
            st.schedule.mark_triggered(index);
            match st.schedule.get(index) {
                Some(entry) => {
                    info!(
                        "Scheduled announcement {} at {}",
                        entry.announcement_id,
                        entry.time_label()
                    );
                    entry.announcement_id.clone()
                }
                None => return Ok(None),
            }
        };

        self.play_announcement(&id)?;
        Ok(Some(id))
    }

    /// Add a schedule entry for a registered announcement. Returns its index.
    pub fn add_schedule(&self, hour: u8, minute: u8, announcement_id: &str) -> Result<usize> {
        let entry = ScheduledAnnouncement::new(hour, minute, announcement_id)?;
        let _guard = self.lock()?;
        let mut st = self.state.lock();
        if !st.announcements.contains_key(announcement_id) {
            return Err(Error::not_found("announcement", announcement_id));
        }
        let index = st.schedule.add(entry)?;
        debug!("Scheduled {announcement_id} at {hour:02}:{minute:02}");
        Ok(index)
    }

    pub fn update_schedule(
        &self,
        index: usize,
        hour: u8,
        minute: u8,
        announcement_id: &str,
    ) -> Result<()> {
        let _guard = self.lock()?;
        let mut st = self.state.lock();
        if !st.announcements.contains_key(announcement_id) {
            return Err(Error::not_found("announcement", announcement_id));
        }
        st.schedule.update(index, hour, minute, announcement_id)
    }

    pub fn remove_schedule(&self, index: usize) -> Result<ScheduledAnnouncement> {
        let _guard = self.lock()?;
        self.state.lock().schedule.remove(index)
    }

    /// Clear every triggered flag.
    pub fn reset_schedule(&self) -> Result<()> {
        let _guard = self.lock()?;
        self.state.lock().schedule.reset();
        info!("Announcement schedule reset");
        Ok(())
    }

    pub fn schedule(&self) -> Vec<ScheduledAnnouncement> {
        self.state.lock().schedule.entries().to_vec()
    }

    /// Abort any sequence and release every loaded sound.
    pub fn shutdown(&self) -> Result<()> {
        let _guard = match self.lock() {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!("Shutting down sequencer without its lock: {e}");
                None
            }
        };
        let mut st = self.state.lock();
        self.abort(&mut st);

        let announcements = std::mem::take(&mut st.announcements);
        let sounds = announcements
            .into_values()
            .map(|a| a.sound)
            .chain(st.lead_sfx.take())
            .chain(st.trail_sfx.take());
        for sound in sounds {
            if let Err(e) = self.engine.release_sound(sound) {
                debug!("Releasing {sound} failed: {e}");
            }
        }
        info!("Announcement sequencer shut down");
        Ok(())
    }

    fn lock(&self) -> Result<ResourceGuard<'_>> {
        self.locks
            .lock(ResourceType::Announcement, SEQUENCER_LOCK, self.lock_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::{shared_levels, MixLevels};
    use backbeat_audio::VirtualEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_millis(100);

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl VolumeSink for CountingSink {
        fn refresh_volumes(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Fixture {
        engine: Arc<VirtualEngine>,
        levels: SharedLevels,
        seq: AnnouncementSequencer,
        sink: Arc<CountingSink>,
    }

    impl Fixture {
        fn new() -> Self {
            let engine = Arc::new(VirtualEngine::new());
            engine.insert_sound("/ann/welcome.mp3", 2_000);
            engine.insert_sound("/ann/closing.mp3", 3_000);
            engine.insert_sound("/sfx/chime.wav", 500);

            let levels = shared_levels(MixLevels::default());
            let seq = AnnouncementSequencer::new(
                engine.clone(),
                Arc::new(LockManager::new()),
                levels.clone(),
                SequencerConfig::default(),
            );
            seq.register_announcement("welcome", Path::new("/ann/welcome.mp3"))
                .unwrap();
            seq.register_announcement("closing", Path::new("/ann/closing.mp3"))
                .unwrap();
            let sink = Arc::new(CountingSink::default());
            seq.add_volume_sink(sink.clone());

            Self {
                engine,
                levels,
                seq,
                sink,
            }
        }

        fn with_sfx() -> Self {
            let fx = Self::new();
            fx.seq.set_lead_sfx(Some(Path::new("/sfx/chime.wav"))).unwrap();
            fx.seq.set_trail_sfx(Some(Path::new("/sfx/chime.wav"))).unwrap();
            fx
        }

        fn tick(&self, n: usize) {
            for _ in 0..n {
                self.engine.update(TICK).unwrap();
                self.seq.update(TICK).unwrap();
            }
        }

        fn duck(&self) -> f32 {
            self.levels.read().duck
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_full_sequence_with_sfx() {
        let fx = Fixture::with_sfx();
        fx.seq.play_announcement("welcome").unwrap();
        assert_eq!(fx.seq.state(), SequenceState::DuckingIn);

        fx.tick(5);
        assert!((fx.duck() - 0.65).abs() < 1e-5);

        fx.tick(5);
        assert_eq!(fx.seq.state(), SequenceState::PlayingSfxBefore);
        assert!((fx.duck() - 0.3).abs() < 1e-6);

        fx.tick(5);
        assert_eq!(fx.seq.state(), SequenceState::PlayingAnnouncement);
        fx.tick(20);
        assert_eq!(fx.seq.state(), SequenceState::PlayingSfxAfter);
        fx.tick(5);
        assert_eq!(fx.seq.state(), SequenceState::DuckingOut);
        fx.tick(10);
        assert_eq!(fx.seq.state(), SequenceState::Idle);
        assert!((fx.duck() - 1.0).abs() < f32::EPSILON);
        assert!(fx.engine.playing_channels().is_empty());
        assert_eq!(fx.seq.current_announcement(), None);
    }

    #[test]
    fn test_disabled_sfx_are_skipped() {
        let fx = Fixture::with_sfx();
        fx.seq.set_lead_sfx_enabled(false).unwrap();
        fx.seq.set_trail_sfx_enabled(false).unwrap();
        fx.seq.play_announcement("welcome").unwrap();

        fx.tick(10);
        assert_eq!(fx.seq.state(), SequenceState::PlayingAnnouncement);
        fx.tick(20);
        assert_eq!(fx.seq.state(), SequenceState::DuckingOut);
    }

    #[test]
    fn test_missing_sfx_are_skipped() {
        let fx = Fixture::new();
        fx.seq.play_announcement("welcome").unwrap();
        fx.tick(10);
        assert_eq!(fx.seq.state(), SequenceState::PlayingAnnouncement);
    }

    #[test]
    fn test_announcement_volume_uses_levels() {
        let fx = Fixture::new();
        {
            let mut levels = fx.levels.write();
            levels.master = 0.8;
            levels.announcement = 0.5;
        }
        fx.seq.play_announcement("welcome").unwrap();
        fx.tick(10);

        let ch = fx.seq.state.lock().channel.unwrap();
        assert!((fx.engine.volume(ch).unwrap() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_sinks_refreshed_while_ducking() {
        let fx = Fixture::new();
        fx.seq.play_announcement("welcome").unwrap();
        let after_start = fx.sink.0.load(Ordering::Relaxed);
        assert!(after_start >= 1);
        fx.tick(3);
        assert_eq!(fx.sink.0.load(Ordering::Relaxed), after_start + 3);
    }

    #[test]
    fn test_play_interrupts_running_sequence() {
        let fx = Fixture::new();
        fx.seq.play_announcement("welcome").unwrap();
        fx.tick(12);
        assert_eq!(fx.seq.state(), SequenceState::PlayingAnnouncement);

        fx.seq.play_announcement("closing").unwrap();
        assert_eq!(fx.seq.state(), SequenceState::DuckingIn);
        assert_eq!(fx.seq.current_announcement().as_deref(), Some("closing"));
        assert!((fx.duck() - 1.0).abs() < f32::EPSILON);
        assert!(fx.engine.channels().is_empty());
    }

    #[test]
    fn test_stop_restores_music() {
        let fx = Fixture::new();
        fx.seq.play_announcement("welcome").unwrap();
        fx.tick(12);
        fx.seq.stop_announcement().unwrap();

        assert_eq!(fx.seq.state(), SequenceState::Idle);
        assert!((fx.duck() - 1.0).abs() < f32::EPSILON);
        assert!(fx.engine.channels().is_empty());
        fx.seq.stop_announcement().unwrap();
    }

    #[test]
    fn test_failed_channel_moves_on() {
        let fx = Fixture::new();
        fx.seq.play_announcement("welcome").unwrap();
        fx.tick(10);
        let ch = fx.seq.state.lock().channel.unwrap();
        fx.engine.fail_channel(ch);

        fx.tick(1);
        assert_eq!(fx.seq.state(), SequenceState::DuckingOut);
        fx.tick(10);
        assert_eq!(fx.seq.state(), SequenceState::Idle);
    }

    #[test]
    fn test_library_errors() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.seq.play_announcement("nope"),
            Err(Error::ResourceNotFound { .. })
        ));
        assert!(matches!(
            fx.seq
                .register_announcement("welcome", Path::new("/ann/welcome.mp3")),
            Err(Error::AlreadyExists { .. })
        ));
        assert!(fx
            .seq
            .register_announcement("ghost", Path::new("/ann/ghost.mp3"))
            .is_err());
        assert_eq!(fx.seq.announcements().len(), 2);
        assert_eq!(fx.seq.state(), SequenceState::Idle);
    }

    #[test]
    fn test_replacing_sfx_releases_previous() {
        let fx = Fixture::new();
        fx.seq.set_lead_sfx(Some(Path::new("/sfx/chime.wav"))).unwrap();
        let first = fx.seq.state.lock().lead_sfx.unwrap();
        fx.seq.set_lead_sfx(Some(Path::new("/sfx/chime.wav"))).unwrap();

        assert!(fx.engine.sound_length(first).is_err());
        fx.seq.set_lead_sfx(None).unwrap();
        assert!(fx.seq.state.lock().lead_sfx.is_none());
    }

    #[test]
    fn test_schedule_fires_once_per_day() {
        let fx = Fixture::new();
        fx.seq.add_schedule(9, 30, "welcome").unwrap();

        assert_eq!(fx.seq.poll_schedule(at(1, 9, 29)).unwrap(), None);
        assert_eq!(
            fx.seq.poll_schedule(at(1, 9, 30)).unwrap().as_deref(),
            Some("welcome")
        );
        fx.seq.stop_announcement().unwrap();
        assert_eq!(fx.seq.poll_schedule(at(1, 9, 30)).unwrap(), None);
        assert!(fx.seq.schedule()[0].triggered);

        assert_eq!(
            fx.seq.poll_schedule(at(2, 9, 30)).unwrap().as_deref(),
            Some("welcome")
        );
    }

    #[test]
    fn test_due_entry_interrupts_running_sequence() {
        let fx = Fixture::new();
        fx.seq.add_schedule(12, 0, "welcome").unwrap();
        fx.seq.add_schedule(12, 0, "closing").unwrap();

        assert_eq!(
            fx.seq.poll_schedule(at(1, 12, 0)).unwrap().as_deref(),
            Some("welcome")
        );
        fx.tick(12);
        assert_eq!(fx.seq.state(), SequenceState::PlayingAnnouncement);

        assert_eq!(
            fx.seq.poll_schedule(at(1, 12, 0)).unwrap().as_deref(),
            Some("closing")
        );
        assert_eq!(fx.seq.state(), SequenceState::DuckingIn);
        assert_eq!(fx.seq.current_announcement().as_deref(), Some("closing"));
        assert!(fx.seq.schedule().iter().all(|entry| entry.triggered));
        assert_eq!(fx.seq.poll_schedule(at(1, 12, 0)).unwrap(), None);
    }

    #[test]
    fn test_long_announcement_does_not_swallow_later_entry() {
        let fx = Fixture::new();
        fx.engine.insert_sound("/ann/long.mp3", 90_000);
        fx.seq
            .register_announcement("long", Path::new("/ann/long.mp3"))
            .unwrap();
        fx.seq.add_schedule(12, 0, "long").unwrap();
        fx.seq.add_schedule(12, 1, "welcome").unwrap();

        let start = at(1, 12, 0);
        let mut fired = Vec::new();
        for step in 0..1_200 {
            let now = start + chrono::Duration::milliseconds(step * 100);
            if let Some(id) = fx.seq.poll_schedule(now).unwrap() {
                fired.push(id);
            }
            fx.tick(1);
        }
        assert_eq!(fired, ["long", "welcome"]);
    }

    #[test]
    fn test_schedule_table_operations() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.seq.add_schedule(8, 0, "nope"),
            Err(Error::ResourceNotFound { .. })
        ));
        assert!(matches!(
            fx.seq.add_schedule(24, 0, "welcome"),
            Err(Error::InvalidArgument(_))
        ));

        let index = fx.seq.add_schedule(8, 0, "welcome").unwrap();
        fx.seq.update_schedule(index, 8, 15, "closing").unwrap();
        let entry = &fx.seq.schedule()[index];
        assert_eq!(entry.time_label(), "08:15");
        assert_eq!(entry.announcement_id, "closing");

        fx.seq.poll_schedule(at(1, 8, 15)).unwrap();
        assert!(fx.seq.schedule()[index].triggered);
        fx.seq.reset_schedule().unwrap();
        assert!(!fx.seq.schedule()[index].triggered);

        fx.seq.remove_schedule(index).unwrap();
        assert!(fx.seq.schedule().is_empty());
        assert!(fx.seq.remove_schedule(0).is_err());
    }

    #[test]
    fn test_settings_wait_for_sequencer_lock() {
        let fx = Fixture::new();
        fx.seq.set_duck_volume(0.5).unwrap();
        fx.seq.set_duck_fade(Duration::from_millis(500)).unwrap();

        let locks = fx.seq.locks.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            locks
                .acquire(ResourceType::Announcement, SEQUENCER_LOCK, DEFAULT_LOCK_TIMEOUT)
                .unwrap();
            tx.send(()).unwrap();
            let _ = done_rx.recv();
            locks.release(ResourceType::Announcement, SEQUENCER_LOCK);
        });
        rx.recv().unwrap();
        assert!(fx.seq.set_duck_volume(0.1).unwrap_err().is_transient());
        assert!(fx.seq.set_lead_sfx_enabled(false).is_err());
        done_tx.send(()).unwrap();
        holder.join().unwrap();

        fx.seq.play_announcement("welcome").unwrap();
        fx.tick(5);
        assert!((fx.duck() - 0.5).abs() < 1e-5);
        assert_eq!(fx.seq.state(), SequenceState::PlayingAnnouncement);
    }

    #[test]
    fn test_shutdown_releases_sounds() {
        let fx = Fixture::with_sfx();
        fx.seq.play_announcement("welcome").unwrap();
        fx.tick(12);
        fx.seq.shutdown().unwrap();

        assert_eq!(fx.seq.state(), SequenceState::Idle);
        assert!(fx.seq.announcements().is_empty());
        assert!(fx.engine.channels().is_empty());
    }
}
