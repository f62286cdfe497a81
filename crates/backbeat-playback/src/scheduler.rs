//! Single-sequence playback with two channels.
//!
//! Channel A plays the current track. When the track nears its end (or the
//! current segment nears its length in segment mode) channel B starts the
//! next track silently and the two crossfade; at the end of the fade the
//! roles swap.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use backbeat_audio::{AudioEngine, ChannelId, SoundId, SoundMode};
use backbeat_core::{
    Error, LockManager, ResourceGuard, ResourceType, Result, Track, DEFAULT_LOCK_TIMEOUT,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, trace, warn};

use crate::channel;
use crate::crossfade::{Crossfade, Ramp};
use crate::mix::{SharedLevels, VolumeSink};
use crate::order;
use crate::segment::{self, SegmentTimer};

/// Name under which the scheduler takes its resource locks.
pub const SCHEDULER_LOCK: &str = "scheduler";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Scheduler volume, applied on top of the shared mix levels.
    pub volume: f32,
    pub fade_duration: Duration,
    pub segment_duration: Duration,
    pub random_order: bool,
    pub random_segment: bool,
    pub lock_timeout: Duration,
    /// Seed for track and segment selection; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            fade_duration: Duration::from_secs(2),
            segment_duration: Duration::from_secs(30),
            random_order: false,
            random_segment: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            seed: None,
        }
    }
}

#[derive(Debug)]
struct Slot {
    track: Track,
    sound: SoundId,
}

#[derive(Debug)]
struct SchedulerState {
    tracks: Vec<Slot>,
    current: Option<ChannelId>,
    current_index: Option<usize>,
    crossfade: Option<Crossfade>,
    fade_in: Option<Ramp>,
    segment: Option<SegmentTimer>,
    incoming_segment: Option<SegmentTimer>,
    paused: bool,
    volume: f32,
    random_order: bool,
    random_segment: bool,
    fade_duration: Duration,
    segment_duration: Duration,
    rng: StdRng,
}

/// Plays one list of tracks back to back.
pub struct PlaybackScheduler {
    engine: Arc<dyn AudioEngine>,
    locks: Arc<LockManager>,
    levels: SharedLevels,
    lock_timeout: Duration,
    state: Mutex<SchedulerState>,
}

impl PlaybackScheduler {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        locks: Arc<LockManager>,
        levels: SharedLevels,
        config: SchedulerConfig,
    ) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        Self {
            engine,
            locks,
            levels,
            lock_timeout: config.lock_timeout,
            state: Mutex::new(SchedulerState {
                tracks: Vec::new(),
                current: None,
                current_index: None,
                crossfade: None,
                fade_in: None,
                segment: None,
                incoming_segment: None,
                paused: false,
                volume: config.volume.clamp(0.0, 1.0),
                random_order: config.random_order,
                random_segment: config.random_segment,
                fade_duration: config.fade_duration,
                segment_duration: config.segment_duration,
                rng,
            }),
        }
    }

    /// Load a file and append it to the sequence. Returns its index.
    pub fn add_track(&self, id: &str, path: &Path) -> Result<usize> {
        let _guard = self
            .locks
            .lock(ResourceType::Track, SCHEDULER_LOCK, self.lock_timeout)?;

        let sound = self.engine.create_sound(path, SoundMode::Stream)?;
        let length = match self.engine.sound_length(sound) {
            Ok(length) => length,
            Err(e) => {
                let _ = self.engine.release_sound(sound);
                return Err(e);
            }
        };

        let mut st = self.state.lock();
        st.tracks.push(Slot {
            track: Track::new(id, path, length),
            sound,
        });
        debug!("Scheduler track {id} added ({length} ms)");
        Ok(st.tracks.len() - 1)
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.state.lock().tracks.iter().map(|s| s.track.clone()).collect()
    }

    /// Stop playback and release every loaded track.
    pub fn clear(&self) -> Result<()> {
        let _guard = self
            .locks
            .lock(ResourceType::Playback, SCHEDULER_LOCK, self.lock_timeout)?;
        let mut st = self.state.lock();
        self.stop_channels(&mut st);
        st.current_index = None;
        for slot in st.tracks.drain(..) {
            if let Err(e) = self.engine.release_sound(slot.sound) {
                debug!("Releasing {} failed: {e}", slot.sound);
            }
        }
        info!("Scheduler cleared");
        Ok(())
    }

    /// Stop whatever is playing and start track `index` at `offset_ms`.
    pub fn play_track(&self, index: usize, fade_in: bool, offset_ms: u64) -> Result<()> {
        let _guard = self
            .locks
            .lock(ResourceType::Playback, SCHEDULER_LOCK, self.lock_timeout)?;
        let mut st = self.state.lock();

        let slot = st
            .tracks
            .get(index)
            .ok_or_else(|| Error::not_found("track", index.to_string()))?;
        let (sound, length) = (slot.sound, slot.track.duration_ms());
        if offset_ms >= length {
            return Err(Error::InvalidArgument(format!(
                "Offset {offset_ms} ms is past the end of track {index} ({length} ms)"
            )));
        }

        self.stop_channels(&mut st);
        let base = self.base_gain(&st);
        let channel =
            channel::start(self.engine.as_ref(), sound, offset_ms, if fade_in { 0.0 } else { base })?;

        let (fade_duration, segment_duration) = (st.fade_duration, st.segment_duration);
        let segmented = st.random_segment && segment::applies(length, segment_duration);
        st.current = Some(channel);
        st.current_index = Some(index);
        st.paused = false;
        st.fade_in = fade_in.then(|| Ramp::new(fade_duration));
        st.segment = segmented.then(|| SegmentTimer::new(offset_ms, segment_duration, length));

        info!("Scheduler playing track {index} from {offset_ms} ms");
        Ok(())
    }

    /// Advance fades, segment timers and end-of-track detection.
    pub fn update(&self, elapsed: Duration) -> Result<()> {
        let _guard = self
            .locks
            .lock(ResourceType::Playback, SCHEDULER_LOCK, self.lock_timeout)?;
        let _fade = self
            .locks
            .lock(ResourceType::Fade, SCHEDULER_LOCK, self.lock_timeout)?;
        let mut st = self.state.lock();

        if st.paused {
            return Ok(());
        }
        let Some(current) = st.current else {
            return Ok(());
        };
        let base = self.base_gain(&st);

        if st.crossfade.is_some() {
            self.advance_crossfade(&mut st, elapsed, base);
            return Ok(());
        }

        if let Some(ramp) = st.fade_in.as_mut() {
            ramp.advance(elapsed);
            let (gain, done) = (ramp.gain(base), ramp.is_complete());
            channel::set_volume_logged(self.engine.as_ref(), current, gain);
            if done {
                st.fade_in = None;
            }
        }
        if let Some(timer) = st.segment.as_mut() {
            timer.advance(elapsed);
        }

        let playing = self.engine.is_playing(current).unwrap_or_else(|e| {
            warn!("Scheduler lost its channel: {e}");
            false
        });
        if !playing {
            self.start_next_with_fade_in(&mut st);
            return Ok(());
        }

        let fade = st.fade_duration;
        let due = if let Some(timer) = st.segment {
            timer.elapsed.saturating_add(fade) >= timer.length
        } else {
            let length = st
                .current_index
                .and_then(|i| st.tracks.get(i))
                .map_or(0, |s| s.track.duration_ms());
            match self.engine.position(current) {
                Ok(position) => u128::from(length.saturating_sub(position)) <= fade.as_millis(),
                Err(e) => {
                    warn!("Scheduler position query failed ({e}), restarting track");
                    self.restart_current(&mut st);
                    return Ok(());
                }
            }
        };
        trace!("Scheduler tick: due={due}");

        if due {
            if let Err(e) = self.begin_crossfade(&mut st) {
                warn!("Scheduler could not start the next track ({e}), restarting track");
                self.restart_current(&mut st);
            }
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.set_paused(true)
    }

    pub fn resume(&self) -> Result<()> {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> Result<()> {
        let _guard = self
            .locks
            .lock(ResourceType::Playback, SCHEDULER_LOCK, self.lock_timeout)?;
        let mut st = self.state.lock();

        let incoming = st.crossfade.as_ref().map(|f| f.incoming);
        for ch in st.current.into_iter().chain(incoming) {
            self.engine.set_paused(ch, paused)?;
        }
        st.paused = paused;
        debug!("Scheduler {}", if paused { "paused" } else { "resumed" });
        Ok(())
    }

    /// Stop both channels. Loaded tracks stay loaded.
    pub fn stop(&self) -> Result<()> {
        let _guard = self
            .locks
            .lock(ResourceType::Playback, SCHEDULER_LOCK, self.lock_timeout)?;
        let mut st = self.state.lock();
        self.stop_channels(&mut st);
        st.current_index = None;
        st.paused = false;
        info!("Scheduler stopped");
        Ok(())
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let _fade = self.fade_lock()?;
        self.state.lock().volume = volume.clamp(0.0, 1.0);
        self.refresh_volumes();
        Ok(())
    }

    pub fn set_random_order(&self, enabled: bool) -> Result<()> {
        let _guard = self.playback_lock()?;
        self.state.lock().random_order = enabled;
        Ok(())
    }

    /// Takes effect from the next track.
    pub fn set_random_segment(&self, enabled: bool) -> Result<()> {
        let _guard = self.playback_lock()?;
        self.state.lock().random_segment = enabled;
        Ok(())
    }

    pub fn set_fade_duration(&self, duration: Duration) -> Result<()> {
        let _fade = self.fade_lock()?;
        self.state.lock().fade_duration = duration;
        Ok(())
    }

    pub fn set_segment_duration(&self, duration: Duration) -> Result<()> {
        let _fade = self.fade_lock()?;
        self.state.lock().segment_duration = duration;
        Ok(())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state.lock().current_index
    }

    pub fn current_channel(&self) -> Option<ChannelId> {
        self.state.lock().current
    }

    pub fn is_crossfading(&self) -> bool {
        self.state.lock().crossfade.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().current.is_some()
    }

    fn playback_lock(&self) -> Result<ResourceGuard<'_>> {
        self.locks
            .lock(ResourceType::Playback, SCHEDULER_LOCK, self.lock_timeout)
    }

    fn fade_lock(&self) -> Result<ResourceGuard<'_>> {
        self.locks
            .lock(ResourceType::Fade, SCHEDULER_LOCK, self.lock_timeout)
    }

    fn base_gain(&self, st: &SchedulerState) -> f32 {
        st.volume * self.levels.read().music_gain()
    }

    fn stop_channels(&self, st: &mut SchedulerState) {
        if let Some(fade) = st.crossfade.take() {
            channel::stop_quietly(self.engine.as_ref(), fade.incoming);
        }
        if let Some(current) = st.current.take() {
            channel::stop_quietly(self.engine.as_ref(), current);
        }
        st.fade_in = None;
        st.segment = None;
        st.incoming_segment = None;
    }

    fn pick_next(st: &mut SchedulerState) -> Option<usize> {
        let len = st.tracks.len();
        if len == 0 {
            return None;
        }
        if st.random_order {
            return Some(order::random_excluding(st.current_index, len, &mut st.rng));
        }
        Some(st.current_index.map_or(0, |i| order::next_wrapping(i, len)))
    }

    /// Choose where the next track starts and the segment timer it runs under.
    fn plan_start(st: &mut SchedulerState, index: usize) -> (SoundId, u64, Option<SegmentTimer>) {
        let slot = &st.tracks[index];
        let (sound, length) = (slot.sound, slot.track.duration_ms());
        if st.random_segment && segment::applies(length, st.segment_duration) {
            let start = segment::pick_start(length, st.segment_duration, &mut st.rng);
            (
                sound,
                start,
                Some(SegmentTimer::new(start, st.segment_duration, length)),
            )
        } else {
            (sound, 0, None)
        }
    }

    fn begin_crossfade(&self, st: &mut SchedulerState) -> Result<()> {
        let (Some(outgoing), Some(next)) = (st.current, Self::pick_next(st)) else {
            return Ok(());
        };
        let (sound, offset, timer) = Self::plan_start(st, next);
        let incoming = channel::start(self.engine.as_ref(), sound, offset, 0.0)?;

        st.crossfade = Some(Crossfade::new(outgoing, incoming, next, st.fade_duration));
        st.incoming_segment = timer;
        st.fade_in = None;
        debug!("Scheduler crossfading into track {next} at {offset} ms");
        Ok(())
    }

    fn advance_crossfade(&self, st: &mut SchedulerState, elapsed: Duration, base: f32) {
        let Some(fade) = st.crossfade.as_mut() else {
            return;
        };
        fade.advance(elapsed);
        let (out_gain, in_gain) = fade.gains(base);
        channel::set_volume_logged(self.engine.as_ref(), fade.outgoing, out_gain);
        channel::set_volume_logged(self.engine.as_ref(), fade.incoming, in_gain);

        if !fade.is_complete() {
            return;
        }
        let Some(fade) = st.crossfade.take() else {
            return;
        };
        channel::stop_quietly(self.engine.as_ref(), fade.outgoing);
        st.current = Some(fade.incoming);
        st.current_index = Some(fade.incoming_index);
        st.segment = st.incoming_segment.take().map(|mut timer| {
            timer.elapsed = fade.elapsed();
            timer
        });
        debug!("Scheduler now on track {}", fade.incoming_index);
    }

    fn start_next_with_fade_in(&self, st: &mut SchedulerState) {
        let Some(next) = Self::pick_next(st) else {
            self.stop_channels(st);
            st.current_index = None;
            return;
        };
        debug!("Scheduler track ended, fading in track {next}");
        self.fade_in_track(st, next);
    }

    /// Start the current track over after an engine failure.
    fn restart_current(&self, st: &mut SchedulerState) {
        match st.current_index.filter(|&i| i < st.tracks.len()) {
            Some(index) => self.fade_in_track(st, index),
            None => {
                self.stop_channels(st);
                st.current_index = None;
            }
        }
    }

    /// Replace whatever plays with track `index`, fading it in.
    fn fade_in_track(&self, st: &mut SchedulerState, index: usize) {
        self.stop_channels(st);
        let (sound, offset, timer) = Self::plan_start(st, index);

        match channel::start(self.engine.as_ref(), sound, offset, 0.0) {
            Ok(ch) => {
                st.current = Some(ch);
                st.current_index = Some(index);
                st.fade_in = Some(Ramp::new(st.fade_duration));
                st.segment = timer;
                debug!("Scheduler fading in track {index} from {offset} ms");
            }
            Err(e) => {
                warn!("Scheduler could not start track {index}: {e}");
                st.current_index = None;
            }
        }
    }
}

impl VolumeSink for PlaybackScheduler {
    fn refresh_volumes(&self) {
        let _fade = match self
            .locks
            .lock(ResourceType::Fade, SCHEDULER_LOCK, self.lock_timeout)
        {
            Ok(guard) => guard,
            Err(e) => {
                debug!("Skipping scheduler volume refresh: {e}");
                return;
            }
        };
        let st = self.state.lock();
        let base = self.base_gain(&st);

        if let Some(fade) = &st.crossfade {
            let (out_gain, in_gain) = fade.gains(base);
            channel::set_volume_logged(self.engine.as_ref(), fade.outgoing, out_gain);
            channel::set_volume_logged(self.engine.as_ref(), fade.incoming, in_gain);
        } else if let Some(current) = st.current {
            let gain = st.fade_in.map_or(base, |ramp| ramp.gain(base));
            channel::set_volume_logged(self.engine.as_ref(), current, gain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::{shared_levels, MixLevels};
    use backbeat_audio::VirtualEngine;

    const TICK: Duration = Duration::from_millis(100);

    fn setup(config: SchedulerConfig, lengths: &[u64]) -> (Arc<VirtualEngine>, PlaybackScheduler) {
        let engine = Arc::new(VirtualEngine::new());
        for (i, length) in lengths.iter().enumerate() {
            engine.insert_sound(format!("t{i}.mp3"), *length);
        }
        let levels = shared_levels(MixLevels::default());
        let scheduler = PlaybackScheduler::new(
            engine.clone(),
            Arc::new(LockManager::new()),
            levels,
            config,
        );
        for i in 0..lengths.len() {
            scheduler
                .add_track(&format!("t{i}"), Path::new(&format!("t{i}.mp3")))
                .unwrap();
        }
        (engine, scheduler)
    }

    fn tick(engine: &VirtualEngine, scheduler: &PlaybackScheduler, n: usize) {
        for _ in 0..n {
            engine.update(TICK).unwrap();
            scheduler.update(TICK).unwrap();
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            fade_duration: Duration::from_secs(1),
            seed: Some(42),
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn test_offset_past_end_is_rejected() {
        let (engine, scheduler) = setup(config(), &[5_000]);
        let result = scheduler.play_track(0, false, 5_000);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(engine.channels().is_empty());
        assert_eq!(scheduler.current_index(), None);
    }

    #[test]
    fn test_unknown_index() {
        let (_engine, scheduler) = setup(config(), &[5_000]);
        assert!(matches!(
            scheduler.play_track(3, false, 0),
            Err(Error::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_fade_in() {
        let (engine, scheduler) = setup(config(), &[10_000]);
        scheduler.play_track(0, true, 0).unwrap();
        let ch = scheduler.current_channel().unwrap();
        assert!(engine.volume(ch).unwrap().abs() < f32::EPSILON);

        tick(&engine, &scheduler, 5);
        assert!((engine.volume(ch).unwrap() - 0.5).abs() < 1e-5);
        tick(&engine, &scheduler, 5);
        assert!((engine.volume(ch).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_crossfade_near_end_swaps_channels() {
        let (engine, scheduler) = setup(config(), &[5_000, 5_000]);
        scheduler.play_track(0, false, 0).unwrap();
        let first = scheduler.current_channel().unwrap();

        tick(&engine, &scheduler, 39);
        assert!(!scheduler.is_crossfading());
        tick(&engine, &scheduler, 1);
        assert!(scheduler.is_crossfading());

        tick(&engine, &scheduler, 10);
        assert!(!scheduler.is_crossfading());
        assert_eq!(scheduler.current_index(), Some(1));
        assert!(engine.is_playing(first).is_err());
        assert_eq!(engine.playing_channels().len(), 1);
    }

    #[test]
    fn test_sequential_wraps() {
        let (engine, scheduler) = setup(config(), &[2_000, 2_000]);
        scheduler.play_track(1, false, 0).unwrap();
        tick(&engine, &scheduler, 20);
        assert_eq!(scheduler.current_index(), Some(0));
    }

    #[test]
    fn test_random_next_differs_from_current() {
        let cfg = SchedulerConfig {
            random_order: true,
            ..config()
        };
        let (engine, scheduler) = setup(cfg, &[2_000, 2_000, 2_000]);
        scheduler.play_track(0, false, 0).unwrap();

        let mut crossfades = 0;
        for _ in 0..100 {
            tick(&engine, &scheduler, 1);
            let st = scheduler.state.lock();
            if let Some(fade) = &st.crossfade {
                assert_ne!(Some(fade.incoming_index), st.current_index);
                crossfades += 1;
            }
        }
        assert!(crossfades > 0);
    }

    #[test]
    fn test_segment_mode_crossfades_before_segment_end() {
        let cfg = SchedulerConfig {
            random_segment: true,
            segment_duration: Duration::from_secs(5),
            ..config()
        };
        let (engine, scheduler) = setup(cfg, &[60_000, 60_000]);
        scheduler.play_track(0, false, 10_000).unwrap();

        tick(&engine, &scheduler, 39);
        assert!(!scheduler.is_crossfading());
        tick(&engine, &scheduler, 1);
        assert!(scheduler.is_crossfading());

        let st = scheduler.state.lock();
        let fade = st.crossfade.as_ref().unwrap();
        let start = st.incoming_segment.unwrap().start_ms;
        assert!(start <= 55_000);
        assert_eq!(engine.position(fade.incoming).unwrap(), start);
    }

    #[test]
    fn test_track_ending_alone_fades_in_next() {
        let (engine, scheduler) = setup(config(), &[3_000, 3_000]);
        scheduler.play_track(0, false, 0).unwrap();

        engine.update(Duration::from_secs(4)).unwrap();
        scheduler.update(TICK).unwrap();
        assert_eq!(scheduler.current_index(), Some(1));
        assert!(!scheduler.is_crossfading());
        let ch = scheduler.current_channel().unwrap();
        assert!(engine.volume(ch).unwrap().abs() < f32::EPSILON);
    }

    #[test]
    fn test_pause_affects_both_channels() {
        let (engine, scheduler) = setup(config(), &[3_000, 3_000]);
        scheduler.play_track(0, false, 0).unwrap();
        tick(&engine, &scheduler, 21);
        assert!(scheduler.is_crossfading());

        scheduler.pause().unwrap();
        for ch in engine.channels() {
            assert!(engine.is_paused(ch).unwrap());
        }
        let before: Vec<u64> = engine
            .channels()
            .iter()
            .map(|ch| engine.position(*ch).unwrap())
            .collect();
        tick(&engine, &scheduler, 5);
        let after: Vec<u64> = engine
            .channels()
            .iter()
            .map(|ch| engine.position(*ch).unwrap())
            .collect();
        assert_eq!(before, after);

        scheduler.resume().unwrap();
        for ch in engine.channels() {
            assert!(!engine.is_paused(ch).unwrap());
        }
    }

    #[test]
    fn test_refresh_applies_duck() {
        let engine = Arc::new(VirtualEngine::new());
        engine.insert_sound("a.mp3", 10_000);
        let levels = shared_levels(MixLevels::default());
        let scheduler = PlaybackScheduler::new(
            engine.clone(),
            Arc::new(LockManager::new()),
            levels.clone(),
            config(),
        );
        scheduler.add_track("a", Path::new("a.mp3")).unwrap();
        scheduler.play_track(0, false, 0).unwrap();

        levels.write().duck = 0.25;
        scheduler.refresh_volumes();
        let ch = scheduler.current_channel().unwrap();
        assert!((engine.volume(ch).unwrap() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_update_skipped_while_locked_elsewhere() {
        let cfg = SchedulerConfig {
            lock_timeout: Duration::from_millis(50),
            ..config()
        };
        let engine = Arc::new(VirtualEngine::new());
        let locks = Arc::new(LockManager::new());
        let scheduler = PlaybackScheduler::new(
            engine,
            locks.clone(),
            shared_levels(MixLevels::default()),
            cfg,
        );

        let holder = {
            let locks = locks.clone();
            let (tx, rx) = std::sync::mpsc::channel();
            let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
            let handle = std::thread::spawn(move || {
                locks
                    .acquire(ResourceType::Playback, SCHEDULER_LOCK, DEFAULT_LOCK_TIMEOUT)
                    .unwrap();
                tx.send(()).unwrap();
                let _ = done_rx.recv();
                locks.release(ResourceType::Playback, SCHEDULER_LOCK);
            });
            rx.recv().unwrap();
            (handle, done_tx)
        };

        let err = scheduler.update(TICK).unwrap_err();
        assert!(err.is_transient());

        holder.1.send(()).unwrap();
        holder.0.join().unwrap();
        assert!(scheduler.update(TICK).is_ok());
    }

    #[test]
    fn test_failed_next_track_restarts_current() {
        let (engine, scheduler) = setup(config(), &[5_000, 5_000]);
        scheduler.play_track(0, false, 0).unwrap();
        let first = scheduler.current_channel().unwrap();
        let broken = scheduler.state.lock().tracks[1].sound;
        engine.release_sound(broken).unwrap();

        tick(&engine, &scheduler, 40);
        assert!(!scheduler.is_crossfading());
        assert_eq!(scheduler.current_index(), Some(0));
        let ch = scheduler.current_channel().unwrap();
        assert_ne!(ch, first);
        assert_eq!(engine.position(ch).unwrap(), 0);
        assert_eq!(engine.playing_channels(), vec![ch]);
    }

    /// Virtual engine whose position queries can be switched off.
    #[derive(Default)]
    struct NoPosition {
        inner: VirtualEngine,
        broken: std::sync::atomic::AtomicBool,
    }

    impl AudioEngine for NoPosition {
        fn create_sound(&self, path: &Path, mode: SoundMode) -> Result<SoundId> {
            self.inner.create_sound(path, mode)
        }
        fn sound_length(&self, sound: SoundId) -> Result<u64> {
            self.inner.sound_length(sound)
        }
        fn release_sound(&self, sound: SoundId) -> Result<()> {
            self.inner.release_sound(sound)
        }
        fn play(&self, sound: SoundId, paused: bool) -> Result<ChannelId> {
            self.inner.play(sound, paused)
        }
        fn stop(&self, channel: ChannelId) -> Result<()> {
            self.inner.stop(channel)
        }
        fn set_volume(&self, channel: ChannelId, volume: f32) -> Result<()> {
            self.inner.set_volume(channel, volume)
        }
        fn volume(&self, channel: ChannelId) -> Result<f32> {
            self.inner.volume(channel)
        }
        fn set_pitch(&self, channel: ChannelId, pitch: f32) -> Result<()> {
            self.inner.set_pitch(channel, pitch)
        }
        fn pitch(&self, channel: ChannelId) -> Result<f32> {
            self.inner.pitch(channel)
        }
        fn set_position(&self, channel: ChannelId, position_ms: u64) -> Result<()> {
            self.inner.set_position(channel, position_ms)
        }
        fn position(&self, channel: ChannelId) -> Result<u64> {
            if self.broken.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(Error::Engine("position unavailable".into()));
            }
            self.inner.position(channel)
        }
        fn is_playing(&self, channel: ChannelId) -> Result<bool> {
            self.inner.is_playing(channel)
        }
        fn set_paused(&self, channel: ChannelId, paused: bool) -> Result<()> {
            self.inner.set_paused(channel, paused)
        }
        fn is_paused(&self, channel: ChannelId) -> Result<bool> {
            self.inner.is_paused(channel)
        }
        fn current_sound(&self, channel: ChannelId) -> Result<SoundId> {
            self.inner.current_sound(channel)
        }
        fn update(&self, elapsed: Duration) -> Result<()> {
            self.inner.update(elapsed)
        }
    }

    #[test]
    fn test_position_failure_restarts_track() {
        let engine = Arc::new(NoPosition::default());
        engine.inner.insert_sound("a.mp3", 10_000);
        let scheduler = PlaybackScheduler::new(
            engine.clone(),
            Arc::new(LockManager::new()),
            shared_levels(MixLevels::default()),
            config(),
        );
        scheduler.add_track("a", Path::new("a.mp3")).unwrap();
        scheduler.play_track(0, false, 0).unwrap();
        let first = scheduler.current_channel().unwrap();
        engine.update(Duration::from_secs(3)).unwrap();

        engine
            .broken
            .store(true, std::sync::atomic::Ordering::Relaxed);
        scheduler.update(TICK).unwrap();
        engine
            .broken
            .store(false, std::sync::atomic::Ordering::Relaxed);

        let ch = scheduler.current_channel().unwrap();
        assert_ne!(ch, first);
        assert_eq!(scheduler.current_index(), Some(0));
        assert_eq!(engine.position(ch).unwrap(), 0);
        assert!(engine.volume(ch).unwrap().abs() < f32::EPSILON);
        assert!(engine.inner.is_playing(first).is_err());
    }

    #[test]
    fn test_setters_respect_named_locks() {
        let cfg = SchedulerConfig {
            lock_timeout: Duration::from_millis(50),
            ..config()
        };
        let (engine, scheduler) = setup(cfg, &[10_000]);
        scheduler.play_track(0, false, 0).unwrap();
        scheduler.set_volume(0.5).unwrap();
        let ch = scheduler.current_channel().unwrap();
        assert!((engine.volume(ch).unwrap() - 0.5).abs() < 1e-6);

        let locks = scheduler.locks.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            locks
                .acquire(ResourceType::Fade, SCHEDULER_LOCK, DEFAULT_LOCK_TIMEOUT)
                .unwrap();
            tx.send(()).unwrap();
            let _ = done_rx.recv();
            locks.release(ResourceType::Fade, SCHEDULER_LOCK);
        });
        rx.recv().unwrap();

        assert!(scheduler.set_fade_duration(Duration::ZERO).unwrap_err().is_transient());
        assert!(scheduler.set_segment_duration(Duration::ZERO).is_err());
        assert!(scheduler.set_volume(0.1).is_err());
        scheduler.set_random_order(true).unwrap();

        done_tx.send(()).unwrap();
        holder.join().unwrap();
        scheduler.set_fade_duration(Duration::ZERO).unwrap();
        assert_eq!(scheduler.state.lock().fade_duration, Duration::ZERO);
        assert!((engine.volume(ch).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_clear_releases_tracks() {
        let (engine, scheduler) = setup(config(), &[3_000, 3_000]);
        scheduler.play_track(0, false, 0).unwrap();
        scheduler.clear().unwrap();
        assert!(scheduler.tracks().is_empty());
        assert!(engine.channels().is_empty());
        assert!(!scheduler.is_playing());
    }
}
