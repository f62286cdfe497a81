//! Multiple independent playlists with shuffle, looping and crossfades.
//!
//! The orchestrator owns the track library (one engine sound per track) and
//! every playlist. Each playing playlist holds at most one current channel
//! and, while crossfading, one incoming channel. All timers advance in
//! [`PlaylistOrchestrator::update`].

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use backbeat_audio::{AudioEngine, ChannelId, SoundId, SoundMode};
use backbeat_core::{
    Error, LockManager, Playlist, PlaylistOptions, PlaylistRecord, Position, ResourceGuard,
    ResourceType, Result, Track, DEFAULT_LOCK_TIMEOUT,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, trace, warn};

use crate::channel;
use crate::crossfade::Crossfade;
use crate::mix::{SharedLevels, VolumeSink};
use crate::order::ShuffleOrder;
use crate::persistence;
use crate::segment::{self, SegmentTimer};

/// Name under which the orchestrator takes its playback and fade locks.
pub const ORCHESTRATOR_LOCK: &str = "orchestrator";
const LIBRARY_LOCK: &str = "library";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub crossfade_duration: Duration,
    pub lock_timeout: Duration,
    /// Seed for shuffles and segment offsets; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            crossfade_duration: Duration::from_secs(3),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            seed: None,
        }
    }
}

/// Snapshot of one playlist.
#[derive(Debug, Clone)]
pub struct PlaylistStatus {
    pub name: String,
    pub track_count: usize,
    pub playing: bool,
    pub active: bool,
    pub current_index: Option<usize>,
    pub current_track: Option<Track>,
    pub crossfading: bool,
    pub segment_mode: bool,
    /// Options in effect while playing, saved options otherwise.
    pub options: PlaylistOptions,
}

/// Position of the active playlist's current track.
#[derive(Debug, Clone)]
pub struct Progress {
    pub playlist: String,
    pub track: Track,
    pub position: Position,
    pub length: Position,
}

#[derive(Debug)]
struct LibraryEntry {
    track: Track,
    sound: SoundId,
}

#[derive(Debug)]
struct PlaylistRuntime {
    playlist: Playlist,
    options: PlaylistOptions,
    playing: bool,
    current_index: usize,
    order: Option<ShuffleOrder>,
    current: Option<ChannelId>,
    crossfade: Option<Crossfade>,
    segment: Option<SegmentTimer>,
    incoming_segment: Option<SegmentTimer>,
}

impl PlaylistRuntime {
    fn new(playlist: Playlist) -> Self {
        Self {
            options: playlist.options,
            playlist,
            playing: false,
            current_index: 0,
            order: None,
            current: None,
            crossfade: None,
            segment: None,
            incoming_segment: None,
        }
    }

    fn name(&self) -> &str {
        &self.playlist.name
    }
}

#[derive(Debug)]
struct OrchestratorState {
    library: BTreeMap<String, LibraryEntry>,
    playlists: BTreeMap<String, PlaylistRuntime>,
    active: Option<String>,
    rng: StdRng,
}

/// Runs every playlist.
pub struct PlaylistOrchestrator {
    engine: Arc<dyn AudioEngine>,
    locks: Arc<LockManager>,
    levels: SharedLevels,
    config: OrchestratorConfig,
    state: Mutex<OrchestratorState>,
}

impl PlaylistOrchestrator {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        locks: Arc<LockManager>,
        levels: SharedLevels,
        config: OrchestratorConfig,
    ) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        Self {
            engine,
            locks,
            levels,
            config,
            state: Mutex::new(OrchestratorState {
                library: BTreeMap::new(),
                playlists: BTreeMap::new(),
                active: None,
                rng,
            }),
        }
    }

    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ---- Library ----

    /// Load a file into the library under `id`.
    pub fn load_track(&self, id: &str, path: &Path, display_name: Option<&str>) -> Result<Track> {
        if id.trim().is_empty() {
            return Err(Error::InvalidArgument("Track id must not be empty".into()));
        }
        let _guard = self
            .locks
            .lock(ResourceType::Track, LIBRARY_LOCK, self.config.lock_timeout)?;

        if self.state.lock().library.contains_key(id) {
            return Err(Error::already_exists("track", id));
        }

        let sound = self.engine.create_sound(path, SoundMode::Stream)?;
        let length = match self.engine.sound_length(sound) {
            Ok(length) => length,
            Err(e) => {
                let _ = self.engine.release_sound(sound);
                return Err(e);
            }
        };

        let mut track = Track::new(id, path, length);
        if let Some(name) = display_name {
            track = track.with_display_name(name);
        }

        self.state.lock().library.insert(
            id.to_string(),
            LibraryEntry {
                track: track.clone(),
                sound,
            },
        );
        info!("Loaded track {id} ({})", track.duration().format());
        Ok(track)
    }

    pub fn library(&self) -> Vec<Track> {
        self.state
            .lock()
            .library
            .values()
            .map(|e| e.track.clone())
            .collect()
    }

    /// Remove a track from the library and from every playlist.
    pub fn unload_track(&self, id: &str) -> Result<()> {
        let _library = self
            .locks
            .lock(ResourceType::Track, LIBRARY_LOCK, self.config.lock_timeout)?;
        let _playback = self.lock_playback()?;
        let gain = self.music_gain();

        let mut st = self.state.lock();
        let entry = st
            .library
            .remove(id)
            .ok_or_else(|| Error::not_found("track", id))?;

        let OrchestratorState {
            library,
            playlists,
            rng,
            ..
        } = &mut *st;
        let mut driver = self.driver(library, rng, gain);
        for rt in playlists.values_mut() {
            let positions: Vec<usize> = rt
                .playlist
                .tracks()
                .iter()
                .enumerate()
                .filter(|(_, t)| t.id == id)
                .map(|(i, _)| i)
                .collect();
            for index in positions.into_iter().rev() {
                driver.remove_at(rt, index);
            }
        }

        if let Err(e) = self.engine.release_sound(entry.sound) {
            warn!("Releasing sound for track {id} failed: {e}");
        }
        info!("Unloaded track {id}");
        Ok(())
    }

    // ---- Playlist management ----

    pub fn create_playlist(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let _guard = self.lock_playback()?;
        let mut st = self.state.lock();
        if st.playlists.contains_key(name) {
            return Err(Error::already_exists("playlist", name));
        }
        st.playlists
            .insert(name.to_string(), PlaylistRuntime::new(Playlist::new(name)));
        info!("Created playlist {name}");
        Ok(())
    }

    pub fn delete_playlist(&self, name: &str) -> Result<()> {
        let _guard = self.lock_playback()?;
        let gain = self.music_gain();
        let mut st = self.state.lock();
        if !st.playlists.contains_key(name) {
            return Err(Error::not_found("playlist", name));
        }

        let OrchestratorState {
            library,
            playlists,
            rng,
            active,
        } = &mut *st;
        if let Some(mut rt) = playlists.remove(name) {
            self.driver(library, rng, gain).stop_playlist(&mut rt);
        }
        if active.as_deref() == Some(name) {
            *active = None;
        }
        info!("Deleted playlist {name}");
        Ok(())
    }

    pub fn rename_playlist(&self, old: &str, new: &str) -> Result<()> {
        validate_name(new)?;
        let _guard = self.lock_playback()?;
        let mut st = self.state.lock();
        if !st.playlists.contains_key(old) {
            return Err(Error::not_found("playlist", old));
        }
        if st.playlists.contains_key(new) {
            return Err(Error::already_exists("playlist", new));
        }

        if let Some(mut rt) = st.playlists.remove(old) {
            rt.playlist.name = new.to_string();
            st.playlists.insert(new.to_string(), rt);
        }
        if st.active.as_deref() == Some(old) {
            st.active = Some(new.to_string());
        }
        info!("Renamed playlist {old} to {new}");
        Ok(())
    }

    /// Copy a playlist's tracks and saved options under a new name.
    pub fn duplicate_playlist(&self, source: &str, new: &str) -> Result<()> {
        validate_name(new)?;
        let _guard = self.lock_playback()?;
        let mut st = self.state.lock();
        let mut copy = st
            .playlists
            .get(source)
            .map(|rt| rt.playlist.clone())
            .ok_or_else(|| Error::not_found("playlist", source))?;
        if st.playlists.contains_key(new) {
            return Err(Error::already_exists("playlist", new));
        }

        copy.name = new.to_string();
        st.playlists
            .insert(new.to_string(), PlaylistRuntime::new(copy));
        info!("Duplicated playlist {source} as {new}");
        Ok(())
    }

    /// Append a library track. Returns its position in the playlist.
    pub fn add_track(&self, playlist: &str, track_id: &str) -> Result<usize> {
        let _guard = self.lock_playback()?;
        let mut st = self.state.lock();
        let track = st
            .library
            .get(track_id)
            .map(|e| e.track.clone())
            .ok_or_else(|| Error::not_found("track", track_id))?;

        let OrchestratorState { playlists, rng, .. } = &mut *st;
        let rt = playlists
            .get_mut(playlist)
            .ok_or_else(|| Error::not_found("playlist", playlist))?;
        rt.playlist.push(track);
        if rt.playing && rt.options.random_order {
            rt.order = Some(ShuffleOrder::starting_with(
                rt.playlist.len(),
                rt.current_index,
                rng,
            ));
        }
        debug!("Added {track_id} to playlist {playlist}");
        Ok(rt.playlist.len() - 1)
    }

    /// Remove the track at `index`. Removing the playing track cuts to the
    /// track that takes its place.
    pub fn remove_track(&self, playlist: &str, index: usize) -> Result<Track> {
        let _guard = self.lock_playback()?;
        let gain = self.music_gain();
        let mut st = self.state.lock();
        let OrchestratorState {
            library,
            playlists,
            rng,
            ..
        } = &mut *st;

        let rt = playlists
            .get_mut(playlist)
            .ok_or_else(|| Error::not_found("playlist", playlist))?;
        if index >= rt.playlist.len() {
            return Err(Error::InvalidArgument(format!(
                "Track index {index} out of range for playlist {playlist} ({} tracks)",
                rt.playlist.len()
            )));
        }

        let removed = self
            .driver(library, rng, gain)
            .remove_at(rt, index)
            .ok_or_else(|| Error::Internal(format!("track {index} vanished from {playlist}")))?;
        debug!("Removed {} from playlist {playlist}", removed.id);
        Ok(removed)
    }

    pub fn move_track(&self, playlist: &str, from: usize, to: usize) -> Result<()> {
        let _guard = self.lock_playback()?;
        let mut st = self.state.lock();
        let OrchestratorState { playlists, rng, .. } = &mut *st;
        let rt = playlists
            .get_mut(playlist)
            .ok_or_else(|| Error::not_found("playlist", playlist))?;

        rt.playlist.move_track(from, to)?;
        rt.current_index = moved_index(rt.current_index, from, to);
        if let Some(fade) = rt.crossfade.as_mut() {
            fade.incoming_index = moved_index(fade.incoming_index, from, to);
        }
        if rt.playing && rt.options.random_order {
            rt.order = Some(ShuffleOrder::starting_with(
                rt.playlist.len(),
                rt.current_index,
                rng,
            ));
        }
        debug!("Moved track {from} -> {to} in playlist {playlist}");
        Ok(())
    }

    /// Stop the playlist and remove all of its tracks.
    pub fn clear_playlist(&self, name: &str) -> Result<()> {
        let _guard = self.lock_playback()?;
        let gain = self.music_gain();
        let mut st = self.state.lock();
        let OrchestratorState {
            library,
            playlists,
            rng,
            ..
        } = &mut *st;
        let rt = playlists
            .get_mut(name)
            .ok_or_else(|| Error::not_found("playlist", name))?;

        self.driver(library, rng, gain).stop_playlist(rt);
        rt.playlist.clear();
        rt.current_index = 0;
        info!("Cleared playlist {name}");
        Ok(())
    }

    /// Replace the options a playlist starts with when played without overrides.
    pub fn set_options(&self, name: &str, options: PlaylistOptions) -> Result<()> {
        options.validate()?;
        let _guard = self.lock_playback()?;
        let mut st = self.state.lock();
        let rt = st
            .playlists
            .get_mut(name)
            .ok_or_else(|| Error::not_found("playlist", name))?;
        rt.playlist.options = options;
        if !rt.playing {
            rt.options = options;
        }
        Ok(())
    }

    // ---- Import / export ----

    pub fn export_playlist(&self, name: &str, path: &Path) -> Result<()> {
        let record = self
            .state
            .lock()
            .playlists
            .get(name)
            .map(|rt| rt.playlist.to_record())
            .ok_or_else(|| Error::not_found("playlist", name))?;
        persistence::write_records(path, &[record])
    }

    /// Import the single playlist stored in `path`. Returns its name.
    pub fn import_playlist(&self, path: &Path) -> Result<String> {
        let mut records = persistence::read_records(path)?;
        if records.len() != 1 {
            return Err(Error::MalformedData(format!(
                "{} holds {} playlists, expected one",
                path.display(),
                records.len()
            )));
        }
        let record = records
            .pop()
            .ok_or_else(|| Error::Internal("record list emptied".into()))??;
        self.import_record(record)
    }

    /// Write every playlist to `path`. Returns how many were written.
    pub fn export_all(&self, path: &Path) -> Result<usize> {
        let records: Vec<PlaylistRecord> = self
            .state
            .lock()
            .playlists
            .values()
            .map(|rt| rt.playlist.to_record())
            .collect();
        persistence::write_records(path, &records)?;
        Ok(records.len())
    }

    /// Import every valid playlist in `path`, skipping malformed entries and
    /// name collisions. Returns the imported names.
    pub fn import_all(&self, path: &Path) -> Result<Vec<String>> {
        let mut imported = Vec::new();
        for (i, record) in persistence::read_records(path)?.into_iter().enumerate() {
            match record.and_then(|r| self.import_record(r)) {
                Ok(name) => imported.push(name),
                Err(e) => warn!("Skipping playlist entry {i} in {}: {e}", path.display()),
            }
        }
        info!(
            "Imported {} playlist(s) from {}",
            imported.len(),
            path.display()
        );
        Ok(imported)
    }

    fn import_record(&self, record: PlaylistRecord) -> Result<String> {
        record.validate()?;
        if self.state.lock().playlists.contains_key(&record.name) {
            return Err(Error::already_exists("playlist", record.name));
        }

        let mut playlist = Playlist::new(&record.name).with_options(record.options);
        for entry in &record.tracks {
            let known = self
                .state
                .lock()
                .library
                .get(&entry.id)
                .map(|e| e.track.clone());
            let track = match known {
                Some(track) => track,
                None => match self.load_track(&entry.id, &entry.path, None) {
                    Ok(track) => track,
                    Err(e) => {
                        warn!(
                            "Playlist {}: skipping track {} ({}): {e}",
                            record.name,
                            entry.id,
                            entry.path.display()
                        );
                        continue;
                    }
                },
            };
            playlist.push(track);
        }

        let _guard = self.lock_playback()?;
        let mut st = self.state.lock();
        if st.playlists.contains_key(&record.name) {
            return Err(Error::already_exists("playlist", record.name));
        }
        info!(
            "Imported playlist {} ({} of {} tracks)",
            record.name,
            playlist.len(),
            record.tracks.len()
        );
        st.playlists
            .insert(record.name.clone(), PlaylistRuntime::new(playlist));
        Ok(record.name)
    }

    // ---- Transport ----

    /// Start `name` from the top, stopping the active playlist first.
    /// `options` overrides the playlist's saved options for this run.
    pub fn play(&self, name: &str, options: Option<PlaylistOptions>) -> Result<()> {
        let _guard = self.lock_playback()?;
        let gain = self.music_gain();
        let mut st = self.state.lock();

        let rt = st
            .playlists
            .get(name)
            .ok_or_else(|| Error::not_found("playlist", name))?;
        if rt.playlist.is_empty() {
            return Err(Error::InvalidArgument(format!("Playlist {name} is empty")));
        }
        let options = options.unwrap_or(rt.playlist.options);
        options.validate()?;

        let OrchestratorState {
            library,
            playlists,
            rng,
            active,
        } = &mut *st;
        let mut driver = self.driver(library, rng, gain);

        if let Some(previous) = active.take() {
            if let Some(prev) = playlists.get_mut(&previous) {
                if prev.playing {
                    driver.stop_playlist(prev);
                    info!("Stopped playlist {previous}");
                }
            }
        }

        let rt = playlists
            .get_mut(name)
            .ok_or_else(|| Error::not_found("playlist", name))?;
        driver.stop_playlist(rt);
        rt.options = options;

        let first = if options.random_order {
            let order = ShuffleOrder::new(rt.playlist.len(), &mut *driver.rng);
            let first = order.current().unwrap_or(0);
            rt.order = Some(order);
            first
        } else {
            0
        };

        driver.start_track(rt, first)?;
        rt.playing = true;
        *active = Some(name.to_string());
        info!(
            "Playing playlist {name} from track {first} (random order: {}, segments: {}, loop: {})",
            options.random_order, options.random_segment, options.loop_playlist
        );
        Ok(())
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        let _guard = self.lock_playback()?;
        let gain = self.music_gain();
        let mut st = self.state.lock();
        let OrchestratorState {
            library,
            playlists,
            rng,
            ..
        } = &mut *st;
        let rt = playlists
            .get_mut(name)
            .ok_or_else(|| Error::not_found("playlist", name))?;
        self.driver(library, rng, gain).stop_playlist(rt);
        info!("Stopped playlist {name}");
        Ok(())
    }

    pub fn stop_all(&self) -> Result<()> {
        let _guard = self.lock_playback()?;
        self.stop_all_locked();
        Ok(())
    }

    fn stop_all_locked(&self) {
        let gain = self.music_gain();
        let mut st = self.state.lock();
        let OrchestratorState {
            library,
            playlists,
            rng,
            ..
        } = &mut *st;
        let mut driver = self.driver(library, rng, gain);
        for rt in playlists.values_mut() {
            driver.stop_playlist(rt);
        }
        info!("Stopped all playlists");
    }

    /// Crossfade into the next track now.
    pub fn skip_next(&self, name: &str) -> Result<()> {
        let _guard = self.lock_playback()?;
        let gain = self.music_gain();
        let mut st = self.state.lock();
        let OrchestratorState {
            library,
            playlists,
            rng,
            ..
        } = &mut *st;
        let rt = playlists
            .get_mut(name)
            .ok_or_else(|| Error::not_found("playlist", name))?;
        if !rt.playing {
            return Err(Error::InvalidArgument(format!(
                "Playlist {name} is not playing"
            )));
        }

        let mut driver = self.driver(library, rng, gain);
        driver.finalize_crossfade(rt);
        match driver.next_index(rt) {
            Some(next) => {
                info!("Playlist {name}: skipping to track {next}");
                if let Err(e) = driver.begin_crossfade(rt, next) {
                    driver.stop_playlist(rt);
                    return Err(e);
                }
            }
            None => {
                info!("Playlist {name}: no next track, stopping");
                driver.stop_playlist(rt);
            }
        }
        Ok(())
    }

    /// Advance every playing playlist by `elapsed`.
    pub fn update(&self, elapsed: Duration) -> Result<()> {
        let _playback = self.lock_playback()?;
        let _fade = self.locks.lock(
            ResourceType::Fade,
            ORCHESTRATOR_LOCK,
            self.config.lock_timeout,
        )?;
        let gain = self.music_gain();
        let mut st = self.state.lock();
        let OrchestratorState {
            library,
            playlists,
            rng,
            ..
        } = &mut *st;

        let mut driver = self.driver(library, rng, gain);
        for rt in playlists.values_mut().filter(|rt| rt.playing) {
            driver.update(rt, elapsed);
        }
        Ok(())
    }

    // ---- Queries ----

    pub fn playlist_names(&self) -> Vec<String> {
        self.state.lock().playlists.keys().cloned().collect()
    }

    pub fn playlist(&self, name: &str) -> Option<Playlist> {
        self.state
            .lock()
            .playlists
            .get(name)
            .map(|rt| rt.playlist.clone())
    }

    pub fn status(&self, name: &str) -> Result<PlaylistStatus> {
        let st = self.state.lock();
        let rt = st
            .playlists
            .get(name)
            .ok_or_else(|| Error::not_found("playlist", name))?;

        Ok(PlaylistStatus {
            name: name.to_string(),
            track_count: rt.playlist.len(),
            playing: rt.playing,
            active: st.active.as_deref() == Some(name),
            current_index: rt.playing.then_some(rt.current_index),
            current_track: rt
                .playing
                .then(|| rt.playlist.track(rt.current_index).cloned())
                .flatten(),
            crossfading: rt.crossfade.is_some(),
            segment_mode: rt.segment.is_some(),
            options: rt.options,
        })
    }

    pub fn active_playlist(&self) -> Option<String> {
        self.state.lock().active.clone()
    }

    /// Position of the active playlist's current track, if it is playing.
    pub fn progress(&self) -> Option<Progress> {
        let st = self.state.lock();
        let name = st.active.as_ref()?;
        let rt = st.playlists.get(name).filter(|rt| rt.playing)?;
        let track = rt.playlist.track(rt.current_index)?.clone();
        let position = self.engine.position(rt.current?).ok()?;

        Some(Progress {
            playlist: name.clone(),
            length: track.duration(),
            position: Position::from_millis(position),
            track,
        })
    }

    /// Stop every playlist and release every loaded sound.
    pub fn shutdown(&self) -> Result<()> {
        let _guard = match self.lock_playback() {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!("Shutting down orchestrator without its lock: {e}");
                None
            }
        };
        self.stop_all_locked();

        let mut st = self.state.lock();
        for (id, entry) in std::mem::take(&mut st.library) {
            if let Err(e) = self.engine.release_sound(entry.sound) {
                debug!("Releasing sound for {id} failed: {e}");
            }
        }
        st.active = None;
        info!("Orchestrator shut down");
        Ok(())
    }

    fn lock_playback(&self) -> Result<ResourceGuard<'_>> {
        self.locks.lock(
            ResourceType::Playback,
            ORCHESTRATOR_LOCK,
            self.config.lock_timeout,
        )
    }

    fn music_gain(&self) -> f32 {
        self.levels.read().music_gain()
    }

    fn driver<'a>(
        &'a self,
        library: &'a BTreeMap<String, LibraryEntry>,
        rng: &'a mut StdRng,
        gain: f32,
    ) -> Driver<'a> {
        Driver {
            engine: self.engine.as_ref(),
            library,
            rng,
            gain,
            crossfade: self.config.crossfade_duration,
        }
    }
}

impl VolumeSink for PlaylistOrchestrator {
    fn refresh_volumes(&self) {
        let _fade = match self.locks.lock(
            ResourceType::Fade,
            ORCHESTRATOR_LOCK,
            self.config.lock_timeout,
        ) {
            Ok(guard) => guard,
            Err(e) => {
                debug!("Skipping playlist volume refresh: {e}");
                return;
            }
        };
        let gain = self.music_gain();
        let st = self.state.lock();
        for rt in st.playlists.values().filter(|rt| rt.playing) {
            if let Some(fade) = &rt.crossfade {
                let (out_gain, in_gain) = fade.gains(gain);
                channel::set_volume_logged(self.engine.as_ref(), fade.outgoing, out_gain);
                channel::set_volume_logged(self.engine.as_ref(), fade.incoming, in_gain);
            } else if let Some(current) = rt.current {
                channel::set_volume_logged(self.engine.as_ref(), current, gain);
            }
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "Playlist name must not be empty".into(),
        ));
    }
    Ok(())
}

/// Where the element at `index` ends up after moving `from` to `to`.
const fn moved_index(index: usize, from: usize, to: usize) -> usize {
    if index == from {
        to
    } else if from < index && index <= to {
        index - 1
    } else if to <= index && index < from {
        index + 1
    } else {
        index
    }
}

/// Borrowed view of the state a playlist needs while it is being driven.
struct Driver<'a> {
    engine: &'a dyn AudioEngine,
    library: &'a BTreeMap<String, LibraryEntry>,
    rng: &'a mut StdRng,
    gain: f32,
    crossfade: Duration,
}

impl Driver<'_> {
    fn update(&mut self, rt: &mut PlaylistRuntime, elapsed: Duration) {
        if rt.playlist.is_empty() {
            self.stop_playlist(rt);
            return;
        }
        if rt.crossfade.is_some() {
            self.advance_crossfade(rt, elapsed);
            return;
        }
        let Some(current) = rt.current else {
            self.restart_current(rt);
            return;
        };

        let playing = match self.engine.is_playing(current) {
            Ok(playing) => playing,
            Err(e) => {
                warn!("Playlist {}: channel query failed ({e}), restarting track", rt.name());
                self.restart_current(rt);
                return;
            }
        };
        let Some(length) = rt.playlist.track(rt.current_index).map(Track::duration_ms) else {
            rt.current_index = 0;
            self.restart_current(rt);
            return;
        };
        let position = match self.engine.position(current) {
            Ok(position) => position,
            Err(e) => {
                warn!("Playlist {}: position query failed ({e}), restarting track", rt.name());
                self.restart_current(rt);
                return;
            }
        };
        trace!("Playlist {}: {position}/{length} ms", rt.name());

        if let Some(timer) = rt.segment.as_mut() {
            timer.advance(elapsed);
            if !playing || timer.is_finished() || SegmentTimer::near_end(position, length) {
                self.advance(rt, playing);
            }
            return;
        }

        if !playing {
            self.on_track_end(rt);
            return;
        }

        let remaining = length.saturating_sub(position);
        if rt.playlist.len() > 1 && u128::from(remaining) <= self.crossfade.as_millis() {
            if let Some(next) = self.next_index(rt) {
                self.crossfade_or_stop(rt, next);
            }
        }
    }

    /// The current channel finished on its own in whole-track mode.
    fn on_track_end(&mut self, rt: &mut PlaylistRuntime) {
        if rt.playlist.len() == 1 && rt.options.loop_playlist {
            debug!("Playlist {}: looping single track", rt.name());
            self.restart_current(rt);
            return;
        }
        match self.next_index(rt) {
            Some(next) => self.crossfade_or_stop(rt, next),
            None => {
                info!("Playlist {} finished", rt.name());
                self.stop_playlist(rt);
            }
        }
    }

    /// Move on from the current segment.
    fn advance(&mut self, rt: &mut PlaylistRuntime, crossfade: bool) {
        let Some(next) = self.next_index(rt) else {
            info!("Playlist {} finished", rt.name());
            self.stop_playlist(rt);
            return;
        };
        if crossfade {
            self.crossfade_or_stop(rt, next);
        } else if let Err(e) = self.start_track(rt, next) {
            error!("Playlist {}: could not start track {next}: {e}", rt.name());
            self.stop_playlist(rt);
        }
    }

    fn crossfade_or_stop(&mut self, rt: &mut PlaylistRuntime, next: usize) {
        if let Err(e) = self.begin_crossfade(rt, next) {
            error!("Playlist {}: could not start track {next}: {e}", rt.name());
            self.stop_playlist(rt);
        }
    }

    /// Next position to play, or `None` when the playlist has run out.
    fn next_index(&mut self, rt: &mut PlaylistRuntime) -> Option<usize> {
        let len = rt.playlist.len();
        if len == 0 {
            return None;
        }

        if rt.options.random_order {
            if rt.order.as_ref().map_or(true, |o| o.len() != len) {
                rt.order = Some(ShuffleOrder::starting_with(
                    len,
                    rt.current_index,
                    &mut *self.rng,
                ));
            }
            let order = rt.order.as_mut()?;
            if let Some(next) = order.advance() {
                return Some(next);
            }
            if rt.options.loop_playlist {
                debug!("Playlist {}: reshuffling", rt.playlist.name);
                return order.reshuffle(Some(rt.current_index), &mut *self.rng);
            }
            return None;
        }

        let next = rt.current_index + 1;
        if next < len {
            Some(next)
        } else if rt.options.loop_playlist {
            Some(0)
        } else {
            None
        }
    }

    /// Sound, start offset and segment timer for playing track `index`.
    fn plan_start(
        &mut self,
        rt: &PlaylistRuntime,
        index: usize,
    ) -> Result<(SoundId, u64, Option<SegmentTimer>)> {
        let track = rt
            .playlist
            .track(index)
            .ok_or_else(|| Error::not_found("track index", index.to_string()))?;
        let sound = self
            .library
            .get(&track.id)
            .map(|e| e.sound)
            .ok_or_else(|| Error::not_found("track", track.id.clone()))?;

        let length = track.duration_ms();
        let segment = rt.options.segment_duration();
        if rt.options.random_segment && segment::applies(length, segment) {
            let start = segment::pick_start(length, segment, &mut *self.rng);
            Ok((sound, start, Some(SegmentTimer::new(start, segment, length))))
        } else {
            Ok((sound, 0, None))
        }
    }

    /// Hard start of track `index`, replacing any channel the playlist holds.
    fn start_track(&mut self, rt: &mut PlaylistRuntime, index: usize) -> Result<()> {
        self.stop_channels(rt);
        let (sound, offset, timer) = self.plan_start(rt, index)?;
        let channel = channel::start(self.engine, sound, offset, self.gain)?;

        rt.current = Some(channel);
        rt.current_index = index;
        rt.segment = timer;
        debug!("Playlist {}: track {index} on {channel} from {offset} ms", rt.name());
        Ok(())
    }

    fn begin_crossfade(&mut self, rt: &mut PlaylistRuntime, next: usize) -> Result<()> {
        let Some(outgoing) = rt.current else {
            return self.start_track(rt, next);
        };
        let (sound, offset, timer) = self.plan_start(rt, next)?;
        let incoming = channel::start(self.engine, sound, offset, 0.0)?;

        rt.crossfade = Some(Crossfade::new(outgoing, incoming, next, self.crossfade));
        rt.incoming_segment = timer;
        debug!(
            "Playlist {}: crossfading {outgoing} -> {incoming} (track {next} from {offset} ms)",
            rt.name()
        );
        Ok(())
    }

    fn advance_crossfade(&mut self, rt: &mut PlaylistRuntime, elapsed: Duration) {
        let Some(fade) = rt.crossfade.as_mut() else {
            return;
        };
        fade.advance(elapsed);
        let (out_gain, in_gain) = fade.gains(self.gain);
        channel::set_volume_logged(self.engine, fade.outgoing, out_gain);
        channel::set_volume_logged(self.engine, fade.incoming, in_gain);

        let both_stopped = !self.engine.is_playing(fade.outgoing).unwrap_or(false)
            && !self.engine.is_playing(fade.incoming).unwrap_or(false);
        if fade.is_complete() || both_stopped {
            self.finalize_crossfade(rt);
        }
    }

    /// The incoming channel becomes current and the outgoing one is dropped.
    fn finalize_crossfade(&mut self, rt: &mut PlaylistRuntime) {
        let Some(fade) = rt.crossfade.take() else {
            return;
        };
        channel::stop_quietly(self.engine, fade.outgoing);
        rt.current = Some(fade.incoming);
        rt.current_index = fade.incoming_index;
        rt.segment = rt.incoming_segment.take().map(|mut timer| {
            timer.elapsed = fade.elapsed();
            timer
        });
        channel::set_volume_logged(self.engine, fade.incoming, self.gain);
        debug!("Playlist {}: now on track {}", rt.name(), fade.incoming_index);

        if !self.engine.is_playing(fade.incoming).unwrap_or(false) {
            warn!("Playlist {}: incoming track is not playing, restarting", rt.name());
            self.restart_current(rt);
        }
    }

    fn restart_current(&mut self, rt: &mut PlaylistRuntime) {
        let index = if rt.current_index < rt.playlist.len() {
            rt.current_index
        } else {
            0
        };
        if let Err(e) = self.start_track(rt, index) {
            error!("Playlist {}: could not restart track {index}: {e}", rt.name());
            self.stop_playlist(rt);
        }
    }

    /// Remove the track at `index`, keeping playback consistent.
    fn remove_at(&mut self, rt: &mut PlaylistRuntime, index: usize) -> Option<Track> {
        let removed = rt.playlist.remove(index)?;
        if !rt.playing {
            if rt.current_index >= rt.playlist.len() {
                rt.current_index = 0;
            }
            return Some(removed);
        }

        if let Some(fade) = rt.crossfade.as_mut() {
            if fade.incoming_index == index {
                channel::stop_quietly(self.engine, fade.incoming);
                rt.crossfade = None;
                rt.incoming_segment = None;
            } else if fade.incoming_index > index {
                fade.incoming_index -= 1;
            }
        }

        if index == rt.current_index {
            if rt.crossfade.is_some() {
                self.finalize_crossfade(rt);
            } else if rt.playlist.is_empty() {
                self.stop_playlist(rt);
            } else if index < rt.playlist.len() {
                debug!("Playlist {}: playing track removed, cutting to next", rt.name());
                if let Err(e) = self.start_track(rt, index) {
                    error!("Playlist {}: could not start track {index}: {e}", rt.name());
                    self.stop_playlist(rt);
                }
            } else if rt.options.loop_playlist {
                if let Err(e) = self.start_track(rt, 0) {
                    error!("Playlist {}: could not start track 0: {e}", rt.name());
                    self.stop_playlist(rt);
                }
            } else {
                info!("Playlist {}: last track removed, stopping", rt.name());
                self.stop_playlist(rt);
            }
        } else if index < rt.current_index {
            rt.current_index -= 1;
        }

        if rt.playing && rt.options.random_order {
            rt.order = Some(ShuffleOrder::starting_with(
                rt.playlist.len(),
                rt.current_index,
                &mut *self.rng,
            ));
        }
        Some(removed)
    }

    fn stop_channels(&self, rt: &mut PlaylistRuntime) {
        if let Some(fade) = rt.crossfade.take() {
            channel::stop_quietly(self.engine, fade.incoming);
            if rt.current != Some(fade.outgoing) {
                channel::stop_quietly(self.engine, fade.outgoing);
            }
        }
        if let Some(current) = rt.current.take() {
            channel::stop_quietly(self.engine, current);
        }
        rt.segment = None;
        rt.incoming_segment = None;
    }

    fn stop_playlist(&self, rt: &mut PlaylistRuntime) {
        self.stop_channels(rt);
        rt.playing = false;
        rt.order = None;
    }
}
