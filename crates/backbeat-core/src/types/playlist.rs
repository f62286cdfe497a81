//! Playlist types and their persisted form.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Track;
use crate::{Error, Result};

/// Segment length used when none is configured.
pub const DEFAULT_SEGMENT_SECS: f32 = 30.0;

/// How a playlist is played.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistOptions {
    /// Walk a shuffled permutation instead of list order.
    #[serde(default)]
    pub random_order: bool,
    /// Play a random sub-interval of each track.
    #[serde(default)]
    pub random_segment: bool,
    /// Length of each segment in seconds.
    #[serde(rename = "segmentDuration", default = "default_segment_secs")]
    pub segment_duration_secs: f32,
    /// Start over after the last track.
    #[serde(default = "default_loop")]
    pub loop_playlist: bool,
}

const fn default_segment_secs() -> f32 {
    DEFAULT_SEGMENT_SECS
}

const fn default_loop() -> bool {
    true
}

impl Default for PlaylistOptions {
    fn default() -> Self {
        Self {
            random_order: false,
            random_segment: false,
            segment_duration_secs: DEFAULT_SEGMENT_SECS,
            loop_playlist: true,
        }
    }
}

impl PlaylistOptions {
    /// Segment length as a duration; non-finite or negative values become zero.
    pub fn segment_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.segment_duration_secs).unwrap_or(Duration::ZERO)
    }

    pub fn validate(&self) -> Result<()> {
        if self.random_segment
            && !(self.segment_duration_secs.is_finite() && self.segment_duration_secs > 0.0)
        {
            return Err(Error::InvalidArgument(format!(
                "segment duration must be positive, got {}",
                self.segment_duration_secs
            )));
        }
        Ok(())
    }
}

/// A named, ordered list of tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    /// Unique playlist name.
    pub name: String,
    /// Playback options used when the playlist starts.
    pub options: PlaylistOptions,
    tracks: Vec<Track>,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: PlaylistOptions::default(),
            tracks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: PlaylistOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub const fn len(&self) -> usize {
        self.tracks.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Append a track.
    pub fn push(&mut self, track: Track) {
        self.tracks.push(track);
    }

    /// Remove the track at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        (index < self.tracks.len()).then(|| self.tracks.remove(index))
    }

    /// Move a track from one position to another.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.tracks.len();
        if from >= len || to >= len {
            return Err(Error::InvalidArgument(format!(
                "cannot move track {from} to {to} in '{}' ({len} tracks)",
                self.name
            )));
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Convert into the form written to disk.
    pub fn to_record(&self) -> PlaylistRecord {
        PlaylistRecord {
            name: self.name.clone(),
            options: self.options,
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackRecord {
                    id: t.id.clone(),
                    path: t.file_path.clone(),
                })
                .collect(),
        }
    }
}

/// Persisted playlist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistRecord {
    pub name: String,
    #[serde(default)]
    pub options: PlaylistOptions,
    #[serde(default)]
    pub tracks: Vec<TrackRecord>,
}

/// Persisted reference to a track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackRecord {
    pub id: String,
    pub path: PathBuf,
}

impl PlaylistRecord {
    /// Decode one record, reporting structural problems as malformed data.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let record: Self = serde_json::from_value(value)
            .map_err(|e| Error::MalformedData(format!("playlist record: {e}")))?;
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::MalformedData("playlist record has no name".into()));
        }
        if let Some(track) = self.tracks.iter().find(|t| t.id.is_empty()) {
            return Err(Error::MalformedData(format!(
                "playlist '{}' has a track without id (path {})",
                self.name,
                track.path.display()
            )));
        }
        self.options
            .validate()
            .map_err(|e| Error::MalformedData(format!("playlist '{}': {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_track(id: &str) -> Track {
        Track::new(id, format!("/music/{id}.mp3"), 60_000)
    }

    fn make_playlist() -> Playlist {
        let mut playlist = Playlist::new("lobby");
        for id in ["a", "b", "c"] {
            playlist.push(make_track(id));
        }
        playlist
    }

    #[test]
    fn test_move_track() {
        let mut playlist = make_playlist();
        playlist.move_track(0, 2).unwrap();
        let ids: Vec<&str> = playlist.tracks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        assert!(playlist.move_track(0, 3).is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let record = make_playlist().to_record();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["options"]["randomOrder"], json!(false));
        assert_eq!(value["options"]["segmentDuration"], json!(30.0));
        assert_eq!(value["options"]["loopPlaylist"], json!(true));
        assert_eq!(value["tracks"][1], json!({"id": "b", "path": "/music/b.mp3"}));
    }

    #[test]
    fn test_record_defaults_missing_options() {
        let record = PlaylistRecord::from_value(json!({"name": "bar", "tracks": []})).unwrap();
        assert_eq!(record.options, PlaylistOptions::default());
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(
            PlaylistRecord::from_value(json!({"tracks": []})),
            Err(Error::MalformedData(_))
        ));
        assert!(matches!(
            PlaylistRecord::from_value(json!({"name": " "})),
            Err(Error::MalformedData(_))
        ));
        assert!(matches!(
            PlaylistRecord::from_value(json!({"name": "x", "tracks": [{"id": "", "path": "a"}]})),
            Err(Error::MalformedData(_))
        ));
        assert!(matches!(
            PlaylistRecord::from_value(json!({
                "name": "x",
                "options": {"randomSegment": true, "segmentDuration": 0.0}
            })),
            Err(Error::MalformedData(_))
        ));
    }
}
