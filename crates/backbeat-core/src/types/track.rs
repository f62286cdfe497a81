//! Track type representing a single loaded audio file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::Position;

/// A single track known to the player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    /// Library-wide unique identifier.
    pub id: String,
    /// Location of the audio file.
    pub file_path: PathBuf,
    /// Name shown to the operator.
    pub display_name: String,
    /// Length measured when the sound was loaded.
    duration_ms: u64,
}

impl Track {
    /// Create a track; the display name defaults to the file stem.
    pub fn new(id: impl Into<String>, file_path: impl Into<PathBuf>, duration_ms: u64) -> Self {
        let file_path = file_path.into();
        let display_name = display_name_for(&file_path);
        Self {
            id: id.into(),
            file_path,
            display_name,
            duration_ms,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub const fn duration(&self) -> Position {
        Position::from_millis(self.duration_ms)
    }
}

fn display_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_creation() {
        let track = Track::new("t1", "/music/Morning Jazz.mp3", 185_000);
        assert_eq!(track.id, "t1");
        assert_eq!(track.display_name, "Morning Jazz");
        assert_eq!(track.duration().format(), "3:05");
    }

    #[test]
    fn test_display_name_override() {
        let track = Track::new("t1", "a.ogg", 1).with_display_name("Opening");
        assert_eq!(track.display_name, "Opening");
    }
}
