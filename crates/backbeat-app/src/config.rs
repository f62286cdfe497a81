//! Settings file for the `backbeat` binary.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use backbeat_playback::{MixLevels, OrchestratorConfig, SequencerConfig, VenueConfig};
use chrono::{NaiveTime, Timelike};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

const SETTINGS_FILE: &str = "backbeat.toml";
const PLAYLISTS_FILE: &str = "playlists.json";

/// Which audio engine drives playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Device,
    /// Clock-driven engine without audio output.
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub master: f32,
    pub music: f32,
    pub announcement: f32,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            master: 1.0,
            music: 1.0,
            announcement: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckingSettings {
    /// Music level while an announcement plays.
    pub volume: f32,
    pub fade_secs: f32,
}

impl Default for DuckingSettings {
    fn default() -> Self {
        Self {
            volume: 0.3,
            fade_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SfxSettings {
    pub lead: Option<PathBuf>,
    pub trail: Option<PathBuf>,
    pub lead_enabled: bool,
    pub trail_enabled: bool,
}

impl Default for SfxSettings {
    fn default() -> Self {
        Self {
            lead: None,
            trail: None,
            lead_enabled: true,
            trail_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementEntry {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Wall-clock time as `HH:MM`.
    pub at: String,
    pub announcement: String,
}

impl ScheduleEntry {
    pub fn time(&self) -> Result<(u8, u8)> {
        let time = NaiveTime::parse_from_str(&self.at, "%H:%M")
            .with_context(|| format!("invalid schedule time {:?}, expected HH:MM", self.at))?;
        Ok((time.hour() as u8, time.minute() as u8))
    }
}

/// Everything the binary reads from `backbeat.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tick_ms: u64,
    pub lock_timeout_ms: u64,
    pub crossfade_secs: f32,
    pub engine: EngineKind,
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub log_filter: Option<String>,
    /// Playlist to start once everything is loaded.
    pub autoplay: Option<String>,
    pub playlists_file: Option<PathBuf>,
    pub volume: VolumeSettings,
    pub ducking: DuckingSettings,
    pub sfx: SfxSettings,
    pub announcements: Vec<AnnouncementEntry>,
    pub schedule: Vec<ScheduleEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            lock_timeout_ms: 1_000,
            crossfade_secs: 3.0,
            engine: EngineKind::default(),
            log_filter: None,
            autoplay: None,
            playlists_file: None,
            volume: VolumeSettings::default(),
            ducking: DuckingSettings::default(),
            sfx: SfxSettings::default(),
            announcements: Vec::new(),
            schedule: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, else from the platform config directory,
    /// else fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match project_dirs().map(|dirs| dirs.config_dir().join(SETTINGS_FILE)) {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        let settings =
            Self::from_toml(&text).with_context(|| format!("in settings {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).context("failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            bail!("tick_ms must be positive");
        }
        if !(self.crossfade_secs >= 0.0 && self.crossfade_secs.is_finite()) {
            bail!("crossfade_secs must be a non-negative number");
        }
        if !(self.ducking.fade_secs >= 0.0 && self.ducking.fade_secs.is_finite()) {
            bail!("ducking.fade_secs must be a non-negative number");
        }
        for (name, value) in [
            ("volume.master", self.volume.master),
            ("volume.music", self.volume.music),
            ("volume.announcement", self.volume.announcement),
            ("ducking.volume", self.ducking.volume),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be between 0 and 1, got {value}");
            }
        }
        for entry in &self.schedule {
            entry.time()?;
        }
        Ok(())
    }

    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Playlists file, defaulting to the platform data directory.
    pub fn playlists_path(&self) -> Option<PathBuf> {
        self.playlists_file.clone().or_else(|| {
            project_dirs().map(|dirs| dirs.data_dir().join(PLAYLISTS_FILE))
        })
    }

    pub fn venue_config(&self) -> VenueConfig {
        VenueConfig {
            orchestrator: OrchestratorConfig {
                crossfade_duration: Duration::from_secs_f32(self.crossfade_secs),
                ..OrchestratorConfig::default()
            },
            sequencer: SequencerConfig {
                duck_volume: self.ducking.volume,
                duck_fade: Duration::from_secs_f32(self.ducking.fade_secs),
                lead_sfx_enabled: self.sfx.lead_enabled,
                trail_sfx_enabled: self.sfx.trail_enabled,
                ..SequencerConfig::default()
            },
            levels: MixLevels {
                master: self.volume.master,
                music: self.volume.music,
                announcement: self.volume.announcement,
                duck: 1.0,
            },
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            ..VenueConfig::default()
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "backbeat", "Backbeat")
}
