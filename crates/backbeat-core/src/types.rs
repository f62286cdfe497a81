//! Core domain types for Backbeat.

pub mod announcement;
pub mod common;
pub mod playlist;
pub mod track;

pub use announcement::{Schedule, ScheduledAnnouncement};
pub use common::*;
pub use playlist::{Playlist, PlaylistOptions, PlaylistRecord, TrackRecord, DEFAULT_SEGMENT_SECS};
pub use track::Track;
