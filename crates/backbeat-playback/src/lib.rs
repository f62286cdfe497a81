//! # backbeat-playback
//!
//! Playlist orchestration, crossfading, segment playback and announcement
//! sequencing on top of an [`AudioEngine`](backbeat_audio::AudioEngine).

pub mod announcement;
pub mod channel;
pub mod crossfade;
pub mod mix;
pub mod orchestrator;
pub mod order;
pub mod persistence;
pub mod scheduler;
pub mod segment;
pub mod venue;

pub use announcement::{AnnouncementSequencer, SequenceState, SequencerConfig};
pub use mix::{shared_levels, MixLevels, SharedLevels, VolumeSink};
pub use orchestrator::{OrchestratorConfig, PlaylistOrchestrator, PlaylistStatus, Progress};
pub use scheduler::{PlaybackScheduler, SchedulerConfig};
pub use venue::{Venue, VenueConfig};
