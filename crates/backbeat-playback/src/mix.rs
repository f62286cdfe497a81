//! Global mix levels shared by every playback service.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Volume multipliers applied on top of per-channel gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixLevels {
    pub master: f32,
    pub music: f32,
    pub announcement: f32,
    /// Music attenuation while an announcement runs; 1.0 means none.
    pub duck: f32,
}

impl Default for MixLevels {
    fn default() -> Self {
        Self {
            master: 1.0,
            music: 1.0,
            announcement: 1.0,
            duck: 1.0,
        }
    }
}

impl MixLevels {
    /// Full gain for a music channel at the top of its ramp.
    pub fn music_gain(&self) -> f32 {
        self.master * self.music * self.duck
    }

    pub fn announcement_gain(&self) -> f32 {
        self.announcement * self.master
    }
}

pub type SharedLevels = Arc<RwLock<MixLevels>>;

pub fn shared_levels(levels: MixLevels) -> SharedLevels {
    Arc::new(RwLock::new(levels))
}

/// A service that owns music channels and can re-apply the current levels.
pub trait VolumeSink: Send + Sync {
    fn refresh_volumes(&self);
}
