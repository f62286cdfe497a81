//! Error types for Backbeat.

use thiserror::Error;

use crate::lock::ResourceType;

/// Result type alias using Backbeat's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Backbeat.
///
/// Nothing in the playback core treats an error as fatal: callers log it and
/// carry on with the state they had before the failed operation.
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors
    #[error("{kind} not found: {name}")]
    ResourceNotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    // Lock errors
    #[error("Timed out waiting for {resource} lock")]
    LockTimeout { resource: String },

    // Audio errors
    #[error("Audio engine call failed: {0}")]
    Engine(String),

    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // Persistence errors
    #[error("Malformed persisted data: {0}")]
    MalformedData(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn lock_timeout(resource_type: ResourceType, name: &str) -> Self {
        Self::LockTimeout {
            resource: format!("{resource_type}:{name}"),
        }
    }

    /// Returns true if retrying on a later tick may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Returns true if this is a failure reported by the audio engine.
    pub const fn is_engine_failure(&self) -> bool {
        matches!(self, Self::Engine(_))
    }
}
