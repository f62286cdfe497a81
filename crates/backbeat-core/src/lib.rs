//! # backbeat-core
//!
//! Core types, resource locks, and error handling for the Backbeat venue player.

pub mod error;
pub mod lock;
pub mod types;

pub use error::{Error, Result};
pub use lock::{LockInfo, LockManager, ResourceGuard, ResourceType, DEFAULT_LOCK_TIMEOUT};
pub use types::*;
