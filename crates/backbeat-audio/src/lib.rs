//! # backbeat-audio
//!
//! Audio engine for Backbeat.
//!
//! Features:
//! - A small engine trait addressed by sound and channel handles
//! - Symphonia decoding with rubato resampling
//! - cpal device output and a clock-driven virtual engine

pub mod decode;
pub mod device;
pub mod engine;
pub mod mixer;
pub mod output;
pub mod resample;
pub mod virtual_engine;

pub use device::DeviceEngine;
pub use engine::{AudioEngine, ChannelId, SoundId, SoundMode};
pub use virtual_engine::VirtualEngine;
