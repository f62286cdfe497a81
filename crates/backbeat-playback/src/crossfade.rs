//! Linear crossfade and fade-in ramps.

use std::time::Duration;

use backbeat_audio::ChannelId;

/// Complementary gains at progress `t`: `(outgoing, incoming)`.
pub fn crossfade_gains(t: f32, base: f32) -> (f32, f32) {
    let t = if t.is_nan() { 1.0 } else { t.clamp(0.0, 1.0) };
    (base * (1.0 - t), base * t)
}

fn progress(elapsed: Duration, duration: Duration) -> f32 {
    if elapsed >= duration {
        1.0
    } else {
        elapsed.as_secs_f32() / duration.as_secs_f32()
    }
}

/// A crossfade from the current channel into the next track.
#[derive(Debug, Clone)]
pub struct Crossfade {
    pub outgoing: ChannelId,
    pub incoming: ChannelId,
    /// Playlist position of the incoming track.
    pub incoming_index: usize,
    elapsed: Duration,
    duration: Duration,
}

impl Crossfade {
    pub const fn new(
        outgoing: ChannelId,
        incoming: ChannelId,
        incoming_index: usize,
        duration: Duration,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            incoming_index,
            elapsed: Duration::ZERO,
            duration,
        }
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.elapsed = self.elapsed.saturating_add(elapsed);
    }

    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub const fn duration(&self) -> Duration {
        self.duration
    }

    pub fn progress(&self) -> f32 {
        progress(self.elapsed, self.duration)
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// `(outgoing, incoming)` volumes for a channel at full gain `base`.
    pub fn gains(&self, base: f32) -> (f32, f32) {
        crossfade_gains(self.progress(), base)
    }
}

/// Linear 0 → 1 ramp used for fade-ins.
#[derive(Debug, Clone, Copy)]
pub struct Ramp {
    elapsed: Duration,
    duration: Duration,
}

impl Ramp {
    pub const fn new(duration: Duration) -> Self {
        Self {
            elapsed: Duration::ZERO,
            duration,
        }
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.elapsed = self.elapsed.saturating_add(elapsed);
    }

    pub fn progress(&self) -> f32 {
        progress(self.elapsed, self.duration)
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed >= self.duration
    }

    pub fn gain(&self, base: f32) -> f32 {
        base * self.progress()
    }
}
