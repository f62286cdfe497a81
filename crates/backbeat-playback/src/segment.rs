//! Random sub-segment selection.

use std::time::Duration;

use rand::Rng;

/// A segment also ends this close to the sound's physical end.
pub const END_MARGIN: Duration = Duration::from_millis(500);

/// Whether a track of `length_ms` is long enough for segment playback.
pub fn applies(length_ms: u64, segment: Duration) -> bool {
    !segment.is_zero() && u128::from(length_ms) > segment.as_millis()
}

/// Segment length actually played: the configured maximum, capped at the track.
pub fn effective_length(segment: Duration, length_ms: u64) -> Duration {
    segment.min(Duration::from_millis(length_ms))
}

/// Uniform start offset in `[0, length − segment]`, or 0 when the track is
/// not longer than the segment.
pub fn pick_start<R: Rng + ?Sized>(length_ms: u64, segment: Duration, rng: &mut R) -> u64 {
    let segment_ms = u64::try_from(segment.as_millis()).unwrap_or(u64::MAX);
    if length_ms <= segment_ms {
        return 0;
    }
    rng.random_range(0..=length_ms - segment_ms)
}

/// Timer for the segment playing on a channel.
#[derive(Debug, Clone, Copy)]
pub struct SegmentTimer {
    pub start_ms: u64,
    pub elapsed: Duration,
    pub length: Duration,
}

impl SegmentTimer {
    pub fn new(start_ms: u64, segment: Duration, track_length_ms: u64) -> Self {
        Self {
            start_ms,
            elapsed: Duration::ZERO,
            length: effective_length(segment, track_length_ms),
        }
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.elapsed = self.elapsed.saturating_add(elapsed);
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.length
    }

    /// Whether a channel at `position_ms` is within [`END_MARGIN`] of `length_ms`.
    pub fn near_end(position_ms: u64, length_ms: u64) -> bool {
        position_ms.saturating_add(END_MARGIN.as_millis() as u64) >= length_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_short_track_starts_at_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pick_start(20_000, Duration::from_secs(30), &mut rng), 0);
        assert_eq!(pick_start(30_000, Duration::from_secs(30), &mut rng), 0);
        assert!(!applies(30_000, Duration::from_secs(30)));
        assert!(applies(30_001, Duration::from_secs(30)));
        assert!(!applies(30_001, Duration::ZERO));
    }

    #[test]
    fn test_effective_length() {
        assert_eq!(
            effective_length(Duration::from_secs(30), 12_000),
            Duration::from_secs(12)
        );
        assert_eq!(
            effective_length(Duration::from_secs(30), 90_000),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_timer() {
        let mut timer = SegmentTimer::new(1_000, Duration::from_secs(2), 60_000);
        timer.advance(Duration::from_millis(1_900));
        assert!(!timer.is_finished());
        timer.advance(Duration::from_millis(100));
        assert!(timer.is_finished());
        assert!(SegmentTimer::near_end(59_500, 60_000));
        assert!(!SegmentTimer::near_end(59_499, 60_000));
    }

    proptest! {
        #[test]
        fn start_stays_in_bounds(length in 0u64..600_000, segment_ms in 1u64..120_000, seed: u64) {
            let mut rng = StdRng::seed_from_u64(seed);
            let segment = Duration::from_millis(segment_ms);
            let start = pick_start(length, segment, &mut rng);
            if length > segment_ms {
                prop_assert!(start <= length - segment_ms);
            } else {
                prop_assert_eq!(start, 0);
            }
        }
    }
}
