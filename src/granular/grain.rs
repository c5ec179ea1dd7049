use rand::Rng;

// -------------------------------------------------------------------------------------------------

/// Position and duration of a single grain in milliseconds, as triggered by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrainRequest {
    /// Start position of the grain in the sample.
    pub position_ms: u32,
    /// Length of the grain.
    pub duration_ms: u32,
}

impl GrainRequest {
    /// Safety margin which is kept free before the end of the usable sample range when a grain
    /// would overrun it.
    pub const END_MARGIN_MS: u32 = 3;

    /// Randomize a new grain around the given base values.
    ///
    /// The duration varies by +/- `duration_width_ms` around `duration_ms`, or within
    /// `0..2*duration_ms` when the width exceeds the duration.
    ///
    /// The position varies by +/- `position_width_ms` around `position_ms`. Positions close to
    /// the start get drawn from `0..2*position_width_ms`, and grains that would overrun the
    /// usable sample length get moved back before its end.
    pub(crate) fn randomize<R: Rng>(spread: &GrainSpread, rng: &mut R) -> Self {
        let duration_ms = if spread.duration_width_ms > spread.duration_ms {
            random_below(rng, spread.duration_ms.saturating_mul(2))
        } else {
            spread.duration_ms - spread.duration_width_ms
                + random_below(rng, spread.duration_width_ms.saturating_mul(2))
        };

        let position_ms = if spread.position_ms < spread.position_width_ms {
            random_below(rng, spread.position_width_ms.saturating_mul(2))
        } else if spread.position_ms.saturating_add(duration_ms) >= spread.usable_length_ms {
            spread
                .usable_length_ms
                .saturating_sub(duration_ms)
                .saturating_sub(Self::END_MARGIN_MS)
                .saturating_sub(random_below(rng, spread.position_width_ms))
        } else {
            spread.position_ms - spread.position_width_ms
                + random_below(rng, spread.position_width_ms.saturating_mul(2))
        };

        Self {
            position_ms,
            duration_ms,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Base values and widths for grain randomization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GrainSpread {
    pub duration_ms: u32,
    pub duration_width_ms: u32,
    pub position_ms: u32,
    pub position_width_ms: u32,
    pub usable_length_ms: u32,
}

/// Uniformly draw a value from `0..bound`, or 0 when the range is empty.
fn random_below<R: Rng>(rng: &mut R, bound: u32) -> u32 {
    if bound == 0 {
        0
    } else {
        rng.random_range(0..bound)
    }
}

// -------------------------------------------------------------------------------------------------

/// Nominal playhead position, mapped linearly onto the usable sample length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayheadPosition {
    /// Normalized position in range 0.0..=1.0. Values outside get clamped.
    Normalized(f64),
    /// 16 bit fixed-point position: 0 is the start, 0xFFFF the end.
    Fixed16(u16),
    /// 32 bit fixed-point position: 0 is the start, 0xFFFFFFFF the end.
    Fixed32(u32),
}

impl PlayheadPosition {
    /// Map the position onto the given length in milliseconds.
    pub fn to_millis(self, length_ms: u32) -> u32 {
        match self {
            Self::Normalized(position) => {
                let position = if position.is_nan() {
                    0.0
                } else {
                    position.clamp(0.0, 1.0)
                };
                (position * length_ms as f64) as u32
            }
            Self::Fixed16(position) => {
                (position as u64 * length_ms as u64 / u16::MAX as u64) as u32
            }
            Self::Fixed32(position) => Self::Fixed16((position >> 16) as u16).to_millis(length_ms),
        }
    }
}

impl From<f64> for PlayheadPosition {
    fn from(position: f64) -> Self {
        Self::Normalized(position)
    }
}

impl From<f32> for PlayheadPosition {
    fn from(position: f32) -> Self {
        Self::Normalized(position as f64)
    }
}

impl From<u16> for PlayheadPosition {
    fn from(position: u16) -> Self {
        Self::Fixed16(position)
    }
}

impl From<u32> for PlayheadPosition {
    fn from(position: u32) -> Self {
        Self::Fixed32(position)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn randomize_around_center() {
        let spread = GrainSpread {
            duration_ms: 250,
            duration_width_ms: 50,
            position_ms: 5000,
            position_width_ms: 1000,
            usable_length_ms: 10000,
        };
        let mut rng = SmallRng::seed_from_u64(0x1234);
        for _ in 0..10_000 {
            let grain = GrainRequest::randomize(&spread, &mut rng);
            assert!((200..300).contains(&grain.duration_ms), "{grain:?}");
            assert!((4000..6000).contains(&grain.position_ms), "{grain:?}");
        }
    }

    #[test]
    fn randomize_near_end() {
        let spread = GrainSpread {
            duration_ms: 300,
            duration_width_ms: 0,
            position_ms: 9900,
            position_width_ms: 1000,
            usable_length_ms: 10000,
        };
        let mut rng = SmallRng::seed_from_u64(0x5678);
        for _ in 0..10_000 {
            let grain = GrainRequest::randomize(&spread, &mut rng);
            assert_eq!(grain.duration_ms, 300);
            assert!(
                grain.position_ms + grain.duration_ms
                    <= spread.usable_length_ms - GrainRequest::END_MARGIN_MS,
                "{grain:?}"
            );
            assert!(grain.position_ms > 10000 - 300 - 3 - 1000, "{grain:?}");
        }
    }

    #[test]
    fn randomize_near_start() {
        let spread = GrainSpread {
            duration_ms: 100,
            duration_width_ms: 200,
            position_ms: 10,
            position_width_ms: 500,
            usable_length_ms: 10000,
        };
        let mut rng = SmallRng::seed_from_u64(0x9ABC);
        for _ in 0..10_000 {
            let grain = GrainRequest::randomize(&spread, &mut rng);
            // width exceeds the base duration: draw from 0..2*duration
            assert!(grain.duration_ms < 200, "{grain:?}");
            assert!(grain.position_ms < 1000, "{grain:?}");
        }
    }

    #[test]
    fn randomize_without_widths() {
        let spread = GrainSpread {
            duration_ms: 120,
            duration_width_ms: 0,
            position_ms: 700,
            position_width_ms: 0,
            usable_length_ms: 10000,
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let grain = GrainRequest::randomize(&spread, &mut rng);
        assert_eq!(
            grain,
            GrainRequest {
                position_ms: 700,
                duration_ms: 120
            }
        );

        // degenerated: nothing usable at all
        let mut rng = SmallRng::seed_from_u64(2);
        let grain = GrainRequest::randomize(&GrainSpread::default(), &mut rng);
        assert_eq!(
            grain,
            GrainRequest {
                position_ms: 0,
                duration_ms: 0
            }
        );
    }

    #[test]
    fn playhead_mapping() {
        assert_eq!(PlayheadPosition::from(0.5f64).to_millis(10000), 5000);
        assert_eq!(PlayheadPosition::from(-1.0f32).to_millis(10000), 0);
        assert_eq!(PlayheadPosition::from(2.0f64).to_millis(10000), 10000);
        assert_eq!(PlayheadPosition::from(f64::NAN).to_millis(10000), 0);
        assert_eq!(PlayheadPosition::from(0u16).to_millis(10000), 0);
        assert_eq!(PlayheadPosition::from(u16::MAX).to_millis(10000), 10000);
        assert_eq!(PlayheadPosition::from(0x8000u16).to_millis(65535), 0x8000);
        assert_eq!(PlayheadPosition::from(u32::MAX).to_millis(10000), 10000);
        assert_eq!(PlayheadPosition::from(0x0001_FFFFu32).to_millis(65535), 1);
    }
}
