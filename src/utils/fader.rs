//! Fixed-point grain envelope, de-clicking tools.

use assume::assume;

// -------------------------------------------------------------------------------------------------

/// A 257 point trapezoid envelope table: a raised cosine fade-in over the first quarter,
/// a full scale plateau across the middle half and a symmetric fade-out over the last quarter.
///
/// The table is looked up with a 32 bit fixed-point phase, where the top 8 bits select one of
/// the 256 segments and the next 16 bits linearly interpolate within the segment.
pub struct FadeTable {
    values: [i16; 257],
}

/// The one and only, shared fade table instance used by all grain voices.
pub static FADE_TABLE: FadeTable = FadeTable::new();

impl FadeTable {
    #[rustfmt::skip]
    const VALUES: [i16; 257] = [
            0,
           19,    78,   177,   314,   490,   705,   957,  1247,
         1572,  1934,  2330,  2761,  3224,  3718,  4244,  4798,
         5381,  5989,  6623,  7281,  7960,  8660,  9378, 10113,
        10864, 11627, 12402, 13187, 13979, 14777, 15579, 16383,
        17187, 17989, 18787, 19579, 20364, 21139, 21902, 22653,
        23388, 24106, 24806, 25485, 26143, 26777, 27385, 27968,
        28522, 29048, 29542, 30005, 30436, 30832, 31194, 31519,
        31809, 32061, 32276, 32452, 32589, 32688, 32747, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32767, 32767, 32767, 32767, 32767, 32767, 32767, 32767,
        32747, 32688, 32589, 32452, 32276, 32061, 31809, 31519,
        31194, 30832, 30436, 30005, 29542, 29048, 28522, 27968,
        27385, 26777, 26143, 25485, 24806, 24106, 23388, 22653,
        21902, 21139, 20364, 19579, 18787, 17989, 17187, 16383,
        15579, 14777, 13979, 13187, 12402, 11627, 10864, 10113,
         9378,  8660,  7960,  7281,  6623,  5989,  5381,  4798,
         4244,  3718,  3224,  2761,  2330,  1934,  1572,  1247,
          957,   705,   490,   314,   177,    78,    19,     0,
    ];

    const fn new() -> Self {
        Self {
            values: Self::VALUES,
        }
    }

    /// Raw table values.
    pub fn values(&self) -> &[i16; 257] {
        &self.values
    }

    /// Interpolated envelope amplitude at the given fixed-point phase, in range 0..=32767.
    #[inline]
    pub fn amplitude(&self, phase: u32) -> i32 {
        let index = (phase >> 24) as usize;
        let scale = ((phase >> 8) & 0xFFFF) as i32;
        assume!(unsafe: index + 1 < 257, "Phase top byte selects one of 256 segments");
        let val1 = self.values[index] as i32 * (0x10000 - scale);
        let val2 = self.values[index + 1] as i32 * scale;
        (val1 + val2) >> 16
    }

    /// Scale a sample by the envelope amplitude at the given phase.
    #[inline]
    pub fn apply(&self, sample: i16, phase: u32) -> i16 {
        ((sample as i32 * self.amplitude(phase)) >> 15) as i16
    }
}

// -------------------------------------------------------------------------------------------------

/// Per grain envelope state: walks the shared [`FadeTable`] once from start to end over the
/// lifetime of a grain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FadeEnvelope {
    position: u32,
    rate: u32,
}

impl FadeEnvelope {
    /// Create a new envelope that spans `length` output samples. `length` must not be 0.
    pub fn new(length: u32) -> Self {
        debug_assert!(length > 0, "Invalid envelope length");
        Self {
            position: 0,
            rate: u32::MAX / length.max(1),
        }
    }

    /// Current fixed-point envelope phase.
    #[inline]
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Phase increment per processed sample.
    #[inline]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Apply the envelope to the given sample and advance the envelope by one step.
    /// The envelope phase saturates at `u32::MAX` instead of wrapping.
    #[inline]
    pub fn process(&mut self, sample: i16) -> i16 {
        let faded = FADE_TABLE.apply(sample, self.position);
        self.position = self.position.saturating_add(self.rate);
        faded
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_shape() {
        let values = FADE_TABLE.values();
        assert_eq!(values[0], 0);
        assert_eq!(values[256], 0);
        assert!(values[64..=192].iter().all(|v| *v == i16::MAX));
        for index in 0..64 {
            assert!(values[index] < values[index + 1]);
        }
        for index in 0..=256 {
            assert_eq!(values[index], values[256 - index]);
        }
    }

    #[test]
    fn amplitude_lookup() {
        assert_eq!(FADE_TABLE.amplitude(0), 0);
        assert_eq!(FADE_TABLE.amplitude(1 << 24), 19);
        assert_eq!(FADE_TABLE.amplitude(u32::MAX / 2), i16::MAX as i32);
        // halfway between the first two points: (0 * 0x8000 + 19 * 0x8000) >> 16
        assert_eq!(FADE_TABLE.amplitude(0x0080_0000), 9);
        // max phase sits right before the last point
        assert_eq!(FADE_TABLE.amplitude(u32::MAX), 0);
    }

    #[test]
    fn amplitude_is_symmetric() {
        let mut phase = 0u32;
        loop {
            let rising = FADE_TABLE.amplitude(phase);
            let falling = FADE_TABLE.amplitude(u32::MAX - phase);
            assert!(
                (rising - falling).abs() <= 1,
                "phase {phase}: {rising} vs {falling}"
            );
            match phase.checked_add(0x0001_3579) {
                Some(next) => phase = next,
                None => break,
            }
        }
    }

    #[test]
    fn apply_scales_samples() {
        assert_eq!(FADE_TABLE.apply(i16::MAX, 0), 0);
        assert_eq!(FADE_TABLE.apply(i16::MAX, 0x8000_0000), 32766);
        assert_eq!(FADE_TABLE.apply(-20000, 0x8000_0000), -20000);
        assert_eq!(FADE_TABLE.apply(1000, 0x2000_0000), 499);
    }

    #[test]
    fn envelope_saturates() {
        for length in [1, 2, 3, 7, 128, 1000, 44100] {
            let mut envelope = FadeEnvelope::new(length);
            let mut last_position = 0;
            let mut reached_plateau_at = None;
            for step in 0..length + 16 {
                envelope.process(0);
                assert!(envelope.position() >= last_position);
                last_position = envelope.position();
                if reached_plateau_at.is_none() && last_position >= 1 << 30 {
                    reached_plateau_at = Some(step + 1);
                }
            }
            assert_eq!(envelope.position(), u32::MAX);
            assert!(reached_plateau_at.is_some_and(|step| step <= length.div_ceil(2)));
        }
    }
}
