//! Fixed-point conversions between milliseconds and sample counts.

// -------------------------------------------------------------------------------------------------

/// Converts sample counts into milliseconds and back at a fixed sample rate.
///
/// Both directions use a 32.32 fixed-point factor which is applied as `(value * K) >> 32`,
/// so repeated conversions never accumulate floating point drift:
/// - samples to millis: `K = 2^32 * 1000 / sample_rate`
/// - millis to samples: `K = 2^32 * sample_rate / 1000`
///
/// Factors are rounded up, so whole seconds convert without losing a sample or millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MillisConverter {
    sample_rate: u32,
    samples_to_millis: u64,
    millis_to_samples: u64,
}

impl MillisConverter {
    /// Create a new converter for the given sample rate. The sample rate must not be 0.
    pub const fn new(sample_rate: u32) -> Self {
        assert!(sample_rate > 0, "Invalid sample rate");
        let samples_to_millis = ((1u64 << 32) * 1000).div_ceil(sample_rate as u64);
        let millis_to_samples = ((sample_rate as u64) << 32).div_ceil(1000);
        Self {
            sample_rate,
            samples_to_millis,
            millis_to_samples,
        }
    }

    /// The sample rate this converter was created for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Convert a sample count into milliseconds.
    #[inline]
    pub fn samples_to_millis(&self, samples: u32) -> u32 {
        ((samples as u128 * self.samples_to_millis as u128) >> 32) as u32
    }

    /// Convert milliseconds into a sample count, saturating at `u32::MAX`.
    #[inline]
    pub fn millis_to_samples(&self, millis: u32) -> u32 {
        ((millis as u128 * self.millis_to_samples as u128) >> 32).min(u32::MAX as u128) as u32
    }
}

// -------------------------------------------------------------------------------------------------
