use crate::{utils::db_to_linear, Error};

// -------------------------------------------------------------------------------------------------

/// Options to create a new [`Granular`](super::Granular) player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GranularOptions {
    /// By default 44100. Output sample rate of the voices. Native sample rates of the sample
    /// formats are derived from this rate: full, half and quarter rate.
    pub sample_rate: u32,

    /// By default 0.25f32. Output gain the host should apply to each voice when mixing.
    /// Clamped to range 0.0..=1.0. Values above 1/N, with N being the number of voices, may clip.
    pub gain: f32,

    /// By default 250ms. Base length of each grain.
    pub duration_ms: u32,

    /// By default 50ms. Half width of the random variation of a grain's length.
    pub duration_width_ms: u32,

    /// By default 1000ms. Half width of the random variation of a grain's position.
    pub position_width_ms: u32,

    /// By default 35ms. Minimum interval between two grain triggers.
    pub grain_density_ms: u32,

    /// By default None, which seeds the grain randomizer from the OS. Set to some fixed seed
    /// to get reproducible grain sequences.
    pub seed: Option<u64>,
}

impl Default for GranularOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            gain: 0.25,
            duration_ms: 250,
            duration_width_ms: 50,
            position_width_ms: 1000,
            grain_density_ms: 35,
            seed: None,
        }
    }
}

impl GranularOptions {
    const SAMPLE_RATE_RANGE: std::ops::RangeInclusive<u32> = 4000..=384000;

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }
    pub fn gain_db(mut self, gain_db: f32) -> Self {
        self.gain = db_to_linear(gain_db);
        self
    }

    pub fn duration(mut self, duration_ms: u32) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn duration_width(mut self, duration_width_ms: u32) -> Self {
        self.duration_width_ms = duration_width_ms;
        self
    }

    pub fn position_width(mut self, position_width_ms: u32) -> Self {
        self.position_width_ms = position_width_ms;
        self
    }

    pub fn grain_density(mut self, grain_density_ms: u32) -> Self {
        self.grain_density_ms = grain_density_ms;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate all options. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if !Self::SAMPLE_RATE_RANGE.contains(&self.sample_rate) {
            return Err(Error::ParameterError(format!(
                "granular options 'sample_rate' value is '{}'",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert!(GranularOptions::default().validate().is_ok());
        assert!(GranularOptions::default().gain_db(-6.0).validate().is_ok());
        assert!(GranularOptions::default().sample_rate(0).validate().is_err());
        assert!(GranularOptions::default()
            .sample_rate(1_000_000)
            .validate()
            .is_err());
        assert!(GranularOptions::default()
            .sample_rate(48000)
            .validate()
            .is_ok());
    }
}
