//! Grain scheduler: periodically triggers randomized grains on a fixed pool of voices.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    sample::Sample,
    voice::{GrainVoice, VoiceHandle},
    Error,
};

// -------------------------------------------------------------------------------------------------

mod grain;
mod options;

pub use grain::{GrainRequest, PlayheadPosition};
pub use options::GranularOptions;

use grain::GrainSpread;

// -------------------------------------------------------------------------------------------------

/// Result of a single scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Not playing, or the grain density interval has not yet elapsed.
    Waiting,
    /// A new grain got triggered on the given voice.
    Triggered { voice: usize, grain: GrainRequest },
    /// A grain was due, but got dropped because all voices are busy or its segment was empty.
    Dropped { grain: GrainRequest },
}

// -------------------------------------------------------------------------------------------------

/// Granular player, which spawns randomized grains of a single [`Sample`] on a fixed pool of
/// `N` voices.
///
/// The player is the control side of the voices: it owns a [`VoiceHandle`] for each voice in its
/// pool, while the [`GrainVoice`]s themselves get returned on construction, so they can be
/// moved into the host's audio thread.
///
/// Grain lengths and positions vary randomly around the configured base values. To make sure
/// that grains never run past the end of the sample, the usable sample length is the true
/// sample length minus the max grain length (duration + duration width). Positions get mapped
/// linearly onto this usable range.
///
/// Call [`tick`](Self::tick) or [`tick_elapsed`](Self::tick_elapsed) regularly from the control
/// thread, at least once per grain density interval, to trigger new grains.
pub struct Granular<const N: usize> {
    sample: Option<Arc<Sample>>,
    voices: [VoiceHandle; N],
    sample_rate: u32,
    true_sample_length_ms: u32,
    usable_sample_length_ms: u32,
    position_ms: u32,
    duration_ms: u32,
    duration_width_ms: u32,
    position_width_ms: u32,
    grain_density_ms: u32,
    gain: f32,
    playing: bool,
    elapsed: Duration,
    last_tick: Option<Instant>,
    rng: SmallRng,
}

impl<const N: usize> Granular<N> {
    /// Create a new granular player for the given sample, and its pool of `N` idle voices.
    pub fn new(
        sample: Option<Arc<Sample>>,
        options: GranularOptions,
    ) -> Result<(Self, [GrainVoice; N]), Error> {
        options.validate()?;
        if N == 0 {
            return Err(Error::ParameterError(
                "granular player needs at least one voice".to_string(),
            ));
        }
        let voices: [GrainVoice; N] =
            std::array::from_fn(|index| GrainVoice::new(index, options.sample_rate));
        let handles = voices.each_ref().map(GrainVoice::handle);
        let rng = match options.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let mut granular = Self {
            sample: None,
            voices: handles,
            sample_rate: options.sample_rate,
            true_sample_length_ms: 0,
            usable_sample_length_ms: 0,
            position_ms: 0,
            duration_ms: 0,
            duration_width_ms: 0,
            position_width_ms: 0,
            grain_density_ms: options.grain_density_ms,
            gain: options.gain,
            playing: false,
            elapsed: Duration::ZERO,
            last_tick: None,
            rng,
        };
        granular.set_gain(options.gain);
        granular.set_sample(sample);
        if granular.sample.is_some() {
            granular.set_duration(options.duration_ms);
            granular.set_duration_width(options.duration_width_ms);
            granular.set_position_width(options.position_width_ms);
        } else {
            // nothing to clamp against yet: keep the values until a sample gets set
            granular.duration_ms = options.duration_ms;
            granular.duration_width_ms = options.duration_width_ms;
            granular.position_width_ms = options.position_width_ms;
        }
        Ok((granular, voices))
    }

    /// The sample grains get spawned from, if any.
    pub fn sample(&self) -> Option<&Arc<Sample>> {
        self.sample.as_ref()
    }

    /// Replace the sample grains get spawned from. Already playing grains continue playing
    /// their old sample.
    pub fn set_sample(&mut self, sample: Option<Arc<Sample>>) {
        self.true_sample_length_ms = sample
            .as_ref()
            .map_or(0, |sample| sample.duration_millis(self.sample_rate));
        if let Some(sample) = &sample {
            if sample.format().is_none() {
                log::warn!(
                    "Sample has an unsupported format 0x{:02x}: grains will be halted",
                    sample.format_code()
                );
            }
            log::debug!(
                "Granular sample: format 0x{:02x}, {} samples, {}ms",
                sample.format_code(),
                sample.sample_count(),
                self.true_sample_length_ms
            );
        }
        self.sample = sample;
        self.trim_sample();
    }

    /// Our voice handles.
    pub fn voices(&self) -> &[VoiceHandle; N] {
        &self.voices
    }

    /// Number of voices which currently play a grain.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|voice| voice.is_playing()).count()
    }

    /// Full length of the sample in milliseconds, or 0 without a sample.
    pub fn true_sample_length_ms(&self) -> u32 {
        self.true_sample_length_ms
    }

    /// Sample length minus the max grain length in milliseconds.
    pub fn usable_sample_length_ms(&self) -> u32 {
        self.usable_sample_length_ms
    }

    /// Output gain of all voices.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Set the output gain of all voices. Clamped to range 0.0..=1.0.
    pub fn set_gain(&mut self, gain: f32) {
        let gain = if gain.is_nan() {
            0.0
        } else {
            gain.clamp(0.0, 1.0)
        };
        if gain > 1.0 / N as f32 {
            log::warn!(
                "Granular gain {} exceeds 1/{}: mixing all voices at full level may clip",
                gain,
                N
            );
        }
        self.gain = gain;
        for voice in &self.voices {
            voice.set_gain(gain);
        }
    }

    /// Base grain length in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    /// Set the base grain length. Clamped to the usable sample length.
    pub fn set_duration(&mut self, duration_ms: u32) {
        self.duration_ms = duration_ms.min(self.usable_sample_length_ms);
        self.trim_sample();
    }

    /// Random variation of the grain length in milliseconds.
    pub fn duration_width_ms(&self) -> u32 {
        self.duration_width_ms
    }

    /// Set the random grain length variation. Clamped to the usable sample length.
    pub fn set_duration_width(&mut self, duration_width_ms: u32) {
        self.duration_width_ms = duration_width_ms.min(self.usable_sample_length_ms);
        self.trim_sample();
    }

    /// Nominal playhead position in milliseconds.
    pub fn position_ms(&self) -> u32 {
        self.position_ms
    }

    /// Set the nominal playhead position, relative to the usable sample length.
    pub fn set_position<P: Into<PlayheadPosition>>(&mut self, position: P) {
        self.position_ms = position.into().to_millis(self.usable_sample_length_ms);
    }

    /// Random variation of the grain position in milliseconds.
    pub fn position_width_ms(&self) -> u32 {
        self.position_width_ms
    }

    /// Set the random grain position variation. Clamped to the usable sample length.
    pub fn set_position_width(&mut self, position_width_ms: u32) {
        self.position_width_ms = position_width_ms.min(self.usable_sample_length_ms);
    }

    /// Minimum interval between two grain triggers in milliseconds.
    pub fn grain_density_ms(&self) -> u32 {
        self.grain_density_ms
    }

    /// Set the minimum interval between two grain triggers.
    pub fn set_grain_density(&mut self, grain_density_ms: u32) {
        self.grain_density_ms = grain_density_ms;
    }

    /// Returns true while the player spawns new grains.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Start spawning new grains with the next tick.
    pub fn play(&mut self) {
        self.playing = true;
    }

    /// Stop spawning new grains. Already playing grains play until their end.
    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// Immediately stop all playing grains.
    pub fn stop_voices(&mut self) -> Result<(), Error> {
        for voice in self.voices.iter().filter(|voice| voice.is_playing()) {
            voice.stop()?;
        }
        Ok(())
    }

    /// Trigger a grain at the given position and length on the first idle voice.
    ///
    /// Returns the index of the voice that plays the grain, or None when all voices are busy.
    pub fn trigger(&self, position_ms: u32, duration_ms: u32) -> Result<Option<usize>, Error> {
        let sample = self.sample.as_ref().ok_or(Error::SampleNotSet)?;
        for voice in self.voices.iter().filter(|voice| !voice.is_playing()) {
            match voice.assign(sample, position_ms, duration_ms) {
                Ok(()) => {
                    log::trace!(
                        "Triggered grain at {position_ms}ms with {duration_ms}ms on voice #{}",
                        voice.index()
                    );
                    return Ok(Some(voice.index()));
                }
                // claimed by someone else in the meantime
                Err(Error::VoiceNotIdle(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        log::trace!("All voices busy: dropping grain at {position_ms}ms");
        Ok(None)
    }

    /// Advance the scheduler by the wall clock time that passed since the last tick.
    pub fn tick(&mut self) -> Result<TickStatus, Error> {
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .map_or(Duration::ZERO, |last_tick| now.duration_since(last_tick));
        self.last_tick = Some(now);
        self.tick_elapsed(elapsed)
    }

    /// Advance the scheduler by the given time and trigger a new randomized grain, when
    /// playing and more than the grain density interval passed since the last grain.
    pub fn tick_elapsed(&mut self, elapsed: Duration) -> Result<TickStatus, Error> {
        self.elapsed = self.elapsed.saturating_add(elapsed);
        let density = Duration::from_millis(self.grain_density_ms as u64);
        if !self.playing || self.elapsed <= density {
            return Ok(TickStatus::Waiting);
        }
        self.elapsed = Duration::ZERO;

        let grain = GrainRequest::randomize(&self.spread(), &mut self.rng);
        match self.trigger(grain.position_ms, grain.duration_ms) {
            Ok(Some(voice)) => Ok(TickStatus::Triggered { voice, grain }),
            Ok(None) => Ok(TickStatus::Dropped { grain }),
            Err(Error::EmptySegment) => {
                log::trace!("Empty grain segment at {}ms: dropping grain", grain.position_ms);
                Ok(TickStatus::Dropped { grain })
            }
            Err(err) => Err(err),
        }
    }

    fn spread(&self) -> GrainSpread {
        GrainSpread {
            duration_ms: self.duration_ms,
            duration_width_ms: self.duration_width_ms,
            position_ms: self.position_ms,
            position_width_ms: self.position_width_ms,
            usable_length_ms: self.usable_sample_length_ms,
        }
    }

    fn trim_sample(&mut self) {
        self.usable_sample_length_ms = self
            .true_sample_length_ms
            .saturating_sub(self.duration_ms.saturating_add(self.duration_width_ms));
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{producer::FrameProducer, sample::SampleFormat, voice::GrainOutcome};

    // 10300ms at 44100Hz
    const SAMPLE_COUNT: u32 = 454230;

    fn silent_sample() -> Arc<Sample> {
        Arc::new(Sample::with_payload(
            SampleFormat::Pcm16.code(),
            SAMPLE_COUNT,
            vec![0; SAMPLE_COUNT as usize / 2],
        ))
    }

    fn options() -> GranularOptions {
        GranularOptions::default().seed(0x5EED)
    }

    fn advance<const N: usize>(granular: &mut Granular<N>, millis: u64) -> TickStatus {
        granular
            .tick_elapsed(Duration::from_millis(millis))
            .unwrap()
    }

    #[test]
    fn usable_length() {
        let (mut granular, _voices) = Granular::<4>::new(Some(silent_sample()), options()).unwrap();
        assert_eq!(granular.true_sample_length_ms(), 10300);
        assert_eq!(granular.usable_sample_length_ms(), 10000);

        granular.set_duration(400);
        assert_eq!(granular.usable_sample_length_ms(), 10300 - 450);
        granular.set_duration_width(100);
        assert_eq!(granular.usable_sample_length_ms(), 10300 - 500);

        // clamped to the usable length
        granular.set_duration(100_000);
        assert_eq!(granular.duration_ms(), 9800);
        assert_eq!(granular.usable_sample_length_ms(), 10300 - 9900);
        granular.set_position_width(100_000);
        assert_eq!(granular.position_width_ms(), 400);
    }

    #[test]
    fn options_are_clamped_like_setters() {
        // 1000ms sample
        let sample = Arc::new(Sample::with_payload(
            SampleFormat::Pcm16.code(),
            44100,
            vec![0; 22050],
        ));
        let (granular, _voices) = Granular::<1>::new(Some(sample), options()).unwrap();
        assert_eq!(granular.duration_ms(), 250);
        assert_eq!(granular.duration_width_ms(), 50);
        assert_eq!(granular.usable_sample_length_ms(), 700);
        assert_eq!(granular.position_width_ms(), 700);

        // 200ms sample: duration exceeds the sample
        let sample = Arc::new(Sample::with_payload(
            SampleFormat::Pcm16.code(),
            8820,
            vec![0; 4410],
        ));
        let (granular, _voices) = Granular::<1>::new(Some(sample), options()).unwrap();
        assert_eq!(granular.duration_ms(), 200);
        assert_eq!(granular.duration_width_ms(), 0);
        assert_eq!(granular.usable_sample_length_ms(), 0);
        assert_eq!(granular.position_width_ms(), 0);
    }

    #[test]
    fn usable_length_is_independent_of_setter_order() {
        let (mut a, _voices) = Granular::<1>::new(Some(silent_sample()), options()).unwrap();
        a.set_duration(300);
        a.set_duration_width(20);

        let (mut b, _voices) = Granular::<1>::new(Some(silent_sample()), options()).unwrap();
        b.set_duration_width(20);
        b.set_duration(300);

        assert_eq!(a.usable_sample_length_ms(), b.usable_sample_length_ms());
        assert_eq!(a.usable_sample_length_ms(), 10300 - 320);
    }

    #[test]
    fn sample_changes_retrim() {
        let (mut granular, _voices) = Granular::<1>::new(None, options()).unwrap();
        assert_eq!(granular.true_sample_length_ms(), 0);
        assert_eq!(granular.usable_sample_length_ms(), 0);
        assert_eq!(granular.duration_ms(), 250);
        assert_eq!(granular.duration_width_ms(), 50);

        granular.set_sample(Some(silent_sample()));
        assert_eq!(granular.usable_sample_length_ms(), 10000);

        // 100ms sample: shorter than the max grain length
        granular.set_sample(Some(Arc::new(Sample::with_payload(
            SampleFormat::Pcm16.code(),
            4410,
            vec![0; 2205],
        ))));
        assert_eq!(granular.true_sample_length_ms(), 100);
        assert_eq!(granular.usable_sample_length_ms(), 0);
    }

    #[test]
    fn positions() {
        let (mut granular, _voices) = Granular::<1>::new(Some(silent_sample()), options()).unwrap();
        granular.set_position(0.5);
        assert_eq!(granular.position_ms(), 5000);
        granular.set_position(u16::MAX);
        assert_eq!(granular.position_ms(), 10000);
        granular.set_position(0u32);
        assert_eq!(granular.position_ms(), 0);
    }

    #[test]
    fn gain_is_clamped_and_shared() {
        let (mut granular, voices) = Granular::<4>::new(Some(silent_sample()), options()).unwrap();
        assert_eq!(voices[2].gain(), 0.25);
        granular.set_gain(2.0);
        assert_eq!(granular.gain(), 1.0);
        assert!(voices.iter().all(|voice| voice.gain() == 1.0));
        granular.set_gain(-1.0);
        assert_eq!(granular.gain(), 0.0);
    }

    #[test]
    fn triggers_need_a_sample() {
        let (mut granular, _voices) = Granular::<2>::new(None, options()).unwrap();
        assert!(matches!(granular.trigger(0, 100), Err(Error::SampleNotSet)));

        granular.play();
        assert_eq!(advance(&mut granular, 10), TickStatus::Waiting);
        assert!(matches!(
            granular.tick_elapsed(Duration::from_millis(100)),
            Err(Error::SampleNotSet)
        ));
    }

    #[test]
    fn density_gates_triggers() {
        let (mut granular, _voices) = Granular::<8>::new(Some(silent_sample()), options()).unwrap();
        granular.set_position(0.5);

        // not playing: nothing gets triggered
        assert_eq!(advance(&mut granular, 100), TickStatus::Waiting);
        assert_eq!(granular.active_voices(), 0);

        granular.play();
        assert!(matches!(
            advance(&mut granular, 0),
            TickStatus::Triggered { voice: 0, .. }
        ));
        assert_eq!(advance(&mut granular, 10), TickStatus::Waiting);
        assert_eq!(advance(&mut granular, 10), TickStatus::Waiting);
        // exactly the density interval is not enough
        assert_eq!(advance(&mut granular, 15), TickStatus::Waiting);
        let status = advance(&mut granular, 1);
        let TickStatus::Triggered { voice, grain } = status else {
            panic!("Expected a triggered grain, got {status:?}");
        };
        assert_eq!(voice, 1);
        assert!((200..300).contains(&grain.duration_ms));
        assert!((4000..6000).contains(&grain.position_ms));
        assert_eq!(granular.active_voices(), 2);

        granular.stop();
        assert_eq!(advance(&mut granular, 1000), TickStatus::Waiting);
        // stopping the player does not stop the voices
        assert_eq!(granular.active_voices(), 2);
    }

    #[test]
    fn full_voice_pool_drops_grains() {
        let (mut granular, _voices) = Granular::<2>::new(Some(silent_sample()), options()).unwrap();
        assert_eq!(granular.trigger(1000, 100).unwrap(), Some(0));
        assert_eq!(granular.trigger(2000, 100).unwrap(), Some(1));
        let snapshots = granular.voices().each_ref().map(VoiceHandle::snapshot);

        assert_eq!(granular.trigger(3000, 100).unwrap(), None);
        granular.play();
        assert!(matches!(
            advance(&mut granular, 100),
            TickStatus::Dropped { .. }
        ));

        assert_eq!(granular.active_voices(), 2);
        assert_eq!(
            granular.voices().each_ref().map(VoiceHandle::snapshot),
            snapshots
        );
    }

    #[test]
    fn lowest_idle_voice_wins() {
        let (mut granular, mut voices) =
            Granular::<3>::new(Some(silent_sample()), options()).unwrap();
        assert_eq!(granular.trigger(0, 10).unwrap(), Some(0));
        assert_eq!(granular.trigger(0, 1000).unwrap(), Some(1));
        assert_eq!(granular.trigger(0, 1000).unwrap(), Some(2));

        // a 10ms grain lasts 4 frames
        for _ in 0..4 {
            for voice in &mut voices {
                voice.produce_frame();
            }
        }
        assert!(!voices[0].is_playing());
        assert_eq!(
            granular.voices()[0].last_outcome(),
            Some(GrainOutcome::Completed)
        );
        assert_eq!(granular.active_voices(), 2);
        assert_eq!(granular.trigger(0, 1000).unwrap(), Some(0));
    }

    #[test]
    fn grains_stay_within_usable_range() {
        let (mut granular, mut voices) =
            Granular::<4>::new(Some(silent_sample()), options()).unwrap();
        granular.set_duration(300);
        granular.set_duration_width(0);
        granular.set_position_width(1000);
        granular.set_position(0.99);
        assert!(granular.position_ms() >= 9899);
        let usable = granular.usable_sample_length_ms();

        granular.play();
        for _ in 0..1000 {
            match advance(&mut granular, 36) {
                TickStatus::Triggered { grain, .. } | TickStatus::Dropped { grain } => {
                    assert!(grain.position_ms + grain.duration_ms <= usable - 3, "{grain:?}");
                }
                TickStatus::Waiting => panic!("Expected a grain on each tick"),
            }
            for voice in &mut voices {
                voice.produce_frame();
            }
        }
    }

    #[test]
    fn stop_voices() {
        let (mut granular, mut voices) =
            Granular::<2>::new(Some(silent_sample()), options()).unwrap();
        granular.trigger(0, 1000).unwrap();
        granular.trigger(0, 1000).unwrap();
        granular.stop_voices().unwrap();
        for voice in &mut voices {
            assert!(voice.produce_frame().is_none());
        }
        assert_eq!(granular.active_voices(), 0);
        assert_eq!(
            granular.voices()[1].last_outcome(),
            Some(GrainOutcome::Stopped)
        );
    }

    #[test]
    fn unsupported_samples_fault_voices() {
        let sample = Arc::new(Sample::with_payload(0x42, 44100, vec![0; 22050]));
        let (mut granular, mut voices) = Granular::<1>::new(Some(sample), options()).unwrap();
        assert_eq!(granular.trigger(0, 100).unwrap(), Some(0));
        assert!(voices[0].produce_frame().is_none());
        assert_eq!(
            granular.voices()[0].last_outcome(),
            Some(GrainOutcome::Faulted)
        );
        assert_eq!(granular.active_voices(), 0);
    }

    #[test]
    fn wall_clock_ticks() {
        let (mut granular, _voices) = Granular::<1>::new(Some(silent_sample()), options()).unwrap();
        granular.set_grain_density(1);
        granular.play();
        // first tick only initializes the clock
        assert_eq!(granular.tick().unwrap(), TickStatus::Waiting);
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            granular.tick().unwrap(),
            TickStatus::Triggered { voice: 0, .. }
        ));
    }

    #[test]
    fn invalid_options() {
        assert!(Granular::<0>::new(None, options()).is_err());
        assert!(Granular::<1>::new(None, options().sample_rate(0)).is_err());
        // out of range gains get clamped
        let (granular, _voices) = Granular::<1>::new(None, options().gain(2.0)).unwrap();
        assert_eq!(granular.gain(), 1.0);
    }
}
