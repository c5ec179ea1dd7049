//! Grain voices: decode and envelope a single grain at a time.
//!
//! A voice is split into two parts: the [`GrainVoice`], which lives in the audio thread and
//! produces frames, and any number of [`VoiceHandle`]s, which live in the control thread and
//! assign grains, stop playback or query the voice's playback state.
//!
//! The voice's Idle/Playing state is the single source of truth for the voice's ownership: only
//! handles switch an idle voice to playing, and only the producing voice switches a playing
//! voice back to idle. Grains are handed over via a lock-free command queue, and the playback
//! state gets published as a single atomic snapshot, so neither side ever blocks the other.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering},
    Arc,
};

use crossbeam_queue::ArrayQueue;

use crate::{
    decoder::decode_word,
    producer::{AudioFrame, FrameProducer, FRAME_SIZE},
    sample::{Sample, SampleFormat},
    utils::{fader::FadeEnvelope, time::MillisConverter},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Playback state of a voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum VoiceState {
    /// Voice is free and can be assigned to a new grain.
    Idle = 0,
    /// Voice got assigned to a grain and plays it.
    Playing = 1,
}

// -------------------------------------------------------------------------------------------------

/// How a voice's last grain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum GrainOutcome {
    /// The grain played until the end of its segment.
    Completed = 1,
    /// The grain's sample has an unsupported format and was halted without producing audio.
    Faulted = 2,
    /// The grain was stopped via [`VoiceHandle::stop`].
    Stopped = 3,
}

// -------------------------------------------------------------------------------------------------

/// Atomically published playback state of a voice.
///
/// The format code is captured together with the cursor and the sample's length, so all of
/// them always refer to the same grain when converting positions into milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    /// Format code of the playing sample, or 0 when the voice is idle.
    pub format_code: u8,
    /// Native samples played since the start of the grain.
    pub elapsed: u32,
    /// Length of the grain's sample in native samples, as stated in its header.
    pub sample_length: u32,
}

impl PlaybackSnapshot {
    const FIELD_MASK: u64 = Sample::MAX_SAMPLE_COUNT as u64;

    fn pack(self) -> u64 {
        (self.format_code as u64) << 48
            | (self.elapsed as u64 & Self::FIELD_MASK) << 24
            | (self.sample_length as u64 & Self::FIELD_MASK)
    }

    fn unpack(value: u64) -> Self {
        Self {
            format_code: (value >> 48) as u8,
            elapsed: ((value >> 24) & Self::FIELD_MASK) as u32,
            sample_length: (value & Self::FIELD_MASK) as u32,
        }
    }

    fn to_millis(self, samples: u32, sample_rate: u32) -> u32 {
        match SampleFormat::from_code(self.format_code) {
            Some(format) => MillisConverter::new(format.native_rate(sample_rate).max(1))
                .samples_to_millis(samples),
            None => 0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A grain segment, resolved to native samples, handed over to the producing voice.
struct GrainSegment {
    sample: Arc<Sample>,
    start: u32,
    length: u32,
}

/// Messages from voice handles to the producing voice.
enum VoiceCommand {
    Start(GrainSegment),
    Stop,
}

// -------------------------------------------------------------------------------------------------

/// State shared between a [`GrainVoice`] and its [`VoiceHandle`]s.
struct VoiceShared {
    index: usize,
    sample_rate: u32,
    state: AtomicU8,
    busy: AtomicBool,
    outcome: AtomicU8,
    snapshot: AtomicU64,
    gain: AtomicU32,
    commands: ArrayQueue<VoiceCommand>,
}

impl VoiceShared {
    const COMMAND_QUEUE_SIZE: usize = 8;

    fn new(index: usize, sample_rate: u32) -> Self {
        Self {
            index,
            sample_rate,
            state: AtomicU8::new(VoiceState::Idle as u8),
            busy: AtomicBool::new(false),
            outcome: AtomicU8::new(0),
            snapshot: AtomicU64::new(0),
            gain: AtomicU32::new(1.0f32.to_bits()),
            commands: ArrayQueue::new(Self::COMMAND_QUEUE_SIZE),
        }
    }

    fn state(&self) -> VoiceState {
        VoiceState::from_repr(self.state.load(Ordering::Acquire)).unwrap_or(VoiceState::Idle)
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot::unpack(self.snapshot.load(Ordering::Acquire))
    }

    fn publish(&self, snapshot: PlaybackSnapshot) {
        self.snapshot.store(snapshot.pack(), Ordering::Release);
    }

    fn position_millis(&self) -> u32 {
        let snapshot = self.snapshot();
        snapshot.to_millis(snapshot.elapsed, self.sample_rate)
    }

    fn length_millis(&self) -> u32 {
        let snapshot = self.snapshot();
        snapshot.to_millis(snapshot.sample_length, self.sample_rate)
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }
}

// -------------------------------------------------------------------------------------------------

/// Control side of a grain voice. Cheap to clone.
#[derive(Clone)]
pub struct VoiceHandle {
    shared: Arc<VoiceShared>,
}

impl VoiceHandle {
    /// The voice's index in its voice pool.
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Current playback state.
    pub fn state(&self) -> VoiceState {
        self.shared.state()
    }

    /// Returns true when the voice got assigned to a grain which has not yet finished.
    pub fn is_playing(&self) -> bool {
        self.state() == VoiceState::Playing
    }

    /// Returns true from the moment a grain got assigned until the voice ended it.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// How the last grain ended, if any grain ended yet.
    pub fn last_outcome(&self) -> Option<GrainOutcome> {
        GrainOutcome::from_repr(self.shared.outcome.load(Ordering::Acquire))
    }

    /// Atomic snapshot of the voice's current playback state.
    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.shared.snapshot()
    }

    /// Elapsed playback time of the current grain in milliseconds. 0 when idle.
    pub fn position_millis(&self) -> u32 {
        self.shared.position_millis()
    }

    /// Full length of the current grain's sample in milliseconds. 0 when idle.
    pub fn length_millis(&self) -> u32 {
        self.shared.length_millis()
    }

    /// Output gain the host should apply when mixing the voice.
    pub fn gain(&self) -> f32 {
        self.shared.gain()
    }

    /// Set the output gain the host should apply when mixing the voice.
    pub fn set_gain(&self, gain: f32) {
        self.shared.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Assign a new grain to the voice.
    ///
    /// Start and length get converted into native samples of the sample's format and are
    /// clamped to the sample's length. The start is aligned to a whole payload word.
    ///
    /// Fails with [`Error::EmptySegment`] when the clamped segment is empty and with
    /// [`Error::VoiceNotIdle`] when the voice currently plays another grain.
    pub fn assign(&self, sample: &Arc<Sample>, start_ms: u32, length_ms: u32) -> Result<(), Error> {
        let format = sample.format();
        let rate_ratio = format.map_or(1, SampleFormat::rate_ratio);
        let samples_per_word = format.map_or(1, SampleFormat::samples_per_word) as u32;
        let converter = MillisConverter::new((self.shared.sample_rate / rate_ratio).max(1));

        let file_length = sample.sample_count();
        let mut segment_start = converter.millis_to_samples(start_ms).min(file_length);
        segment_start -= segment_start % samples_per_word;
        let segment_length = converter
            .millis_to_samples(length_ms)
            .min(file_length - segment_start);
        if segment_length == 0 {
            return Err(Error::EmptySegment);
        }

        // claim the voice
        self.shared
            .state
            .compare_exchange(
                VoiceState::Idle as u8,
                VoiceState::Playing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::VoiceNotIdle(self.index()))?;
        self.shared.busy.store(true, Ordering::Release);
        self.shared.outcome.store(0, Ordering::Release);
        self.shared.publish(PlaybackSnapshot {
            format_code: sample.format_code(),
            elapsed: 0,
            sample_length: file_length,
        });

        let segment = GrainSegment {
            sample: Arc::clone(sample),
            start: segment_start,
            length: segment_length,
        };
        if self.shared.commands.push(VoiceCommand::Start(segment)).is_err() {
            // release the claim again: the voice never saw the grain
            self.shared.publish(PlaybackSnapshot::default());
            self.shared.busy.store(false, Ordering::Release);
            self.shared
                .state
                .store(VoiceState::Idle as u8, Ordering::Release);
            return Err(Error::SendError("voice command queue is full".to_string()));
        }
        Ok(())
    }

    /// Immediately stop the voice's current grain, if any.
    pub fn stop(&self) -> Result<(), Error> {
        self.shared
            .commands
            .push(VoiceCommand::Stop)
            .map_err(|_| Error::SendError("voice command queue is full".to_string()))
    }
}

// -------------------------------------------------------------------------------------------------

/// Playback state of the grain a voice is currently playing.
struct ActiveGrain {
    sample: Arc<Sample>,
    format_code: u8,
    /// Native sample index of the next payload word to decode.
    cursor: u32,
    segment_start: u32,
    segment_length: u32,
    /// Output samples left in the segment.
    remaining: u32,
    /// Last decoded native sample of the previous word.
    prior: i16,
    envelope: FadeEnvelope,
}

impl ActiveGrain {
    fn new(segment: GrainSegment) -> Self {
        let rate_ratio = segment.sample.format().map_or(1, SampleFormat::rate_ratio);
        let remaining = segment.length.saturating_mul(rate_ratio);
        Self {
            format_code: segment.sample.format_code(),
            sample: segment.sample,
            cursor: segment.start,
            segment_start: segment.start,
            segment_length: segment.length,
            remaining,
            prior: 0,
            envelope: FadeEnvelope::new(remaining),
        }
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            format_code: self.format_code,
            elapsed: (self.cursor - self.segment_start).min(self.segment_length),
            sample_length: self.sample.sample_count(),
        }
    }

    /// Decode and fade the next frame. Returns true when the segment got exhausted.
    fn decode_frame(&mut self, format: SampleFormat, frame: &mut AudioFrame) -> bool {
        let samples_per_word = format.samples_per_word();
        for output in frame.chunks_exact_mut(format.outputs_per_word()) {
            let word = self.sample.word(self.cursor as usize / samples_per_word);
            decode_word(format, word, &mut self.prior, output);
            for sample in output.iter_mut() {
                *sample = self.envelope.process(*sample);
            }
            self.cursor += samples_per_word as u32;
        }
        if self.remaining > FRAME_SIZE as u32 {
            self.remaining -= FRAME_SIZE as u32;
            false
        } else {
            self.remaining = 0;
            true
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Producing side of a grain voice, which decodes and envelopes one grain at a time.
///
/// Voices get driven by the host's block scheduler via [`FrameProducer::produce_frame`], and
/// are controlled via their [`VoiceHandle`]s.
pub struct GrainVoice {
    shared: Arc<VoiceShared>,
    grain: Option<ActiveGrain>,
}

impl GrainVoice {
    /// Create a new idle voice with the given pool index and output sample rate.
    pub fn new(index: usize, sample_rate: u32) -> Self {
        assert!(sample_rate > 0, "Invalid sample rate");
        Self {
            shared: Arc::new(VoiceShared::new(index, sample_rate)),
            grain: None,
        }
    }

    /// Create a new control handle for this voice.
    pub fn handle(&self) -> VoiceHandle {
        VoiceHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The voice's index in its voice pool.
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Returns true from the moment a grain got assigned until the voice ended it.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Output gain the host should apply when mixing the voice's frames.
    pub fn gain(&self) -> f32 {
        self.shared.gain()
    }

    /// Elapsed playback time of the current grain in milliseconds. 0 when idle.
    pub fn position_millis(&self) -> u32 {
        self.shared.position_millis()
    }

    /// Full length of the current grain's sample in milliseconds. 0 when idle.
    pub fn length_millis(&self) -> u32 {
        self.shared.length_millis()
    }

    fn process_commands(&mut self) {
        while let Some(command) = self.shared.commands.pop() {
            match command {
                VoiceCommand::Start(segment) => {
                    let grain = ActiveGrain::new(segment);
                    self.shared.publish(grain.snapshot());
                    self.grain = Some(grain);
                }
                VoiceCommand::Stop => {
                    if self.grain.is_some() {
                        self.release(GrainOutcome::Stopped);
                    }
                }
            }
        }
    }

    fn release(&mut self, outcome: GrainOutcome) {
        self.grain = None;
        self.shared.publish(PlaybackSnapshot::default());
        self.shared.busy.store(false, Ordering::Release);
        self.shared.outcome.store(outcome as u8, Ordering::Release);
        self.shared
            .state
            .store(VoiceState::Idle as u8, Ordering::Release);
    }
}

impl FrameProducer for GrainVoice {
    fn produce_frame(&mut self) -> Option<AudioFrame> {
        self.process_commands();

        let format_code = self.grain.as_ref()?.format_code;
        let Some(format) = SampleFormat::from_code(format_code) else {
            log::warn!(
                "Voice #{}: unsupported sample format 0x{:02x}, halting grain",
                self.shared.index,
                format_code
            );
            self.release(GrainOutcome::Faulted);
            return None;
        };

        let mut frame = [0; FRAME_SIZE];
        let grain = self.grain.as_mut()?;
        if grain.decode_frame(format, &mut frame) {
            self.release(GrainOutcome::Completed);
        } else {
            self.shared.publish(grain.snapshot());
        }
        Some(frame)
    }

    fn is_playing(&self) -> bool {
        self.shared.state() == VoiceState::Playing
    }
}

// -------------------------------------------------------------------------------------------------
