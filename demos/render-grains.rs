//! Renders a granular texture of a sample into a wav file.
//!
//! Usage:
//!   cargo run --example render-grains -- [OPTIONS]
//!
//! Options:
//!   -o, --output <PATH>      Wav file to write (default: grains.wav)
//!   -i, --input <PATH>       16 bit mono wav file at 44100, 22050 or 11025 Hz to use as
//!                            sample. By default a synthetic chord gets used.
//!   --duration <N>           Duration in seconds (default: 10)
//!   --seed <N>               Random seed for deterministic behavior
//!   -l, --log-level <LEVEL>  Set logging level (debug, info, warn, error)

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use arg::{parse_args, Args};
use grainbox::{
    FrameProducer, GrainVoice, Granular, GranularOptions, Sample, SampleFormat, TickStatus,
    FRAME_SIZE,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const SAMPLE_RATE: u32 = 44100;
const VOICE_COUNT: usize = 4;

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

// -------------------------------------------------------------------------------------------------

/// Arguments for the render grains demo.
#[derive(Args, Debug)]
struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Wav file to write (default: grains.wav)
    output_path: Option<PathBuf>,
    #[arg(short = "i", long = "input")]
    /// Mono 16 bit wav file to use as sample (default: synthetic chord)
    input_path: Option<PathBuf>,
    #[arg(long = "duration")]
    /// Duration in seconds (default: 10)
    duration: Option<u64>,
    #[arg(long = "seed")]
    /// Random seed for deterministic behavior
    seed: Option<u64>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level
    log_level: Option<log::Level>,
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args = parse_args::<Arguments>();

    // Init logger
    simple_logger::SimpleLogger::new()
        .with_level(args.log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .init()?;

    // Load or create the sample
    let sample = match &args.input_path {
        Some(path) => load_sample(path)?,
        None => synth_sample()?,
    };
    log::info!(
        "Using a {} sample with {} samples",
        sample
            .format()
            .map_or("unknown".to_string(), |format| format.to_string()),
        sample.sample_count()
    );

    // Create the granular player
    let mut options = GranularOptions::default()
        .sample_rate(SAMPLE_RATE)
        .gain(1.0 / VOICE_COUNT as f32)
        .duration(180)
        .duration_width(60)
        .position_width(400)
        .grain_density(30);
    if let Some(seed) = args.seed {
        options = options.seed(seed);
    }
    let (mut granular, mut voices) =
        Granular::<VOICE_COUNT>::new(Some(Arc::new(sample)), options)?;
    granular.play();

    // Render
    let output_path = args
        .output_path
        .unwrap_or_else(|| PathBuf::from("grains.wav"));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&output_path, spec)?;

    let duration = Duration::from_secs(args.duration.unwrap_or(10));
    let frame_duration = Duration::from_secs_f64(FRAME_SIZE as f64 / SAMPLE_RATE as f64);
    let frame_count = (duration.as_secs_f64() / frame_duration.as_secs_f64()).ceil() as usize;

    let mut triggered = 0;
    let mut dropped = 0;
    for frame_index in 0..frame_count {
        // slowly move the playhead through the sample
        granular.set_position(frame_index as f64 / frame_count as f64);
        match granular.tick_elapsed(frame_duration)? {
            TickStatus::Triggered { .. } => triggered += 1,
            TickStatus::Dropped { .. } => dropped += 1,
            TickStatus::Waiting => (),
        }
        let mut mix = [0i32; FRAME_SIZE];
        assert_no_alloc(|| mix_voices(&mut voices, &mut mix));
        for sample in mix {
            writer.write_sample(sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16)?;
        }
    }
    writer.finalize()?;

    log::info!(
        "Rendered {}s into '{}': {} grains triggered, {} dropped",
        duration.as_secs(),
        output_path.display(),
        triggered,
        dropped
    );
    Ok(())
}

// -------------------------------------------------------------------------------------------------

fn mix_voices(voices: &mut [GrainVoice], mix: &mut [i32; FRAME_SIZE]) {
    for voice in voices {
        if let Some(frame) = voice.produce_frame() {
            let gain = voice.gain();
            for (mixed, sample) in mix.iter_mut().zip(frame) {
                *mixed += (sample as f32 * gain) as i32;
            }
        }
    }
}

fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    #[cfg(feature = "assert-allocs")]
    return assert_no_alloc::assert_no_alloc::<T, F>(func);

    #[cfg(not(feature = "assert-allocs"))]
    return func();
}

// -------------------------------------------------------------------------------------------------

fn load_sample(path: &Path) -> Result<Sample, Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != 1 || spec.bits_per_sample != 16 {
        return Err(format!("'{}' is not a mono 16 bit wav file", path.display()).into());
    }
    let format = match spec.sample_rate {
        44100 => SampleFormat::Pcm16,
        22050 => SampleFormat::Pcm16HalfRate,
        11025 => SampleFormat::Pcm16QuarterRate,
        rate => return Err(format!("unsupported sample rate {rate}").into()),
    };
    let samples = reader
        .samples::<i16>()
        .take(Sample::MAX_SAMPLE_COUNT as usize)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Sample::from_pcm16(format, &samples)?)
}

fn synth_sample() -> Result<Sample, grainbox::Error> {
    // 4 seconds of a slowly detuning chord at half rate
    const NATIVE_RATE: f32 = SAMPLE_RATE as f32 / 2.0;
    let samples = (0..(NATIVE_RATE as usize * 4))
        .map(|index| {
            let time = index as f32 / NATIVE_RATE;
            let value = [220.0f32, 277.18, 329.63]
                .iter()
                .enumerate()
                .map(|(voice, frequency)| {
                    let detune = 1.0 + 0.002 * voice as f32 * time;
                    (std::f32::consts::TAU * frequency * detune * time).sin()
                })
                .sum::<f32>();
            (value / 3.0 * 12000.0) as i16
        })
        .collect::<Vec<_>>();
    Sample::from_pcm16(SampleFormat::Pcm16HalfRate, &samples)
}
