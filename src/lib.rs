#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod error;
mod granular;
mod producer;
mod sample;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use sample::{Sample, SampleEncoding, SampleFormat};

pub use producer::{AudioFrame, FrameProducer, FRAME_SIZE};

pub use voice::{GrainOutcome, GrainVoice, PlaybackSnapshot, VoiceHandle, VoiceState};

pub use granular::{GrainRequest, Granular, GranularOptions, PlayheadPosition, TickStatus};

// public mods
pub mod decoder;
pub mod utils;
