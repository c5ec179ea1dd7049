use std::{error, fmt, io};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by grainbox.
#[derive(Debug)]
pub enum Error {
    SampleNotSet,
    InvalidSampleHeader,
    UnsupportedSampleFormat(u8),
    EmptySegment,
    VoiceNotIdle(usize),
    ParameterError(String),
    SendError(String),
    IoError(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SampleNotSet => write!(f, "No sample is bound to the granular player"),
            Self::InvalidSampleHeader => write!(f, "Sample buffer has no valid header word"),
            Self::UnsupportedSampleFormat(code) => {
                write!(f, "Unsupported sample format code 0x{code:02x}")
            }
            Self::EmptySegment => write!(f, "Grain segment is empty"),
            Self::VoiceNotIdle(voice_index) => {
                write!(f, "Voice with index {voice_index} is not idle")
            }
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::SendError(str) => write!(f, "Failed to send voice command: {str}"),
            Self::IoError(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}
