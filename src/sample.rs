//! Encoded, immutable sample buffers which get played back by grain voices.

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{
    utils::{time::MillisConverter, ulaw::ULAW_SILENCE},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Encoding of the sample payload words.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum SampleEncoding {
    /// Four u-law encoded bytes per 32 bit word, least significant byte first.
    Ulaw,
    /// Two signed 16 bit linear PCM samples per 32 bit word, low half first.
    Pcm16,
}

// -------------------------------------------------------------------------------------------------

/// Sample format as stored in the high byte of a sample's header word.
///
/// A format defines the payload encoding and the sample's native rate, relative to the
/// output sample rate. Lower native rates get upsampled with linear interpolation.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::FromRepr,
)]
#[repr(u8)]
pub enum SampleFormat {
    /// u-law at the output rate (44100 Hz with the default setup).
    Ulaw = 0x01,
    /// 16 bit PCM at the output rate.
    Pcm16 = 0x81,
    /// u-law at half the output rate (22050 Hz with the default setup).
    UlawHalfRate = 0x02,
    /// 16 bit PCM at half the output rate.
    Pcm16HalfRate = 0x82,
    /// u-law at a quarter of the output rate (11025 Hz with the default setup).
    UlawQuarterRate = 0x03,
    /// 16 bit PCM at a quarter of the output rate.
    Pcm16QuarterRate = 0x83,
}

impl SampleFormat {
    /// Resolve a header format code. Returns `None` for unsupported codes.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_repr(code)
    }

    /// The raw header format code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Payload encoding.
    pub const fn encoding(self) -> SampleEncoding {
        if self as u8 & 0x80 != 0 {
            SampleEncoding::Pcm16
        } else {
            SampleEncoding::Ulaw
        }
    }

    /// Number of output samples produced for each native sample: 1, 2 or 4.
    pub const fn rate_ratio(self) -> u32 {
        match self {
            Self::Ulaw | Self::Pcm16 => 1,
            Self::UlawHalfRate | Self::Pcm16HalfRate => 2,
            Self::UlawQuarterRate | Self::Pcm16QuarterRate => 4,
        }
    }

    /// The native sample rate of the payload for the given output sample rate.
    pub const fn native_rate(self, output_sample_rate: u32) -> u32 {
        output_sample_rate / self.rate_ratio()
    }

    /// Number of native samples packed into a single payload word.
    pub const fn samples_per_word(self) -> usize {
        match self.encoding() {
            SampleEncoding::Ulaw => 4,
            SampleEncoding::Pcm16 => 2,
        }
    }

    /// Number of output samples decoded from a single payload word.
    pub const fn outputs_per_word(self) -> usize {
        self.samples_per_word() * self.rate_ratio() as usize
    }
}

// -------------------------------------------------------------------------------------------------

/// An immutable, encoded sample buffer.
///
/// The buffer layout is a 32 bit header word, followed by the payload words. The header's high
/// byte is the [`SampleFormat`] code, the low 24 bits are the sample count in native samples.
///
/// Samples are shared by all voices of a granular player, so they usually get wrapped into an
/// `Arc` once and then only are referenced by the player and its voices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    format_code: u8,
    sample_count: u32,
    payload: Box<[u32]>,
    readable_words: usize,
}

impl Sample {
    /// Max number of samples a sample header can describe.
    pub const MAX_SAMPLE_COUNT: u32 = 0x00FF_FFFF;

    /// Create a sample from raw words, including the leading header word.
    pub fn from_words(words: &[u32]) -> Result<Self, Error> {
        let (header, payload) = words.split_first().ok_or(Error::InvalidSampleHeader)?;
        Ok(Self::with_payload(
            (header >> 24) as u8,
            header & Self::MAX_SAMPLE_COUNT,
            payload.to_vec(),
        ))
    }

    /// Create a sample from little-endian encoded bytes, including the leading header word.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_reader(bytes)
    }

    /// Read a sample from little-endian encoded words, including the leading header word.
    /// Reads until the reader is exhausted. Trailing bytes which do not form a whole word
    /// are ignored.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, Error> {
        let mut words = Vec::new();
        loop {
            match reader.read_u32::<LittleEndian>() {
                Ok(word) => words.push(word),
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
        }
        Self::from_words(&words)
    }

    /// Create a sample from an already split header and payload.
    ///
    /// The format code is not validated here: samples with unsupported formats can be
    /// created, but voices will refuse to play them back.
    pub fn with_payload(format_code: u8, sample_count: u32, payload: Vec<u32>) -> Self {
        let sample_count = sample_count & Self::MAX_SAMPLE_COUNT;
        let readable_words = match SampleFormat::from_code(format_code) {
            Some(format) => {
                let required_words = (sample_count as usize).div_ceil(format.samples_per_word());
                if payload.len() < required_words {
                    log::warn!(
                        "Sample payload is truncated: expected {} words, got {}",
                        required_words,
                        payload.len()
                    );
                }
                required_words.min(payload.len())
            }
            None => payload.len(),
        };
        Self {
            format_code,
            sample_count,
            payload: payload.into_boxed_slice(),
            readable_words,
        }
    }

    /// Pack the given 16 bit linear samples into a new PCM sample.
    pub fn from_pcm16(format: SampleFormat, samples: &[i16]) -> Result<Self, Error> {
        if format.encoding() != SampleEncoding::Pcm16 {
            return Err(Error::UnsupportedSampleFormat(format.code()));
        }
        let sample_count = Self::checked_sample_count(samples.len())?;
        let payload = samples
            .chunks(2)
            .map(|pair| {
                let low = pair[0] as u16 as u32;
                let high = pair.get(1).map_or(0, |s| *s as u16 as u32);
                low | (high << 16)
            })
            .collect();
        Ok(Self::with_payload(format.code(), sample_count, payload))
    }

    /// Pack the given u-law encoded bytes into a new u-law sample.
    pub fn from_ulaw(format: SampleFormat, bytes: &[u8]) -> Result<Self, Error> {
        if format.encoding() != SampleEncoding::Ulaw {
            return Err(Error::UnsupportedSampleFormat(format.code()));
        }
        let sample_count = Self::checked_sample_count(bytes.len())?;
        let payload = bytes
            .chunks(4)
            .map(|quad| {
                let mut word = [ULAW_SILENCE; 4];
                word[..quad.len()].copy_from_slice(quad);
                u32::from_le_bytes(word)
            })
            .collect();
        Ok(Self::with_payload(format.code(), sample_count, payload))
    }

    /// The sample's header word.
    pub fn header(&self) -> u32 {
        (self.format_code as u32) << 24 | self.sample_count
    }

    /// The raw header format code.
    pub fn format_code(&self) -> u8 {
        self.format_code
    }

    /// The sample's format, or `None` when the format code is not supported.
    pub fn format(&self) -> Option<SampleFormat> {
        SampleFormat::from_code(self.format_code)
    }

    /// Length of the sample in native samples.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Raw payload words.
    pub fn payload(&self) -> &[u32] {
        &self.payload
    }

    /// Payload word at the given index. Words past the sample's length read as silence.
    #[inline]
    pub fn word(&self, index: usize) -> u32 {
        if index < self.readable_words {
            self.payload[index]
        } else {
            self.silent_word()
        }
    }

    /// Duration of the sample in milliseconds when played back at the given output rate.
    pub fn duration_millis(&self, output_sample_rate: u32) -> u32 {
        let native_rate = self
            .format()
            .map_or(output_sample_rate, |format| format.native_rate(output_sample_rate));
        MillisConverter::new(native_rate.max(1)).samples_to_millis(self.sample_count)
    }

    fn silent_word(&self) -> u32 {
        match self.format().map(SampleFormat::encoding) {
            Some(SampleEncoding::Ulaw) => u32::from_le_bytes([ULAW_SILENCE; 4]),
            _ => 0,
        }
    }

    fn checked_sample_count(len: usize) -> Result<u32, Error> {
        if len > Self::MAX_SAMPLE_COUNT as usize {
            return Err(Error::ParameterError(format!(
                "sample length {len} exceeds the max header sample count"
            )));
        }
        Ok(len as u32)
    }
}

// -------------------------------------------------------------------------------------------------
