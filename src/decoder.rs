//! Stateless decoding of encoded sample payload words into 16 bit linear output samples.
//!
//! Each payload word decodes into a fixed number of output samples, depending on the sample
//! format (see [`SampleFormat::outputs_per_word`]). Formats with a native rate below the output
//! rate get upsampled with linear interpolation. The interpolation needs the last native sample
//! of the previously decoded word, the `prior` sample, which callers must carry along between
//! calls to get seamless output across word and frame boundaries.

use assume::assume;

use crate::{
    sample::{SampleEncoding, SampleFormat},
    utils::ulaw::ULAW_DECODE_TABLE,
};

// -------------------------------------------------------------------------------------------------

/// Max number of output samples a single payload word can decode into.
pub const MAX_OUTPUTS_PER_WORD: usize = 16;

// -------------------------------------------------------------------------------------------------

/// Decode a single payload word into `output` and return the number of written samples.
///
/// `prior` is the last native sample of the previous word. It gets updated to the last native
/// sample of this word. `output` must be able to hold [`SampleFormat::outputs_per_word`] samples.
#[inline]
pub fn decode_word(format: SampleFormat, word: u32, prior: &mut i16, output: &mut [i16]) -> usize {
    let mut natives = [0i16; 4];
    let natives = unpack_word(format.encoding(), word, &mut natives);
    let written = match format.rate_ratio() {
        1 => copy_native(natives, output),
        2 => upsample_2x(natives, *prior, output),
        4 => upsample_4x(natives, *prior, output),
        ratio => unreachable!("Unexpected rate ratio {ratio}"),
    };
    *prior = natives[natives.len() - 1];
    written
}

/// Decode a run of payload words into `output` and return the number of written samples.
///
/// `output` must be able to hold `words.len() * format.outputs_per_word()` samples.
pub fn decode_words(
    format: SampleFormat,
    words: &[u32],
    prior: &mut i16,
    output: &mut [i16],
) -> usize {
    let outputs_per_word = format.outputs_per_word();
    debug_assert!(
        output.len() >= words.len() * outputs_per_word,
        "Output buffer is too small"
    );
    words
        .iter()
        .zip(output.chunks_exact_mut(outputs_per_word))
        .map(|(word, output)| decode_word(format, *word, prior, output))
        .sum()
}

// -------------------------------------------------------------------------------------------------

#[inline(always)]
fn unpack_word(encoding: SampleEncoding, word: u32, natives: &mut [i16; 4]) -> &[i16] {
    match encoding {
        SampleEncoding::Ulaw => {
            for (index, native) in natives.iter_mut().enumerate() {
                *native = ULAW_DECODE_TABLE[((word >> (index * 8)) & 0xFF) as usize];
            }
            &natives[..4]
        }
        SampleEncoding::Pcm16 => {
            natives[0] = (word & 0xFFFF) as i16;
            natives[1] = (word >> 16) as i16;
            &natives[..2]
        }
    }
}

#[inline(always)]
fn copy_native(natives: &[i16], output: &mut [i16]) -> usize {
    output[..natives.len()].copy_from_slice(natives);
    natives.len()
}

#[inline(always)]
fn upsample_2x(natives: &[i16], prior: i16, output: &mut [i16]) -> usize {
    assume!(unsafe: output.len() >= natives.len() * 2, "Output must fit one word");
    let mut s0 = prior as i32;
    for (native, output) in natives.iter().zip(output.chunks_exact_mut(2)) {
        let s1 = *native as i32;
        output[0] = ((s0 + s1) >> 1) as i16;
        output[1] = s1 as i16;
        s0 = s1;
    }
    natives.len() * 2
}

#[inline(always)]
fn upsample_4x(natives: &[i16], prior: i16, output: &mut [i16]) -> usize {
    assume!(unsafe: output.len() >= natives.len() * 4, "Output must fit one word");
    let mut s0 = prior as i32;
    for (native, output) in natives.iter().zip(output.chunks_exact_mut(4)) {
        let s1 = *native as i32;
        output[0] = ((s0 * 3 + s1) >> 2) as i16;
        output[1] = ((s0 + s1) >> 1) as i16;
        output[2] = ((s0 + s1 * 3) >> 2) as i16;
        output[3] = s1 as i16;
        s0 = s1;
    }
    natives.len() * 4
}

// -------------------------------------------------------------------------------------------------
