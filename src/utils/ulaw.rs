//! u-law to linear PCM expansion.
//!
//! Uses the plain sign/magnitude byte layout, without G.711's bit inversion: bit 7 is the sign,
//! bits 4..=6 the exponent and bits 0..=3 the mantissa. Byte 0x00 is the smallest positive
//! step, so zeroed payloads play back as (near) silence.

// -------------------------------------------------------------------------------------------------

/// The encoded byte which is used to pad payloads and to read past a sample's end.
pub const ULAW_SILENCE: u8 = 0x00;

// -------------------------------------------------------------------------------------------------

/// Expand a single u-law encoded byte into a 16 bit linear sample.
pub const fn ulaw_to_linear(byte: u8) -> i16 {
    const BIAS: i32 = 0x80;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;
    // center of the encoded magnitude interval, minus the encoder's bias
    let magnitude =
        (1 << (exponent + 7)) + (mantissa << (exponent + 3)) + (1 << (exponent + 2)) - BIAS;
    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Precomputed u-law expansion table, indexed by the encoded byte.
pub static ULAW_DECODE_TABLE: [i16; 256] = {
    let mut table = [0; 256];
    let mut index = 0;
    while index < 256 {
        table[index] = ulaw_to_linear(index as u8);
        index += 1;
    }
    table
};

// -------------------------------------------------------------------------------------------------
