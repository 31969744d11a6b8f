//! Little-endian integer decoding for variable-width NTFS fields
//!
//! Data-run offsets, signed size deltas and similar fields are stored with
//! whatever byte count the writer chose, so the width is always taken from
//! the input length rather than assumed to be 1/2/4/8 bytes.

use crate::error::{MftError, Result};

const MAX_NATIVE_BYTES: usize = 16;

/// Decode `buf` (least significant byte first) as an unsigned integer.
pub fn parse_little_endian_unsigned(buf: &[u8]) -> Result<u128> {
    if buf.is_empty() {
        return Err(MftError::Decoding(
            "cannot decode an integer from zero bytes".to_string(),
        ));
    }

    if buf.len() > MAX_NATIVE_BYTES && buf[MAX_NATIVE_BYTES..].iter().any(|&b| b != 0) {
        return Err(MftError::Decoding(format!(
            "{}-byte unsigned value does not fit in 128 bits",
            buf.len()
        )));
    }

    let width = buf.len().min(MAX_NATIVE_BYTES);
    Ok(buf[..width]
        .iter()
        .enumerate()
        .fold(0u128, |acc, (i, &b)| acc | (b as u128) << (i * 8)))
}

/// Decode `buf` (least significant byte first) as a two's-complement signed
/// integer whose bit width is `8 * buf.len()`.
///
/// Inputs wider than 16 bytes are accepted only when the extra high bytes are
/// pure sign extension; anything else fails instead of being truncated.
pub fn parse_little_endian_signed(buf: &[u8]) -> Result<i128> {
    let last = *buf.last().ok_or_else(|| {
        MftError::Decoding("cannot decode an integer from zero bytes".to_string())
    })?;
    let negative = last & 0x80 != 0;

    let width = if buf.len() > MAX_NATIVE_BYTES {
        let fill = if negative { 0xFF } else { 0x00 };
        let extension_ok = buf[MAX_NATIVE_BYTES..].iter().all(|&b| b == fill)
            && (buf[MAX_NATIVE_BYTES - 1] & 0x80 != 0) == negative;
        if !extension_ok {
            return Err(MftError::Decoding(format!(
                "{}-byte signed value does not fit in 128 bits",
                buf.len()
            )));
        }
        MAX_NATIVE_BYTES
    } else {
        buf.len()
    };

    let bytes = &buf[..width];
    if !negative {
        return Ok(parse_little_endian_positive(bytes));
    }
    Ok(parse_little_endian_negative(bytes))
}

fn parse_little_endian_positive(bytes: &[u8]) -> i128 {
    bytes
        .iter()
        .enumerate()
        .fold(0i128, |acc, (i, &b)| acc + ((b as i128) << (i * 8)))
}

fn parse_little_endian_negative(bytes: &[u8]) -> i128 {
    // The top bit of the complemented high byte is clear, so the sum stays
    // below 2^127 and `-sum - 1` reaches i128::MIN without overflowing.
    let complement = bytes
        .iter()
        .enumerate()
        .fold(0i128, |acc, (i, &b)| acc + (((b ^ 0xFF) as i128) << (i * 8)));
    -complement - 1
}
