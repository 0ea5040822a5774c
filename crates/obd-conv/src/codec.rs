//! Uppercase ASCII-hex conversion
//!
//! The adapter only ever replies in uppercase, so lowercase digits are
//! rejected along with everything else outside `0-9A-F`.

use crate::error::HexError;

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Encode a byte as two uppercase ASCII-hex characters
pub fn byte_to_hex_ascii(byte: u8) -> [u8; 2] {
    [DIGITS[(byte >> 4) as usize], DIGITS[(byte & 0x0F) as usize]]
}

/// Decode two ASCII-hex characters into a byte
pub fn hex_ascii_to_byte(hi: u8, lo: u8) -> Result<u8, HexError> {
    Ok((nibble(hi)? << 4) | nibble(lo)?)
}

fn nibble(c: u8) -> Result<u8, HexError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(HexError(c)),
    }
}
