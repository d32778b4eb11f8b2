//! SLIP byte-stuffing framing.
//!
//! Implements the outer frame envelope of the Three-Wire UART transport:
//! each frame body is bracketed by DELIMITER (0xC0) bytes, and occurrences
//! of DELIMITER and ESCAPE inside the body are substituted with two-byte
//! escape sequences.

extern crate alloc;
use alloc::vec::Vec;

use crate::error::FramingError;

pub const DELIMITER: u8 = 0xC0;
pub const ESCAPE: u8 = 0xDB;
pub const ESCAPED_DELIMITER: u8 = 0xDC;
pub const ESCAPED_ESCAPE: u8 = 0xDD;

/// Escape special bytes in data using SLIP byte-stuffing.
///
/// Replaces DELIMITER (0xC0) with ESCAPE + 0xDC, and ESCAPE (0xDB) with
/// ESCAPE + 0xDD. No other bytes are transformed.
pub fn slip_escape(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    for &byte in data {
        match byte {
            DELIMITER => {
                result.push(ESCAPE);
                result.push(ESCAPED_DELIMITER);
            }
            ESCAPE => {
                result.push(ESCAPE);
                result.push(ESCAPED_ESCAPE);
            }
            _ => result.push(byte),
        }
    }
    result
}

/// Frame data with SLIP delimiters: DELIMITER + escape(data) + DELIMITER.
pub fn slip_frame(data: &[u8]) -> Vec<u8> {
    let escaped = slip_escape(data);
    let mut framed = Vec::with_capacity(escaped.len() + 2);
    framed.push(DELIMITER);
    framed.extend_from_slice(&escaped);
    framed.push(DELIMITER);
    framed
}

/// Remove SLIP framing: strip delimiters (if present) and unescape data.
///
/// Callers may pass the frame with or without its leading/trailing
/// DELIMITER bytes. Fails when ESCAPE is the final byte or is followed by
/// anything other than 0xDC/0xDD.
pub fn slip_unframe(framed: &[u8]) -> Result<Vec<u8>, FramingError> {
    let inner = framed.strip_prefix(&[DELIMITER]).unwrap_or(framed);
    let inner = inner.strip_suffix(&[DELIMITER]).unwrap_or(inner);

    let mut result = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] == ESCAPE {
            if i + 1 >= inner.len() {
                return Err(FramingError::IncompleteEscape);
            }
            match inner[i + 1] {
                ESCAPED_DELIMITER => result.push(DELIMITER),
                ESCAPED_ESCAPE => result.push(ESCAPE),
                other => return Err(FramingError::InvalidEscapeSequence(other)),
            }
            i += 2;
        } else {
            result.push(inner[i]);
            i += 1;
        }
    }
    Ok(result)
}
