//! Error types for the threewire-core crate.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    IncompleteEscape,
    InvalidEscapeSequence(u8),
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::IncompleteEscape => write!(f, "incomplete escape sequence"),
            FramingError::InvalidEscapeSequence(v) => {
                write!(f, "invalid escape sequence: 0x{v:02x}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FramingError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    TooShort { min: usize, actual: usize },
    /// The four header bytes must sum to 0 mod 256; carries the residue.
    InvalidChecksum(u8),
    LengthMismatch { header_says: usize, actual: usize },
    PayloadTooLarge { len: usize, max: usize },
    InvalidPacketType(u8),
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::TooShort { min, actual } => {
                write!(f, "header too short: need at least {min} bytes, got {actual}")
            }
            HeaderError::InvalidChecksum(residue) => {
                write!(f, "header checksum mismatch: residue 0x{residue:02x}")
            }
            HeaderError::LengthMismatch { header_says, actual } => {
                write!(
                    f,
                    "payload length mismatch: header says {header_says} bytes but got {actual}"
                )
            }
            HeaderError::PayloadTooLarge { len, max } => {
                write!(f, "payload too large: {len} bytes (max {max})")
            }
            HeaderError::InvalidPacketType(v) => write!(f, "invalid packet type: {v}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HeaderError {}
