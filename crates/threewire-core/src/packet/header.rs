//! H5 packet header encoding and decoding.
//!
//! The header layout (from BLUETOOTH SPECIFICATION V4 [Vol 4, Part D]):
//!
//! ```text
//! byte 0: ack_num (bits 0..2) | integrity_check (bit 3) | reliable (bit 4) | seq_num (bits 5..7)
//! byte 1: packet_type (bits 0..3) | payload_len low nibble (bits 4..7)
//! byte 2: payload_len >> 4
//! byte 3: checksum — chosen so the four header bytes sum to 0 mod 256
//! ```
//!
//! The payload follows the header verbatim. The integrity-check bit only
//! marks the header; the CRC variant of the protocol is not implemented, so
//! no trailer bytes are ever produced or consumed.

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::{HEADER_SIZE, MAX_PAYLOAD_LEN, PacketType, SEQ_MASK};
use crate::error::HeaderError;

/// A parsed H5 packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct PacketHeader {
    /// 3-bit sequence number of this frame (reliable frames only).
    pub seq_num: u8,
    /// 3-bit sequence number this side expects next from the peer.
    pub ack_num: u8,
    /// Whether the frame must be acknowledged by the peer.
    pub reliable: bool,
    /// Whether the sender asserted the data-integrity-check bit.
    pub integrity_check: bool,
    pub packet_type: PacketType,
}

impl PacketHeader {
    pub const SIZE: usize = HEADER_SIZE;

    /// Serialize the header followed by `payload`.
    ///
    /// `seq_num` and `ack_num` are masked to their 3-bit fields. Fails when
    /// the payload does not fit the 12-bit length field.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, HeaderError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(HeaderError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        let len = payload.len();

        let byte0 = (self.ack_num & SEQ_MASK)
            | ((self.integrity_check as u8) << 3)
            | ((self.reliable as u8) << 4)
            | ((self.seq_num & SEQ_MASK) << 5);
        let byte1 = (self.packet_type as u8) | (((len & 0x0F) as u8) << 4);
        let byte2 = (len >> 4) as u8;
        let checksum = 0u8
            .wrapping_sub(byte0)
            .wrapping_sub(byte1)
            .wrapping_sub(byte2);

        let mut result = Vec::with_capacity(Self::SIZE + payload.len());
        result.push(byte0);
        result.push(byte1);
        result.push(byte2);
        result.push(checksum);
        result.extend_from_slice(payload);
        Ok(result)
    }

    /// Parse a header-prefixed packet into its header and payload.
    ///
    /// Verifies the header checksum and that the declared payload length
    /// matches the bytes actually present.
    #[must_use = "parsing may fail; check the Result"]
    pub fn decode(raw: &[u8]) -> Result<(Self, Vec<u8>), HeaderError> {
        if raw.len() < Self::SIZE {
            return Err(HeaderError::TooShort {
                min: Self::SIZE,
                actual: raw.len(),
            });
        }

        let residue = raw[0]
            .wrapping_add(raw[1])
            .wrapping_add(raw[2])
            .wrapping_add(raw[3]);
        if residue != 0 {
            return Err(HeaderError::InvalidChecksum(residue));
        }

        let header_says = ((raw[1] >> 4) as usize) | ((raw[2] as usize) << 4);
        let actual = raw.len() - Self::SIZE;
        if header_says != actual {
            return Err(HeaderError::LengthMismatch { header_says, actual });
        }

        let packet_type = PacketType::from_u8(raw[1] & 0x0F)?;

        let header = PacketHeader {
            seq_num: (raw[0] >> 5) & SEQ_MASK,
            ack_num: raw[0] & SEQ_MASK,
            reliable: raw[0] & 0x10 != 0,
            integrity_check: raw[0] & 0x08 != 0,
            packet_type,
        };
        Ok((header, raw[Self::SIZE..].to_vec()))
    }
}
