//! Protocol constants and enumerations for the Three-Wire UART link layer.

use crate::error::HeaderError;

// Wire format sizes
pub const HEADER_SIZE: usize = 4;
/// The header carries the payload length in a 12-bit field.
pub const MAX_PAYLOAD_LEN: usize = 0x0FFF;

// Sequence space
/// Sequence and acknowledgement numbers are 3 bits wide.
pub const SEQ_MODULUS: u8 = 8;
pub const SEQ_MASK: u8 = 0x07;

/// H5 packet types (header byte 1, bits 0..3).
///
/// Only `Ack`, `Reset`, `VendorSpecific`, and `LinkControl` are acted on by
/// the link layer; the HCI passthrough types are recognized for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Ack = 0,
    HciCommand = 1,
    AclData = 2,
    SyncData = 3,
    HciEvent = 4,
    Reset = 5,
    VendorSpecific = 9,
    LinkControl = 15,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Result<Self, HeaderError> {
        match v {
            0 => Ok(PacketType::Ack),
            1 => Ok(PacketType::HciCommand),
            2 => Ok(PacketType::AclData),
            3 => Ok(PacketType::SyncData),
            4 => Ok(PacketType::HciEvent),
            5 => Ok(PacketType::Reset),
            9 => Ok(PacketType::VendorSpecific),
            15 => Ok(PacketType::LinkControl),
            _ => Err(HeaderError::InvalidPacketType(v)),
        }
    }

    /// A string name for the packet type.
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Ack => "ACK",
            PacketType::HciCommand => "HCI_COMMAND",
            PacketType::AclData => "ACL_DATA",
            PacketType::SyncData => "SYNC_DATA",
            PacketType::HciEvent => "HCI_EVENT",
            PacketType::Reset => "RESET",
            PacketType::VendorSpecific => "VENDOR_SPECIFIC",
            PacketType::LinkControl => "LINK_CONTROL",
        }
    }
}

impl core::fmt::Display for PacketType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
