//! Link-control payload patterns and the CONFIG field.
//!
//! Link-control packets (packet type 15) carry one of the SYNC-family
//! payloads below. The power-management messages (WAKEUP/WOKEN/SLEEP) are
//! classified so they can be logged, but the link layer never acts on them.
//!
//! ```text
//! | Name            | Byte pattern
//! +-----------------+--------------------------------
//! | SYNC MESSAGE    | 0x01 0x7E
//! | SYNC RESPONSE   | 0x02 0x7D
//! | CONFIG MESSAGE  | 0x03 0xFC CONFIGURATION_FIELD
//! | CONFIG RESPONSE | 0x04 0x7B CONFIGURATION_FIELD
//! | WAKEUP MESSAGE  | 0x05 0xFA
//! | WOKEN MESSAGE   | 0x06 0xF9
//! | SLEEP MESSAGE   | 0x07 0x78
//! ```

extern crate alloc;
use alloc::vec::Vec;

pub const SYNC: [u8; 2] = [0x01, 0x7E];
pub const SYNC_RESPONSE: [u8; 2] = [0x02, 0x7D];
pub const SYNC_CONFIG: [u8; 2] = [0x03, 0xFC];
pub const SYNC_CONFIG_RESPONSE: [u8; 2] = [0x04, 0x7B];
pub const WAKEUP: [u8; 2] = [0x05, 0xFA];
pub const WOKEN: [u8; 2] = [0x06, 0xF9];
pub const SLEEP: [u8; 2] = [0x07, 0x78];

/// Kinds of link-control payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Sync,
    SyncResponse,
    SyncConfig,
    SyncConfigResponse,
    Wakeup,
    Woken,
    Sleep,
}

impl ControlKind {
    /// Classify a link-control payload by its two-byte pattern.
    ///
    /// Returns `None` for payloads shorter than two bytes or with an
    /// unrecognized pattern.
    pub fn classify(payload: &[u8]) -> Option<Self> {
        let pattern: [u8; 2] = [*payload.first()?, *payload.get(1)?];
        match pattern {
            SYNC => Some(ControlKind::Sync),
            SYNC_RESPONSE => Some(ControlKind::SyncResponse),
            SYNC_CONFIG => Some(ControlKind::SyncConfig),
            SYNC_CONFIG_RESPONSE => Some(ControlKind::SyncConfigResponse),
            WAKEUP => Some(ControlKind::Wakeup),
            WOKEN => Some(ControlKind::Woken),
            SLEEP => Some(ControlKind::Sleep),
            _ => None,
        }
    }

    /// A string name for the control payload kind.
    pub fn name(&self) -> &'static str {
        match self {
            ControlKind::Sync => "SYNC",
            ControlKind::SyncResponse => "SYNC_RESPONSE",
            ControlKind::SyncConfig => "SYNC_CONFIG",
            ControlKind::SyncConfigResponse => "SYNC_CONFIG_RESPONSE",
            ControlKind::Wakeup => "WAKEUP",
            ControlKind::Woken => "WOKEN",
            ControlKind::Sleep => "SLEEP",
        }
    }

    /// Build the canonical wire payload for an outgoing control packet.
    ///
    /// The CONFIG messages append `config`; the others ignore it.
    pub fn payload(&self, config: ConfigField) -> Vec<u8> {
        let mut body = Vec::with_capacity(3);
        match self {
            ControlKind::Sync => body.extend_from_slice(&SYNC),
            ControlKind::SyncResponse => body.extend_from_slice(&SYNC_RESPONSE),
            ControlKind::SyncConfig => {
                body.extend_from_slice(&SYNC_CONFIG);
                body.push(config.to_byte());
            }
            ControlKind::SyncConfigResponse => {
                body.extend_from_slice(&SYNC_CONFIG_RESPONSE);
                body.push(config.to_byte());
            }
            ControlKind::Wakeup => body.extend_from_slice(&WAKEUP),
            ControlKind::Woken => body.extend_from_slice(&WOKEN),
            ControlKind::Sleep => body.extend_from_slice(&SLEEP),
        }
        body
    }
}

impl core::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// The CONFIG byte carried by CONFIG MESSAGE / CONFIG RESPONSE.
///
/// Layout per the Three-Wire specification:
///
/// ```text
/// bits 0..2: sliding-window size
/// bit 3:     out-of-frame software flow control
/// bit 4:     data-integrity-check type
/// bits 5..7: version number
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigField {
    pub sliding_window_size: u8,
    pub out_of_frame: bool,
    pub data_integrity_check: bool,
    pub version: u8,
}

impl ConfigField {
    pub fn to_byte(&self) -> u8 {
        (self.sliding_window_size & 0x07)
            | ((self.out_of_frame as u8) << 3)
            | ((self.data_integrity_check as u8) << 4)
            | ((self.version & 0x07) << 5)
    }

    pub fn from_byte(byte: u8) -> Self {
        ConfigField {
            sliding_window_size: byte & 0x07,
            out_of_frame: byte & 0x08 != 0,
            data_integrity_check: byte & 0x10 != 0,
            version: (byte >> 5) & 0x07,
        }
    }
}

impl Default for ConfigField {
    /// The fixed configuration this implementation transmits: a sliding
    /// window of one reliable frame, no out-of-frame flow control, no data
    /// integrity check, version 0.
    fn default() -> Self {
        ConfigField {
            sliding_window_size: 1,
            out_of_frame: false,
            data_integrity_check: false,
            version: 0,
        }
    }
}
