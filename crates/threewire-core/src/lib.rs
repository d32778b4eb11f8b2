//! Wire formats for the Three-Wire UART (H5) link protocol.
//!
//! This crate defines the SLIP-style byte-stuffing envelope, the 4-byte H5
//! packet header, the packet-type table, and the link-control payloads used
//! by the Three-Wire UART transport (Bluetooth Core v4 [Vol 4, Part D]).
//! Everything here is pure and I/O-free; the threaded link layer lives in
//! `threewire-link`.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod control;
pub mod error;
pub mod framing;
pub mod packet;

pub use constants::PacketType;
pub use control::{ConfigField, ControlKind};
pub use error::{FramingError, HeaderError};
pub use packet::header::PacketHeader;
