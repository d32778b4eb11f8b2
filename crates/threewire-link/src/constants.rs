//! Link-layer timing constants.
//!
//! Only the retransmission timeout for user frames is configurable (via
//! [`H5Config`](crate::transport::H5Config)); everything here is fixed by
//! the protocol implementation.

use std::time::Duration;

/// Duration to wait before resending a handshake packet in the
/// UNINITIALIZED and INITIALIZED states.
pub const NON_ACTIVE_STATE_TIMEOUT: Duration = Duration::from_millis(250);

/// Number of times a reliable or handshake packet is transmitted before
/// giving up.
pub const PACKET_RETRANSMISSIONS: u8 = 4;

/// Duration `open` waits for the link to reach ACTIVE.
pub const OPEN_WAIT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Duration to wait after sending RESET before continuing UART
/// communication with the target.
pub const RESET_WAIT_DURATION: Duration = Duration::from_millis(300);

/// Default retransmission timeout for reliable user frames.
pub const DEFAULT_RETRANSMISSION_TIMEOUT: Duration = Duration::from_millis(250);
