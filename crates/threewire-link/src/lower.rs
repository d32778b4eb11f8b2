//! Lower transport contract and asynchronous status codes.
//!
//! The link layer is I/O-agnostic: anything that can move raw bytes in both
//! directions can carry it. A concrete serial/UART implementation lives with
//! the application; [`crate::testing::MockLower`] provides an in-memory one
//! for tests.

use crate::error::TransportError;

/// Asynchronous status codes reported alongside the data path.
///
/// `IoResourcesUnavailable` marks the underlying device as lost and drives
/// the link to FAILED; the other codes are informational milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// The lower transport lost its I/O resources (device unplugged,
    /// descriptor closed, ...).
    IoResourcesUnavailable,
    /// A RESET frame was sent to the target.
    ResetPerformed,
    /// The link handshake completed; the connection is active.
    ConnectionActive,
}

/// Callback invoked with asynchronous [`LinkStatus`] codes.
pub type StatusCallback = Box<dyn Fn(LinkStatus) + Send + Sync>;

/// Callback invoked with received byte chunks (arbitrary sizes).
pub type DataCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// A byte-oriented transport below the link layer.
///
/// Implementations own their read side: after `open`, received chunks are
/// delivered through the data callback from a thread belonging to the
/// transport. `send` must never invoke either callback synchronously on the
/// calling thread; the link layer may call `send` while holding internal
/// locks that the callbacks also take.
pub trait LowerTransport: Send + Sync {
    /// Open the transport and register the status and data callbacks.
    fn open(
        &self,
        status_cb: StatusCallback,
        data_cb: DataCallback,
    ) -> Result<(), TransportError>;

    /// Write raw bytes to the transport.
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the transport and release its resources. Idempotent.
    fn close(&self) -> Result<(), TransportError>;
}
