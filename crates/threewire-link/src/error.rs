//! Link-layer error types.

use threewire_core::HeaderError;

/// Errors surfaced by the lower byte transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not open")]
    NotOpen,

    #[error("transport stopped")]
    Stopped,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to callers of the link layer.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("timed out waiting for the peer")]
    Timeout,

    #[error("link failure: {0}")]
    Internal(String),

    #[error("header error: {0}")]
    Header(#[from] HeaderError),

    #[error("lower transport error: {0}")]
    Transport(#[from] TransportError),
}
