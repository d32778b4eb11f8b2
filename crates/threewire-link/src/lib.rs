//! Reliable Three-Wire UART (H5) link layer.
//!
//! Sits between a raw byte-oriented lower transport (a serial/UART device,
//! exposed through the [`LowerTransport`] trait) and an application protocol
//! layer. Provides:
//!
//! - de-framing of the raw byte stream into SLIP-delimited frames
//!   ([`FrameAssembler`]),
//! - the five-state link-initialization handshake driven by a dedicated
//!   worker thread ([`machine`]),
//! - reliable sequenced delivery with acknowledgements and bounded
//!   retransmission ([`H5Transport::send`]).
//!
//! The wire formats themselves live in `threewire-core`; this crate owns all
//! threading and link lifecycle state.

pub mod assembler;
pub mod constants;
pub mod criteria;
pub mod error;
pub mod logging;
pub mod lower;
pub mod machine;
pub mod testing;
pub mod transport;

pub use assembler::FrameAssembler;
pub use error::{LinkError, TransportError};
pub use lower::{DataCallback, LinkStatus, LowerTransport, StatusCallback};
pub use machine::LinkState;
pub use transport::{H5Config, H5Transport, LinkStats};
