//! In-memory lower transport and frame builders for exercising the link
//! layer without a serial device.
//!
//! [`MockLower`] records every frame the link layer writes and can run a
//! scripted peer on its own thread, mirroring how a real lower transport
//! delivers received bytes from its reader. Handles are cheap clones around
//! shared state, so a test can keep one while moving another into
//! [`H5Transport`](crate::transport::H5Transport).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use threewire_core::control::ControlKind;
use threewire_core::framing::slip::slip_frame;
use threewire_core::{PacketHeader, PacketType};

use crate::error::TransportError;
use crate::lower::{DataCallback, LinkStatus, LowerTransport, StatusCallback};
use crate::transport::lock;

/// Scripted peer behavior: maps each frame written by the link layer to the
/// raw frames the peer sends back.
pub type PeerHandler = Box<dyn FnMut(Vec<u8>) -> Vec<Vec<u8>> + Send>;

struct MockInner {
    handler: Mutex<Option<PeerHandler>>,
    data_cb: Mutex<Option<Arc<DataCallback>>>,
    status_cb: Mutex<Option<Arc<StatusCallback>>>,
    to_peer: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    peer_thread: Mutex<Option<JoinHandle<()>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    sent_cond: Condvar,
    open: AtomicBool,
    fail_open: bool,
}

/// An in-memory [`LowerTransport`].
#[derive(Clone)]
pub struct MockLower {
    inner: Arc<MockInner>,
}

impl MockLower {
    /// A transport with a silent peer: frames are recorded, nothing answers.
    pub fn new() -> Self {
        Self::build(None, false)
    }

    /// A transport whose peer runs `handler` on a dedicated thread.
    pub fn with_peer(handler: impl FnMut(Vec<u8>) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        Self::build(Some(Box::new(handler)), false)
    }

    /// A transport whose `open` fails, as if the device were missing.
    pub fn failing_open() -> Self {
        Self::build(None, true)
    }

    fn build(handler: Option<PeerHandler>, fail_open: bool) -> Self {
        Self {
            inner: Arc::new(MockInner {
                handler: Mutex::new(handler),
                data_cb: Mutex::new(None),
                status_cb: Mutex::new(None),
                to_peer: Mutex::new(None),
                peer_thread: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                sent_cond: Condvar::new(),
                open: AtomicBool::new(false),
                fail_open,
            }),
        }
    }

    /// Every frame written so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.inner.sent).clone()
    }

    /// Block until at least `count` frames have been written.
    pub fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        let guard = lock(&self.inner.sent);
        let (guard, _) = self
            .inner
            .sent_cond
            .wait_timeout_while(guard, timeout, |sent| sent.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        guard.len() >= count
    }

    /// Deliver raw bytes to the registered data callback, as a received
    /// chunk from the wire. Runs on the calling thread.
    pub fn inject(&self, bytes: &[u8]) {
        let callback = lock(&self.inner.data_cb).clone();
        if let Some(cb) = callback {
            cb(bytes);
        }
    }

    /// Report an asynchronous status code through the status callback.
    pub fn emit_status(&self, status: LinkStatus) {
        let callback = lock(&self.inner.status_cb).clone();
        if let Some(cb) = callback {
            cb(status);
        }
    }
}

impl Default for MockLower {
    fn default() -> Self {
        Self::new()
    }
}

impl LowerTransport for MockLower {
    fn open(
        &self,
        status_cb: StatusCallback,
        data_cb: DataCallback,
    ) -> Result<(), TransportError> {
        if self.inner.fail_open {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "device unavailable",
            )));
        }

        let data_cb = Arc::new(data_cb);
        *lock(&self.inner.data_cb) = Some(Arc::clone(&data_cb));
        *lock(&self.inner.status_cb) = Some(Arc::new(status_cb));

        if let Some(mut handler) = lock(&self.inner.handler).take() {
            let (tx, rx) = mpsc::channel::<Vec<u8>>();
            *lock(&self.inner.to_peer) = Some(tx);

            let handle = std::thread::spawn(move || {
                while let Ok(frame) = rx.recv() {
                    for reply in handler(frame) {
                        data_cb(&reply);
                    }
                }
            });
            *lock(&self.inner.peer_thread) = Some(handle);
        }

        self.inner.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.inner.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }

        lock(&self.inner.sent).push(data.to_vec());
        self.inner.sent_cond.notify_all();

        if let Some(tx) = lock(&self.inner.to_peer).as_ref() {
            let _ = tx.send(data.to_vec());
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.inner.open.store(false, Ordering::SeqCst);
        *lock(&self.inner.to_peer) = None;
        if let Some(handle) = lock(&self.inner.peer_thread).take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Frame builders
// ---------------------------------------------------------------------------

/// Header-encode `payload` and apply the outer stuffing.
pub fn build_frame(header: PacketHeader, payload: &[u8]) -> Vec<u8> {
    let packet = header
        .encode(payload)
        .expect("test payloads fit the length field");
    slip_frame(&packet)
}

/// Undo the outer stuffing and the header of a recorded frame.
pub fn decode_frame(raw: &[u8]) -> Option<(PacketHeader, Vec<u8>)> {
    let packet = threewire_core::framing::slip::slip_unframe(raw).ok()?;
    PacketHeader::decode(&packet).ok()
}

fn control_header(packet_type: PacketType, ack_num: u8) -> PacketHeader {
    PacketHeader {
        seq_num: 0,
        ack_num,
        reliable: false,
        integrity_check: false,
        packet_type,
    }
}

/// An ACK frame acknowledging everything below `ack_num`.
pub fn ack_frame(ack_num: u8) -> Vec<u8> {
    build_frame(control_header(PacketType::Ack, ack_num), &[])
}

pub fn sync_frame() -> Vec<u8> {
    build_frame(
        control_header(PacketType::LinkControl, 0),
        &threewire_core::control::SYNC,
    )
}

pub fn sync_response_frame() -> Vec<u8> {
    build_frame(
        control_header(PacketType::LinkControl, 0),
        &threewire_core::control::SYNC_RESPONSE,
    )
}

pub fn sync_config_frame() -> Vec<u8> {
    build_frame(
        control_header(PacketType::LinkControl, 0),
        &ControlKind::SyncConfig.payload(threewire_core::ConfigField::default()),
    )
}

pub fn sync_config_response_frame() -> Vec<u8> {
    build_frame(
        control_header(PacketType::LinkControl, 0),
        &ControlKind::SyncConfigResponse.payload(threewire_core::ConfigField::default()),
    )
}

/// A reliable user-data frame as a peer would send it.
pub fn reliable_frame(seq_num: u8, ack_num: u8, payload: &[u8]) -> Vec<u8> {
    build_frame(
        PacketHeader {
            seq_num,
            ack_num,
            reliable: true,
            integrity_check: false,
            packet_type: PacketType::VendorSpecific,
        },
        payload,
    )
}

/// A well-behaved peer: answers the handshake and acknowledges every
/// reliable frame.
pub fn handshake_peer() -> PeerHandler {
    Box::new(|raw: Vec<u8>| {
        let Some((header, payload)) = decode_frame(&raw) else {
            return Vec::new();
        };
        match header.packet_type {
            PacketType::LinkControl => match ControlKind::classify(&payload) {
                Some(ControlKind::Sync) => vec![sync_response_frame()],
                // Answer our CONFIG and open the peer's own CONFIG exchange.
                Some(ControlKind::SyncConfig) => {
                    vec![sync_config_response_frame(), sync_config_frame()]
                }
                _ => Vec::new(),
            },
            PacketType::VendorSpecific if header.reliable => {
                vec![ack_frame((header.seq_num + 1) & 0x07)]
            }
            _ => Vec::new(),
        }
    })
}
