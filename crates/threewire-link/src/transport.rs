//! The H5 transport: reliable sequenced delivery over a framed serial link.
//!
//! [`H5Transport`] wraps a [`LowerTransport`] and exposes the same
//! open/send/close shape one layer up. `send` blocks the caller until the
//! peer acknowledges the frame (or the retransmission budget runs out);
//! received frames are de-framed, decoded, and routed to the state machine,
//! the ack gate, or the upward data callback.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use threewire_core::constants::SEQ_MASK;
use threewire_core::control::{ConfigField, ControlKind};
use threewire_core::framing::slip::{slip_frame, slip_unframe};
use threewire_core::{PacketHeader, PacketType};

use crate::assembler::FrameAssembler;
use crate::constants::{DEFAULT_RETRANSMISSION_TIMEOUT, OPEN_WAIT_TIMEOUT, PACKET_RETRANSMISSIONS};
use crate::criteria::ExitCriteria;
use crate::error::LinkError;
use crate::lower::{DataCallback, LinkStatus, LowerTransport, StatusCallback};
use crate::machine::{self, LinkState};

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Construction-time configuration.
#[derive(Debug, Clone, Copy)]
pub struct H5Config {
    /// How long `send` waits for an acknowledgement before retransmitting.
    pub retransmission_timeout: Duration,
}

impl H5Config {
    pub fn new(retransmission_timeout: Duration) -> Self {
        Self {
            retransmission_timeout,
        }
    }
}

impl Default for H5Config {
    fn default() -> Self {
        Self::new(DEFAULT_RETRANSMISSION_TIMEOUT)
    }
}

/// Packet counters, sampled with [`H5Transport::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames successfully de-framed and decoded.
    pub rx_packets: u64,
    /// Frames handed to the lower transport.
    pub tx_packets: u64,
    /// Frames dropped by the receive pipeline.
    pub error_packets: u64,
}

/// State shared between the worker, the receive dispatcher, and callers.
pub(crate) struct Shared {
    pub state: LinkState,
    pub criteria: ExitCriteria,
}

struct AckGate {
    acked: bool,
}

/// Outgoing control frames and their packet-type/payload patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlFrame {
    Reset,
    Sync,
    SyncResponse,
    SyncConfig,
    SyncConfigResponse,
    Ack,
}

impl ControlFrame {
    fn packet_type(self) -> PacketType {
        match self {
            ControlFrame::Reset => PacketType::Reset,
            ControlFrame::Ack => PacketType::Ack,
            ControlFrame::Sync
            | ControlFrame::SyncResponse
            | ControlFrame::SyncConfig
            | ControlFrame::SyncConfigResponse => PacketType::LinkControl,
        }
    }

    fn payload(self) -> Vec<u8> {
        let config = ConfigField::default();
        match self {
            ControlFrame::Reset | ControlFrame::Ack => Vec::new(),
            ControlFrame::Sync => ControlKind::Sync.payload(config),
            ControlFrame::SyncResponse => ControlKind::SyncResponse.payload(config),
            ControlFrame::SyncConfig => ControlKind::SyncConfig.payload(config),
            ControlFrame::SyncConfigResponse => ControlKind::SyncConfigResponse.payload(config),
        }
    }
}

/// Everything behind the `Arc` shared with the worker and the callbacks.
pub(crate) struct LinkInner<L: LowerTransport> {
    pub lower: L,
    pub config: H5Config,

    pub shared: Mutex<Shared>,
    /// Worker waits here for exit-criteria changes.
    pub sync_cond: Condvar,
    /// `wait_for_state` watchers wait here for transitions.
    pub state_cond: Condvar,

    ack_gate: Mutex<AckGate>,
    ack_cond: Condvar,

    pub seq_num: AtomicU8,
    pub ack_num: AtomicU8,
    pub running: AtomicBool,

    assembler: Mutex<FrameAssembler>,
    status_cb: Mutex<Option<Arc<StatusCallback>>>,
    data_cb: Mutex<Option<Arc<DataCallback>>>,

    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    error_packets: AtomicU64,
}

/// A reliable Three-Wire UART link over a byte transport.
pub struct H5Transport<L: LowerTransport + 'static> {
    inner: Arc<LinkInner<L>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<L: LowerTransport + 'static> H5Transport<L> {
    pub fn new(lower: L, config: H5Config) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                lower,
                config,
                shared: Mutex::new(Shared {
                    state: LinkState::Start,
                    criteria: ExitCriteria::for_state(LinkState::Start),
                }),
                sync_cond: Condvar::new(),
                state_cond: Condvar::new(),
                ack_gate: Mutex::new(AckGate { acked: false }),
                ack_cond: Condvar::new(),
                seq_num: AtomicU8::new(0),
                ack_num: AtomicU8::new(0),
                running: AtomicBool::new(false),
                assembler: Mutex::new(FrameAssembler::new()),
                status_cb: Mutex::new(None),
                data_cb: Mutex::new(None),
                rx_packets: AtomicU64::new(0),
                tx_packets: AtomicU64::new(0),
                error_packets: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Open the lower transport and run the link handshake.
    ///
    /// Returns once the link reaches ACTIVE, `Timeout` if it does not get
    /// there within [`OPEN_WAIT_TIMEOUT`], or `Internal` when the lower
    /// transport cannot be opened.
    pub fn open(
        &self,
        status_cb: StatusCallback,
        data_cb: DataCallback,
    ) -> Result<(), LinkError> {
        {
            let shared = lock(&self.inner.shared);
            if shared.state != LinkState::Start {
                return Err(LinkError::InvalidState {
                    expected: LinkState::Start.name(),
                    actual: shared.state.name(),
                });
            }
        }

        *lock(&self.inner.status_cb) = Some(Arc::new(status_cb));
        *lock(&self.inner.data_cb) = Some(Arc::new(data_cb));

        self.start_worker();

        let inner = Arc::clone(&self.inner);
        let lower_data: DataCallback = Box::new(move |bytes| inner.on_bytes(bytes));
        let inner = Arc::clone(&self.inner);
        let lower_status: StatusCallback = Box::new(move |status| inner.on_lower_status(status));

        if let Err(e) = self.inner.lower.open(lower_status, lower_data) {
            tracing::error!(error = %e, "link: failed to open lower transport");
            lock(&self.inner.shared).criteria.set_io_resource_error();
            self.inner.sync_cond.notify_all();
            return Err(LinkError::Internal(e.to_string()));
        }

        {
            let mut shared = lock(&self.inner.shared);
            if let ExitCriteria::Start(c) = &mut shared.criteria {
                c.is_opened = true;
            }
        }
        self.inner.sync_cond.notify_all();

        if self.wait_for_state(LinkState::Active, OPEN_WAIT_TIMEOUT) {
            Ok(())
        } else {
            Err(LinkError::Timeout)
        }
    }

    /// Send a reliable user frame, blocking until the peer acknowledges it.
    ///
    /// The exact same bytes are retransmitted on every attempt, so the peer
    /// sees a stable sequence number across retries.
    pub fn send(&self, data: &[u8]) -> Result<(), LinkError> {
        {
            let shared = lock(&self.inner.shared);
            if shared.state != LinkState::Active {
                return Err(LinkError::InvalidState {
                    expected: LinkState::Active.name(),
                    actual: shared.state.name(),
                });
            }
        }

        let header = PacketHeader {
            seq_num: self.inner.seq_num.load(Ordering::SeqCst),
            ack_num: self.inner.ack_num.load(Ordering::SeqCst),
            reliable: true,
            integrity_check: true,
            packet_type: PacketType::VendorSpecific,
        };
        let packet = header.encode(data)?;
        let framed = slip_frame(&packet);

        // The gate is held across the whole transmit-and-wait loop so an ack
        // arriving between a write and the wait cannot be lost.
        let mut gate = lock(&self.inner.ack_gate);
        gate.acked = false;

        for attempt in 1..=PACKET_RETRANSMISSIONS {
            self.inner.tx_packets.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                seq = header.seq_num,
                attempt,
                bytes = %hex::encode(&framed),
                "link: tx reliable"
            );
            self.inner.lower.send(&framed)?;

            let (guard, _) = self
                .inner
                .ack_cond
                .wait_timeout_while(gate, self.inner.config.retransmission_timeout, |g| !g.acked)
                .unwrap_or_else(PoisonError::into_inner);
            gate = guard;

            if gate.acked {
                tracing::debug!(seq = header.seq_num, attempt, "link: reliable frame acknowledged");
                return Ok(());
            }
            tracing::debug!(seq = header.seq_num, attempt, "link: ack timeout");
        }

        tracing::warn!(seq = header.seq_num, "link: retransmission budget exhausted");
        Err(LinkError::Timeout)
    }

    /// Close the link and the lower transport.
    pub fn close(&self) -> Result<(), LinkError> {
        lock(&self.inner.shared).criteria.set_close();
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.sync_cond.notify_all();

        self.stop_worker();
        self.inner.lower.close()?;
        Ok(())
    }

    /// The state the machine is currently in. Advisory: it may change the
    /// moment the lock is released.
    pub fn current_state(&self) -> LinkState {
        lock(&self.inner.shared).state
    }

    /// Block until the machine is in `target`, or `timeout` elapses.
    pub fn wait_for_state(&self, target: LinkState, timeout: Duration) -> bool {
        let shared = lock(&self.inner.shared);
        let (shared, _) = self
            .inner
            .state_cond
            .wait_timeout_while(shared, timeout, |s| s.state != target)
            .unwrap_or_else(PoisonError::into_inner);
        shared.state == target
    }

    /// Sample the packet counters.
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            rx_packets: self.inner.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.inner.tx_packets.load(Ordering::Relaxed),
            error_packets: self.inner.error_packets.load(Ordering::Relaxed),
        }
    }

    fn start_worker(&self) {
        let mut slot = lock(&self.worker);
        if slot.is_some() {
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *slot = Some(thread::spawn(move || machine::worker_loop(&inner)));
    }

    fn stop_worker(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if thread::current().id() == handle.thread().id() {
                // Reentrant close from a callback running on the worker
                // itself: joining here would deadlock, so the thread is
                // detached and left to run out.
                tracing::debug!("link: close on worker thread, detaching");
                drop(handle);
            } else if handle.join().is_err() {
                tracing::error!("link: state worker panicked");
            }
        }
    }
}

impl<L: LowerTransport + 'static> Drop for H5Transport<L> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl<L: LowerTransport> LinkInner<L> {
    /// Receive-side entry point: raw bytes from the lower transport.
    fn on_bytes(&self, bytes: &[u8]) {
        let frames = lock(&self.assembler).feed(bytes);
        for frame in frames {
            self.process_frame(&frame);
        }
    }

    fn process_frame(&self, frame: &[u8]) {
        let packet = match slip_unframe(frame) {
            Ok(p) => p,
            Err(e) => {
                self.error_packets.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "link: dropping frame with bad stuffing");
                return;
            }
        };
        let (header, payload) = match PacketHeader::decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.error_packets.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "link: dropping frame with bad header");
                return;
            }
        };

        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            packet_type = %header.packet_type,
            seq = header.seq_num,
            ack = header.ack_num,
            reliable = header.reliable,
            bytes = %hex::encode(&payload),
            "link: rx"
        );

        if header.integrity_check {
            // The CRC-carrying variant of the protocol is not implemented.
            self.error_packets.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("link: dropping frame with unsupported data integrity check");
            return;
        }

        let shared = lock(&self.shared);

        if shared.state == LinkState::Reset {
            // Everything received during RESET is dropped, but the worker
            // still gets woken so the state can complete.
            drop(shared);
            self.sync_cond.notify_all();
            return;
        }

        match header.packet_type {
            PacketType::LinkControl => self.on_link_control(shared, &payload),
            PacketType::Ack => self.on_ack(shared, header.ack_num),
            PacketType::VendorSpecific => self.on_reliable_data(shared, &header, &payload),
            other => {
                tracing::debug!(packet_type = %other, "link: passthrough packet ignored");
            }
        }
    }

    fn on_link_control(&self, mut shared: MutexGuard<'_, Shared>, payload: &[u8]) {
        let Some(kind) = ControlKind::classify(payload) else {
            tracing::debug!(
                bytes = %hex::encode(payload),
                "link: unrecognized link-control payload"
            );
            return;
        };
        tracing::debug!(control = %kind, state = %shared.state, "link: link-control received");

        let mut notify = false;
        match (&mut shared.criteria, kind) {
            (ExitCriteria::Uninitialized(c), ControlKind::SyncResponse) => {
                c.sync_rsp_received = true;
                notify = true;
            }
            (ExitCriteria::Uninitialized(_), ControlKind::Sync) => {
                self.send_control(ControlFrame::SyncResponse);
            }
            (ExitCriteria::Initialized(c), ControlKind::SyncConfigResponse) => {
                c.sync_config_rsp_received = true;
                notify = true;
            }
            (ExitCriteria::Initialized(c), ControlKind::SyncConfig) => {
                c.sync_config_received = true;
                c.sync_config_rsp_sent = true;
                self.send_control(ControlFrame::SyncConfigResponse);
                notify = true;
            }
            (ExitCriteria::Initialized(_), ControlKind::Sync) => {
                self.send_control(ControlFrame::SyncResponse);
            }
            (ExitCriteria::Active(c), ControlKind::Sync) => {
                // The peer lost the link and wants a fresh handshake.
                c.sync_received = true;
                notify = true;
            }
            _ => {
                // Includes WAKEUP/WOKEN/SLEEP, which are logged only.
            }
        }
        drop(shared);
        if notify {
            self.sync_cond.notify_all();
        }
    }

    fn on_ack(&self, mut shared: MutexGuard<'_, Shared>, ack_num: u8) {
        let seq = self.seq_num.load(Ordering::SeqCst);
        let expected = (seq + 1) & SEQ_MASK;

        if ack_num == expected {
            let mut gate = lock(&self.ack_gate);
            self.seq_num.store(expected, Ordering::SeqCst);
            gate.acked = true;
            drop(gate);
            drop(shared);
            self.ack_cond.notify_all();
        } else if ack_num == seq {
            // A reply to an earlier transmission of the previous frame.
            tracing::debug!(ack = ack_num, "link: stale ack ignored");
        } else {
            tracing::warn!(ack = ack_num, seq, "link: impossible ack, link out of sync");
            let mut notify = false;
            if let ExitCriteria::Active(c) = &mut shared.criteria {
                c.irrecoverable_sync_error = true;
                notify = true;
            }
            drop(shared);
            if notify {
                self.sync_cond.notify_all();
            }
        }
    }

    fn on_reliable_data(
        &self,
        mut shared: MutexGuard<'_, Shared>,
        header: &PacketHeader,
        payload: &[u8],
    ) {
        if shared.state != LinkState::Active {
            tracing::debug!(state = %shared.state, "link: data frame outside ACTIVE ignored");
            return;
        }
        if !header.reliable {
            tracing::debug!("link: unreliable data frame ignored");
            return;
        }

        let expected = self.ack_num.load(Ordering::SeqCst);
        if header.seq_num == expected {
            self.ack_num
                .store((expected + 1) & SEQ_MASK, Ordering::SeqCst);
            self.send_control(ControlFrame::Ack);

            let callback = lock(&self.data_cb).clone();
            drop(shared);
            if let Some(cb) = callback {
                cb(payload);
            }
        } else {
            tracing::warn!(
                seq = header.seq_num,
                expected,
                "link: reliable frame out of order"
            );
            if let ExitCriteria::Active(c) = &mut shared.criteria {
                c.irrecoverable_sync_error = true;
            }
            drop(shared);
            self.sync_cond.notify_all();
        }
    }

    fn on_lower_status(&self, status: LinkStatus) {
        if status == LinkStatus::IoResourcesUnavailable {
            tracing::error!("link: lower transport lost its i/o resources");
            lock(&self.shared).criteria.set_io_resource_error();
            self.sync_cond.notify_all();
        }
        self.emit_status(status);
    }

    /// Forward a status code to the upward status callback, if registered.
    pub(crate) fn emit_status(&self, status: LinkStatus) {
        let callback = lock(&self.status_cb).clone();
        if let Some(cb) = callback {
            cb(status);
        }
    }

    /// Encode, stuff, and write a control frame.
    ///
    /// ACK frames carry the current `ack_num`; every other control frame
    /// goes out with both counters zero and the reliable bit clear.
    pub(crate) fn send_control(&self, frame: ControlFrame) {
        let ack_num = match frame {
            ControlFrame::Ack => self.ack_num.load(Ordering::SeqCst),
            _ => 0,
        };
        let header = PacketHeader {
            seq_num: 0,
            ack_num,
            reliable: false,
            integrity_check: false,
            packet_type: frame.packet_type(),
        };
        let packet = header
            .encode(&frame.payload())
            .expect("control payloads always fit the length field");
        let framed = slip_frame(&packet);

        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            frame = ?frame,
            ack = ack_num,
            bytes = %hex::encode(&framed),
            "link: tx control"
        );

        if let Err(e) = self.lower.send(&framed) {
            tracing::warn!(error = %e, frame = ?frame, "link: failed to send control frame");
        }
    }
}
