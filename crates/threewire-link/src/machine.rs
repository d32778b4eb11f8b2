//! Link state machine: states, per-state actions, and the worker loop.
//!
//! The machine runs on a dedicated thread. Each state's action blocks on the
//! shared condition variable until its exit criteria are fulfilled (or a
//! bounded timer fires), then returns the next state. The receive dispatcher
//! and callers advance the machine by mutating criteria under the shared
//! mutex and notifying.
//!
//! ```text
//! START ──▶ RESET ──▶ UNINITIALIZED ──▶ INITIALIZED ──▶ ACTIVE
//!   ▲         ▲                                           │
//!   │         └──────────── sync loss / peer SYNC ────────┤
//!   └───────────────────────── close ─────────────────────┘
//! (any state) ── i/o loss / handshake exhaustion ──▶ FAILED
//! ```

use std::sync::atomic::Ordering;
use std::sync::{Condvar, MutexGuard, PoisonError, WaitTimeoutResult};
use std::time::Duration;

use crate::constants::{NON_ACTIVE_STATE_TIMEOUT, PACKET_RETRANSMISSIONS, RESET_WAIT_DURATION};
use crate::criteria::ExitCriteria;
use crate::lower::{LinkStatus, LowerTransport};
use crate::transport::{ControlFrame, LinkInner, Shared, lock};

/// Link lifecycle states.
///
/// `Unknown` never occurs in the machine itself; it exists for diagnostics
/// reported by layers that have lost track of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Start,
    Reset,
    Uninitialized,
    Initialized,
    Active,
    Failed,
    Unknown,
}

impl LinkState {
    /// A string name for the state.
    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Start => "START",
            LinkState::Reset => "RESET",
            LinkState::Uninitialized => "UNINITIALIZED",
            LinkState::Initialized => "INITIALIZED",
            LinkState::Active => "ACTIVE",
            LinkState::Failed => "FAILED",
            LinkState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

type StateAction<L> = fn(&LinkInner<L>) -> LinkState;

/// Action table keyed by state tag.
fn action_for<L: LowerTransport>(state: LinkState) -> StateAction<L> {
    match state {
        LinkState::Start => start_action::<L>,
        LinkState::Reset => reset_action::<L>,
        LinkState::Uninitialized => uninitialized_action::<L>,
        LinkState::Initialized => initialized_action::<L>,
        LinkState::Active => active_action::<L>,
        LinkState::Failed | LinkState::Unknown => terminal_action::<L>,
    }
}

/// The worker: run state actions until the machine fails or is stopped.
pub(crate) fn worker_loop<L: LowerTransport>(inner: &LinkInner<L>) {
    loop {
        let state = lock(&inner.shared).state;
        if state == LinkState::Failed {
            tracing::error!("link: machine is in FAILED, a fresh open is required");
            break;
        }
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }

        let next = action_for::<L>(state)(inner);
        if next == LinkState::Failed {
            tracing::error!(from = %state, "link: state change to FAILED");
        } else {
            tracing::debug!(from = %state, to = %next, "link: state change");
        }

        {
            let mut shared = lock(&inner.shared);
            shared.state = next;
            shared.criteria = ExitCriteria::for_state(next);
        }
        inner.state_cond.notify_all();
    }
}

fn wait<'a>(cond: &Condvar, guard: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
    cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

fn wait_timeout<'a>(
    cond: &Condvar,
    guard: MutexGuard<'a, Shared>,
    timeout: Duration,
) -> (MutexGuard<'a, Shared>, WaitTimeoutResult) {
    cond.wait_timeout(guard, timeout)
        .unwrap_or_else(PoisonError::into_inner)
}

/// START: wait for `open` to bring up the lower transport.
fn start_action<L: LowerTransport>(inner: &LinkInner<L>) -> LinkState {
    let mut shared = lock(&inner.shared);
    while !shared.criteria.is_fulfilled() {
        shared = wait(&inner.sync_cond, shared);
    }
    let ExitCriteria::Start(c) = shared.criteria else {
        return LinkState::Failed;
    };
    if c.io_resource_error {
        LinkState::Failed
    } else if c.is_opened {
        LinkState::Reset
    } else {
        LinkState::Failed
    }
}

/// RESET: tell the target to reset, then give it time to come back up.
fn reset_action<L: LowerTransport>(inner: &LinkInner<L>) -> LinkState {
    loop {
        inner.send_control(ControlFrame::Reset);
        inner.emit_status(LinkStatus::ResetPerformed);

        let mut shared = lock(&inner.shared);
        if let ExitCriteria::Reset(c) = &mut shared.criteria {
            c.reset_sent = true;
        }
        let (guard, _) = wait_timeout(&inner.sync_cond, shared, RESET_WAIT_DURATION);
        if guard.criteria.is_fulfilled() {
            return LinkState::Uninitialized;
        }
    }
}

/// UNINITIALIZED: send SYNC until the peer answers with SYNC RESPONSE.
fn uninitialized_action<L: LowerTransport>(inner: &LinkInner<L>) -> LinkState {
    let mut remaining = PACKET_RETRANSMISSIONS;
    let mut shared = lock(&inner.shared);

    while !shared.criteria.is_fulfilled() && remaining > 0 {
        remaining -= 1;
        drop(shared);
        inner.send_control(ControlFrame::Sync);

        shared = lock(&inner.shared);
        if let ExitCriteria::Uninitialized(c) = &mut shared.criteria {
            c.sync_sent = true;
        }
        // The response may already have landed while the lock was released
        // for the send; waiting would have nothing left to wake it.
        if shared.criteria.is_fulfilled() {
            break;
        }
        let (guard, _) = wait_timeout(&inner.sync_cond, shared, NON_ACTIVE_STATE_TIMEOUT);
        shared = guard;
    }

    let ExitCriteria::Uninitialized(c) = shared.criteria else {
        return LinkState::Failed;
    };
    if c.sync_rsp_received {
        LinkState::Initialized
    } else {
        LinkState::Failed
    }
}

/// INITIALIZED: exchange CONFIG messages in both directions.
///
/// The first SYNC CONFIG goes out immediately; later ones only on timeout.
fn initialized_action<L: LowerTransport>(inner: &LinkInner<L>) -> LinkState {
    inner.send_control(ControlFrame::SyncConfig);

    let mut shared = lock(&inner.shared);
    if let ExitCriteria::Initialized(c) = &mut shared.criteria {
        c.sync_config_sent = true;
    }

    let mut remaining = PACKET_RETRANSMISSIONS;
    while !shared.criteria.is_fulfilled() && remaining > 0 {
        let (guard, timeout) = wait_timeout(&inner.sync_cond, shared, NON_ACTIVE_STATE_TIMEOUT);
        shared = guard;

        if timeout.timed_out() {
            remaining -= 1;
            drop(shared);
            inner.send_control(ControlFrame::SyncConfig);
            shared = lock(&inner.shared);
        }
    }

    let ExitCriteria::Initialized(c) = shared.criteria else {
        return LinkState::Failed;
    };
    if c.sync_config_sent
        && c.sync_config_rsp_received
        && c.sync_config_received
        && c.sync_config_rsp_sent
    {
        LinkState::Active
    } else {
        LinkState::Failed
    }
}

/// ACTIVE: zero the sequence counters and carry traffic until something
/// forces a re-initialization.
fn active_action<L: LowerTransport>(inner: &LinkInner<L>) -> LinkState {
    inner.seq_num.store(0, Ordering::SeqCst);
    inner.ack_num.store(0, Ordering::SeqCst);
    inner.emit_status(LinkStatus::ConnectionActive);

    let mut shared = lock(&inner.shared);
    while !shared.criteria.is_fulfilled() {
        shared = wait(&inner.sync_cond, shared);
    }
    let ExitCriteria::Active(c) = shared.criteria else {
        return LinkState::Failed;
    };
    if c.sync_received || c.irrecoverable_sync_error {
        LinkState::Reset
    } else if c.close {
        LinkState::Start
    } else if c.io_resource_error {
        LinkState::Failed
    } else {
        LinkState::Failed
    }
}

/// FAILED and UNKNOWN have no outgoing transitions; the worker loop never
/// invokes this, it only completes the action table.
fn terminal_action<L: LowerTransport>(_inner: &LinkInner<L>) -> LinkState {
    LinkState::Failed
}
