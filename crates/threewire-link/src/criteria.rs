//! Per-state exit criteria.
//!
//! Each waiting state of the link machine terminates when a conjunction of
//! boolean conditions becomes true. One variant per state keeps illegal
//! state/criterion combinations unrepresentable; entering a state installs
//! a fresh record with all flags cleared.

use crate::machine::LinkState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StartCriteria {
    pub is_opened: bool,
    pub io_resource_error: bool,
    pub close: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResetCriteria {
    pub reset_sent: bool,
    pub io_resource_error: bool,
    pub close: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UninitializedCriteria {
    pub sync_sent: bool,
    pub sync_rsp_received: bool,
    pub io_resource_error: bool,
    pub close: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InitializedCriteria {
    pub sync_config_sent: bool,
    pub sync_config_rsp_received: bool,
    pub sync_config_received: bool,
    pub sync_config_rsp_sent: bool,
    pub io_resource_error: bool,
    pub close: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActiveCriteria {
    pub sync_received: bool,
    pub irrecoverable_sync_error: bool,
    pub io_resource_error: bool,
    pub close: bool,
}

/// The exit-criteria record of the state currently being waited on.
///
/// `None` covers the terminal and diagnostic states, which have nothing to
/// wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCriteria {
    Start(StartCriteria),
    Reset(ResetCriteria),
    Uninitialized(UninitializedCriteria),
    Initialized(InitializedCriteria),
    Active(ActiveCriteria),
    None,
}

impl ExitCriteria {
    /// A fresh record for the given state, all flags cleared.
    pub fn for_state(state: LinkState) -> Self {
        match state {
            LinkState::Start => ExitCriteria::Start(StartCriteria::default()),
            LinkState::Reset => ExitCriteria::Reset(ResetCriteria::default()),
            LinkState::Uninitialized => {
                ExitCriteria::Uninitialized(UninitializedCriteria::default())
            }
            LinkState::Initialized => ExitCriteria::Initialized(InitializedCriteria::default()),
            LinkState::Active => ExitCriteria::Active(ActiveCriteria::default()),
            LinkState::Failed | LinkState::Unknown => ExitCriteria::None,
        }
    }

    /// Whether the current state may stop waiting.
    pub fn is_fulfilled(&self) -> bool {
        match self {
            ExitCriteria::Start(c) => c.io_resource_error || c.close || c.is_opened,
            ExitCriteria::Reset(c) => c.io_resource_error || c.close || c.reset_sent,
            ExitCriteria::Uninitialized(c) => {
                c.io_resource_error || c.close || (c.sync_sent && c.sync_rsp_received)
            }
            ExitCriteria::Initialized(c) => {
                c.io_resource_error
                    || c.close
                    || (c.sync_config_sent
                        && c.sync_config_rsp_received
                        && c.sync_config_received
                        && c.sync_config_rsp_sent)
            }
            ExitCriteria::Active(c) => {
                c.io_resource_error || c.close || c.sync_received || c.irrecoverable_sync_error
            }
            ExitCriteria::None => true,
        }
    }

    /// Mark the I/O-resource failure on whatever state is current.
    pub fn set_io_resource_error(&mut self) {
        match self {
            ExitCriteria::Start(c) => c.io_resource_error = true,
            ExitCriteria::Reset(c) => c.io_resource_error = true,
            ExitCriteria::Uninitialized(c) => c.io_resource_error = true,
            ExitCriteria::Initialized(c) => c.io_resource_error = true,
            ExitCriteria::Active(c) => c.io_resource_error = true,
            ExitCriteria::None => {}
        }
    }

    /// Mark the close request on whatever state is current.
    pub fn set_close(&mut self) {
        match self {
            ExitCriteria::Start(c) => c.close = true,
            ExitCriteria::Reset(c) => c.close = true,
            ExitCriteria::Uninitialized(c) => c.close = true,
            ExitCriteria::Initialized(c) => c.close = true,
            ExitCriteria::Active(c) => c.close = true,
            ExitCriteria::None => {}
        }
    }
}
