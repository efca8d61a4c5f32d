// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::Serialize;

/// Lifecycle of the supervised connection.
///
/// `Unstarted` means no connection is held. Every other state refers to the
/// single connection the supervisor currently owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Unstarted,
    Starting,
    Online,
    Offline,
    Closing,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Starting => "starting",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications delivered through [`super::LivenessSupervisor::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Transition { from: SupervisorState, to: SupervisorState, generation: u64 },
    /// A held connection was replaced by a newly built one.
    Rebuilt { generation: u64 },
    /// The push path tried to reopen the existing connection.
    Reopened { generation: u64, online: bool },
}

/// Point-in-time view of the supervisor, cheap to read without locking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub state: SupervisorState,
    pub generation: u64,
    pub rebuilds: u64,
    pub connection_id: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self { state: SupervisorState::Unstarted, generation: 0, rebuilds: 0, connection_id: None }
    }
}
