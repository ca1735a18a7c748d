// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Backend spawned, readiness not (yet) confirmed.
    Starting,
    /// Last readiness check succeeded.
    Healthy,
    /// Current backend is being replaced.
    Restarting,
    /// Shutdown requested; children are being terminated.
    Stopping,
    /// All children exited.
    Stopped,
}

impl SupervisorState {
    pub fn is_shutting_down(self) -> bool {
        matches!(self, SupervisorState::Stopping | SupervisorState::Stopped)
    }

    pub(crate) fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Starting, Healthy)
                | (Starting, Restarting)
                | (Starting, Stopping)
                | (Healthy, Restarting)
                | (Healthy, Stopping)
                | (Restarting, Starting)
                | (Restarting, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Healthy => write!(f, "healthy"),
            SupervisorState::Restarting => write!(f, "restarting"),
            SupervisorState::Stopping => write!(f, "stopping"),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}
