use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// The six orchestrator states, without their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Starting,
    StopRequestedWhileStarting,
    Running,
    Stopping,
    StartRequestedWhileStopping,
}

impl OrchestratorState {
    /// An engine start or stop call is outstanding.
    pub fn in_transition(self) -> bool {
        !matches!(self, OrchestratorState::Idle | OrchestratorState::Running)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Starting => "starting",
            OrchestratorState::StopRequestedWhileStarting => "stop_requested_while_starting",
            OrchestratorState::Running => "running",
            OrchestratorState::Stopping => "stopping",
            OrchestratorState::StartRequestedWhileStopping => "start_requested_while_stopping",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifecyclePhase {
    pub state: OrchestratorState,
    /// An engine is parked after a suspend and will be resumed by the next start.
    pub suspended: bool,
}

impl LifecyclePhase {
    pub fn is_idle(&self) -> bool {
        self.state == OrchestratorState::Idle
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.suspended {
            write!(f, "{} (suspended)", self.state)
        } else {
            write!(f, "{}", self.state)
        }
    }
}

pub fn validate_transition(from: OrchestratorState, to: OrchestratorState) -> Result<(), CoreError> {
    use OrchestratorState::{
        Idle, Running, StartRequestedWhileStopping, Starting, StopRequestedWhileStarting, Stopping,
    };

    let valid = matches!(
        (from, to),
        (Idle, Starting | Stopping)
            | (Starting, StopRequestedWhileStarting | Running | Idle)
            | (StopRequestedWhileStarting, Starting | Running | Idle)
            | (Running, Stopping)
            | (Stopping, StartRequestedWhileStopping | Idle)
            | (StartRequestedWhileStopping, Stopping | Idle)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
