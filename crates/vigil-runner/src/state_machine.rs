//! Pure state machine for run status
//!
//! No I/O and no async. A run moves `pending -> running -> {passed, failed,
//! error}` and never backwards; stores consult this before applying an
//! update so terminal fields are written exactly once.

use vigil_core::{RunStatus, VigilError};

/// Something that happened to a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// Run record created and execution under way
    Started,
    /// Every step passed
    Completed,
    /// A step (or session setup) failed
    Failed,
    /// Failure outside the step loop
    Errored,
}

impl RunEvent {
    /// The event that leads to `status`, if any
    pub fn for_target(status: RunStatus) -> Option<Self> {
        match status {
            RunStatus::Pending => None,
            RunStatus::Running => Some(Self::Started),
            RunStatus::Passed => Some(Self::Completed),
            RunStatus::Failed => Some(Self::Failed),
            RunStatus::Error => Some(Self::Errored),
        }
    }
}

/// Pure transition function.
///
/// Returns `None` for transitions the lifecycle does not allow. Never panics.
pub fn transition(state: RunStatus, event: RunEvent) -> Option<RunStatus> {
    match (state, event) {
        (RunStatus::Pending, RunEvent::Started) => Some(RunStatus::Running),
        // a run that never started can still be marked as errored
        (RunStatus::Pending, RunEvent::Errored) => Some(RunStatus::Error),
        (RunStatus::Running, RunEvent::Completed) => Some(RunStatus::Passed),
        (RunStatus::Running, RunEvent::Failed) => Some(RunStatus::Failed),
        (RunStatus::Running, RunEvent::Errored) => Some(RunStatus::Error),
        _ => None,
    }
}

/// Check that `from -> to` is a legal move
pub fn validate(from: RunStatus, to: RunStatus) -> vigil_core::Result<()> {
    RunEvent::for_target(to)
        .and_then(|event| transition(from, event))
        .filter(|next| *next == to)
        .map(|_| ())
        .ok_or_else(|| VigilError::InvalidTransition(format!("{} -> {}", from, to)))
}
