use std::fmt;

/// Lifecycle of a capture session as seen by callers.
///
/// `Idle -> Starting -> Active -> Stopping -> Idle`; any state may move to
/// `Error` on an unrecoverable failure, and only `reset` leaves `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Per-frame position of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SchedulerState {
    #[default]
    Idle,
    WaitingForFrame,
    Inferring,
    Compositing,
}
