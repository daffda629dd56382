use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a preview session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreviewState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
    Disposed,
}

impl PreviewState {
    /// `Disposed` is the only terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PreviewState::Disposed)
    }
}

impl fmt::Display for PreviewState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Token identifying one start attempt. Completions carrying an older
/// generation than the session's current one are discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic generation source shared by every session of one camera,
/// so a new session never reuses a generation a previous one handed out.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    last: AtomicU64,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self) -> Generation {
        Generation(self.last.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn last(&self) -> Generation {
        Generation(self.last.load(Ordering::Acquire))
    }
}

/// How a session reached `Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopOutcome {
    /// The engine acknowledged the stop
    Acknowledged,
    /// The engine never acknowledged; resources were released at the deadline
    TimedOut,
    /// The engine refused the stop request or had nothing to stop; released anyway
    Released,
    /// The session was never started
    NotStarted,
    /// The session had already been disposed
    AlreadyDisposed,
}
