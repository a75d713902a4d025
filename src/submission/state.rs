use std::fmt;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one generation.
///
/// `idle → sending → streaming → done`; `errored` and `cancelled` are
/// reachable from `sending` and `streaming`. Terminal phases never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Sending,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Sending => "sending",
            Phase::Streaming => "streaming",
            Phase::Done => "done",
            Phase::Errored => "errored",
            Phase::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Sending | Phase::Streaming)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Errored | Phase::Cancelled)
    }

    fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Sending)
                | (Phase::Sending, Phase::Streaming)
                | (Phase::Sending | Phase::Streaming, Phase::Done)
                | (Phase::Sending | Phase::Streaming, Phase::Errored)
                | (Phase::Sending | Phase::Streaming, Phase::Cancelled)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase plus cancellation token of one active generation.
#[derive(Debug)]
pub struct SubmissionState {
    phase: Mutex<Phase>,
    token: CancellationToken,
}

impl Default for SubmissionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
            token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&self, next: Phase) -> bool {
        let mut phase = self.phase.lock();
        if !phase.can_advance_to(next) {
            return false;
        }
        tracing::trace!(from = %*phase, to = %next, "submission phase");
        *phase = next;
        true
    }

    /// Mark the generation cancelled and trip the token in one step.
    ///
    /// Returns `false` when the generation was not active.
    pub fn cancel(&self) -> bool {
        let mut phase = self.phase.lock();
        if !phase.is_active() {
            return false;
        }
        *phase = Phase::Cancelled;
        self.token.cancel();
        true
    }
}
