use std::fmt;

use tracing::info;

/// Progress of a single update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Verifying,
    Downloading,
    VerifiedDownload,
    Installing,
    Exiting,
}

impl UpdatePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Verifying => "verifying",
            Self::Downloading => "downloading",
            Self::VerifiedDownload => "verified-download",
            Self::Installing => "installing",
            Self::Exiting => "exiting",
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Verifying),
            Self::Verifying => Some(Self::Downloading),
            Self::Downloading => Some(Self::VerifiedDownload),
            Self::VerifiedDownload => Some(Self::Installing),
            Self::Installing => Some(Self::Exiting),
            Self::Exiting => None,
        }
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Walks the phases in order and logs every transition.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: UpdatePhase,
    history: Vec<UpdatePhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            phase: UpdatePhase::Idle,
            history: vec![UpdatePhase::Idle],
        }
    }
}

impl PhaseTracker {
    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn history(&self) -> &[UpdatePhase] {
        &self.history
    }

    /// Moves to the next phase; a tracker already at `Exiting` stays there.
    pub fn advance(&mut self) -> UpdatePhase {
        if let Some(next) = self.phase.next() {
            self.enter(next);
        }
        self.phase
    }

    /// Returns to `Idle` after a failure.
    pub fn fail(&mut self, reason: &str) {
        info!(from = %self.phase, reason, "update aborted");
        self.enter(UpdatePhase::Idle);
    }

    fn enter(&mut self, next: UpdatePhase) {
        info!(from = %self.phase, to = %next, "update phase");
        self.phase = next;
        self.history.push(next);
    }
}
