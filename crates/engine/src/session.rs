use beatline_domain::{SessionPhase, SessionTransition};
use tracing::info;

/// Preparing / Playing / End gate around the per-tick update.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    previous: Option<SessionPhase>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Preparing,
            previous: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn previous(&self) -> Option<SessionPhase> {
        self.previous
    }

    pub fn is_preparing(&self) -> bool {
        self.phase == SessionPhase::Preparing
    }

    pub fn is_playing(&self) -> bool {
        self.phase == SessionPhase::Playing
    }

    pub fn is_ended(&self) -> bool {
        self.phase == SessionPhase::End
    }

    /// Moves to `to`; re-entering the current phase is a no-op.
    pub fn transition(&mut self, to: SessionPhase, clock: f64) -> Option<SessionTransition> {
        if self.phase == to {
            return None;
        }
        let from = self.phase;
        self.previous = Some(from);
        self.phase = to;
        info!(?from, ?to, clock, "session transition");
        Some(SessionTransition { from, to, clock })
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
