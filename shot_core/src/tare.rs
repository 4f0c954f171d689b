//! Tare handshake. Forward-only within a shot: Idle -> Pending -> Complete.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TareState {
    #[default]
    Idle,
    Pending,
    Complete,
}

impl TareState {
    pub fn as_str(self) -> &'static str {
        match self {
            TareState::Idle => "idle",
            TareState::Pending => "pending",
            TareState::Complete => "complete",
        }
    }
}

impl fmt::Display for TareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a tare reached `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TareVia {
    Confirmed,
    TimedOut,
}

impl TareVia {
    pub fn as_str(self) -> &'static str {
        match self {
            TareVia::Confirmed => "confirmed",
            TareVia::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TareMachine {
    state: TareState,
    requested_at_ms: Option<u64>,
}

impl TareMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TareState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == TareState::Complete
    }

    pub fn requested_at_ms(&self) -> Option<u64> {
        self.requested_at_ms
    }

    /// Idle -> Pending. Returns false (and changes nothing) in any other state.
    pub fn request(&mut self, now_ms: u64) -> bool {
        if self.state != TareState::Idle {
            tracing::debug!(state = %self.state, "tare request ignored");
            return false;
        }
        self.state = TareState::Pending;
        self.requested_at_ms = Some(now_ms);
        true
    }

    /// Scale confirmed the tare.
    pub fn confirm(&mut self) -> Option<TareVia> {
        self.complete(TareVia::Confirmed)
    }

    /// Confirmation never arrived.
    pub fn timeout(&mut self) -> Option<TareVia> {
        self.complete(TareVia::TimedOut)
    }

    fn complete(&mut self, via: TareVia) -> Option<TareVia> {
        if self.state != TareState::Pending {
            return None;
        }
        self.state = TareState::Complete;
        Some(via)
    }

    /// Back to Idle; only called when a new shot starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
