//! Cooperative timers for the single-threaded core.
//!
//! Timers are plain deadlines in local milliseconds. Each one carries the
//! shot generation it was scheduled for; the controller ignores any token
//! whose generation is not current, so a timer outliving its shot is a no-op.

/// Incremented by every `start_shot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShotGeneration(pub u64);

impl ShotGeneration {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    TareTimeout,
    SettlingWatchdog,
    DisplayRefresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub generation: ShotGeneration,
    seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    due_ms: u64,
    token: TimerToken,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: Vec<Entry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TimerKind, generation: ShotGeneration, due_ms: u64) -> TimerToken {
        let token = TimerToken {
            kind,
            generation,
            seq: self.next_seq,
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        self.entries.push(Entry { due_ms, token });
        token
    }

    /// Drop every pending timer of `kind`.
    pub fn cancel_kind(&mut self, kind: TimerKind) {
        self.entries.retain(|e| e.token.kind != kind);
    }

    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.entries.iter().any(|e| e.token.kind == kind)
    }

    /// Remove and return the earliest timer due at or before `now_ms`.
    /// Ties fire in scheduling order.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(u64, TimerToken)> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due_ms <= now_ms)
            .min_by_key(|(_, e)| (e.due_ms, e.token.seq))
            .map(|(i, _)| i)?;
        let e = self.entries.swap_remove(idx);
        Some((e.due_ms, e.token))
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.due_ms).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
