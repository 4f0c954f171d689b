//! Post-stop settling detection.
//!
//! After a weight-triggered stop the drip keeps landing for a few seconds.
//! The weight counts as settled when either:
//! - no sample moved it by `still_delta_g` or more for `stable_ms` (stillness), or
//! - the rolling average over the last six samples stayed within `drift_g` of
//!   its value at the start of a `stable_ms` span and is not below the stop
//!   weight. A pour that is still running moves the average out of band and
//!   restarts the span, whatever the sample rate.
//!
//! A sharp drop from the current or peak weight means the cup was lifted.

use crate::config::SettlingCfg;

pub const SETTLING_WINDOW_LEN: usize = 6;

/// Fixed ring of the most recent weights.
#[derive(Debug, Clone, Default)]
pub struct SettlingWindow {
    buf: [f32; SETTLING_WINDOW_LEN],
    len: usize,
    next: usize,
}

impl SettlingWindow {
    pub fn push(&mut self, weight_g: f32) {
        self.buf[self.next] = weight_g;
        self.next = (self.next + 1) % SETTLING_WINDOW_LEN;
        if self.len < SETTLING_WINDOW_LEN {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == SETTLING_WINDOW_LEN
    }

    pub fn average(&self) -> Option<f32> {
        if self.len == 0 {
            return None;
        }
        let sum: f32 = self.buf[..self.len].iter().sum();
        Some(sum / self.len as f32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettledVia {
    Stillness,
    RollingAverage,
    Watchdog,
}

impl SettledVia {
    pub fn as_str(self) -> &'static str {
        match self {
            SettledVia::Stillness => "stillness",
            SettledVia::RollingAverage => "rolling_average",
            SettledVia::Watchdog => "watchdog",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettlingOutcome {
    Pending,
    Settled { final_weight_g: f32, via: SettledVia },
    CupRemoved { weight_g: f32, peak_g: f32 },
}

#[derive(Debug, Clone)]
pub struct SettlingDetector {
    cfg: SettlingCfg,
    weight_at_stop_g: f32,
    current_g: f32,
    peak_g: f32,
    window: SettlingWindow,
    // (since_ms, average) at the start of the current stable span.
    avg_anchor: Option<(u64, f32)>,
    still_ref_g: f32,
    last_change_ms: u64,
}

impl SettlingDetector {
    /// Start settling from the stop.
    pub fn start(cfg: SettlingCfg, weight_at_stop_g: f32, now_ms: u64) -> Self {
        tracing::debug!(weight_at_stop_g, "settling started");
        Self {
            cfg,
            weight_at_stop_g,
            current_g: weight_at_stop_g,
            peak_g: weight_at_stop_g,
            window: SettlingWindow::default(),
            avg_anchor: None,
            still_ref_g: weight_at_stop_g,
            last_change_ms: now_ms,
        }
    }

    /// Latest accepted weight (the pre-removal weight once the cup was lifted).
    pub fn current(&self) -> f32 {
        self.current_g
    }

    pub fn peak(&self) -> f32 {
        self.peak_g
    }

    pub fn weight_at_stop(&self) -> f32 {
        self.weight_at_stop_g
    }

    pub fn on_weight(&mut self, weight_g: f32, now_ms: u64) -> SettlingOutcome {
        let drop = self.cfg.cup_removal_drop_g;
        let from_current = self.current_g > drop && weight_g < self.current_g - drop;
        let from_peak = self.peak_g > drop && weight_g < self.peak_g - drop;
        if from_current || from_peak {
            tracing::warn!(
                weight_g,
                current_g = self.current_g,
                peak_g = self.peak_g,
                "cup removed during settling"
            );
            return SettlingOutcome::CupRemoved {
                weight_g,
                peak_g: self.peak_g,
            };
        }

        self.current_g = weight_g;
        self.peak_g = self.peak_g.max(weight_g);
        self.window.push(weight_g);

        if (weight_g - self.still_ref_g).abs() >= self.cfg.still_delta_g {
            self.still_ref_g = weight_g;
            self.last_change_ms = now_ms;
        } else if now_ms.saturating_sub(self.last_change_ms) >= self.cfg.stable_ms {
            return self.settled(weight_g, SettledVia::Stillness);
        }

        if !self.window.is_full() {
            return SettlingOutcome::Pending;
        }
        let Some(avg) = self.window.average() else {
            return SettlingOutcome::Pending;
        };

        let below_stop = self.weight_at_stop_g > 0.0
            && avg < self.weight_at_stop_g - self.cfg.below_stop_tolerance_g;
        if below_stop {
            if self.avg_anchor.take().is_some() {
                tracing::debug!(avg, weight_at_stop_g = self.weight_at_stop_g, "average below stop weight");
            }
            return SettlingOutcome::Pending;
        }
        match self.avg_anchor {
            Some((since, anchor)) if (avg - anchor).abs() < self.cfg.drift_g => {
                if now_ms.saturating_sub(since) >= self.cfg.stable_ms {
                    return self.settled(avg, SettledVia::RollingAverage);
                }
            }
            _ => self.avg_anchor = Some((now_ms, avg)),
        }
        SettlingOutcome::Pending
    }

    /// Periodic check for a scale that went quiet.
    pub fn on_tick(&mut self, now_ms: u64) -> SettlingOutcome {
        if now_ms.saturating_sub(self.last_change_ms) >= self.cfg.stable_ms {
            return self.settled(self.current_g, SettledVia::Stillness);
        }
        if let Some((since, _)) = self.avg_anchor
            && now_ms.saturating_sub(since) >= self.cfg.stable_ms
            && let Some(avg) = self.window.average()
        {
            return self.settled(avg, SettledVia::RollingAverage);
        }
        SettlingOutcome::Pending
    }

    /// Watchdog expiry: settle on the latest accepted weight.
    pub fn expire(&self) -> SettlingOutcome {
        tracing::warn!(final_weight_g = self.current_g, "settling watchdog expired");
        SettlingOutcome::Settled {
            final_weight_g: self.current_g,
            via: SettledVia::Watchdog,
        }
    }

    fn settled(&self, final_weight_g: f32, via: SettledVia) -> SettlingOutcome {
        tracing::debug!(final_weight_g, via = via.as_str(), "weight settled");
        SettlingOutcome::Settled { final_weight_g, via }
    }
}
