//! Weight/flow fusion: glitch rejection, pre-drip noise floor and flow windows.
//!
//! Every reading implying more than `spike_ceiling_gps` is dropped. Only while
//! step confirmation is enabled (post-stop settling) does a second reading
//! next to a rejected one count as a real step, so a lifted cup is seen.
//!
//! Operates on local milliseconds (the same clock the reconciler stamps with);
//! the shared timeline is applied by the caller.

use std::collections::VecDeque;

use crate::config::FusionCfg;
use crate::types::WeightSample;
use crate::util::{lslr_slope_per_s, ms_to_s};

/// Minimum fraction of a flow window that must be covered by samples.
const MIN_WINDOW_COVERAGE: f64 = 0.8;

/// An accepted weight reading with both flow estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedWeight {
    pub weight_g: f32,
    /// Long-window flow (~1 s).
    pub flow_gps: f32,
    /// Short-window flow (~0.5 s), used by the stop predictor.
    pub flow_short_gps: f32,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionOutcome {
    Accepted(FusedWeight),
    /// First real reading: a synthetic zero point precedes it at the same instant.
    Seeded {
        zero: FusedWeight,
        first: FusedWeight,
    },
    /// Below the noise floor before any real reading.
    NoiseIgnored,
    SpikeRejected {
        rejected_g: f32,
        retained_g: f32,
    },
}

#[derive(Debug, Clone)]
pub struct WeightFusion {
    cfg: FusionCfg,
    history: VecDeque<(u64, f32)>,
    last: Option<FusedWeight>,
    seeded: bool,
    confirm_steps: bool,
    // Last rejected reading; a follow-up sample close to it is a real step.
    pending_step_g: Option<f32>,
}

impl WeightFusion {
    pub fn new(cfg: FusionCfg) -> Self {
        Self {
            cfg,
            history: VecDeque::with_capacity(32),
            last: None,
            seeded: false,
            confirm_steps: false,
            pending_step_g: None,
        }
    }

    /// Forget everything; the next real reading seeds a fresh curve.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last = None;
        self.seeded = false;
        self.confirm_steps = false;
        self.pending_step_g = None;
    }

    /// Allow a repeated out-of-band reading to be accepted as a step change.
    pub fn set_step_confirmation(&mut self, enabled: bool) {
        self.confirm_steps = enabled;
        if !enabled {
            self.pending_step_g = None;
        }
    }

    /// Last accepted reading.
    pub fn last(&self) -> Option<FusedWeight> {
        self.last
    }

    pub fn on_weight(&mut self, sample: WeightSample, now_ms: u64) -> FusionOutcome {
        let w = sample.weight_g;
        if !w.is_finite() {
            tracing::debug!(weight_g = w, "non-finite weight ignored");
            return FusionOutcome::NoiseIgnored;
        }

        if !self.seeded {
            if w < self.cfg.noise_floor_g {
                return FusionOutcome::NoiseIgnored;
            }
            self.seeded = true;
            self.history.push_back((now_ms, 0.0));
            let zero = FusedWeight {
                weight_g: 0.0,
                flow_gps: 0.0,
                flow_short_gps: 0.0,
                at_ms: now_ms,
            };
            let first = self.accept(sample, now_ms);
            return FusionOutcome::Seeded { zero, first };
        }

        if let Some(last) = self.last {
            let dt_ms = now_ms.saturating_sub(last.at_ms);
            if dt_ms > self.cfg.spike_min_dt_ms {
                let rate = (w - last.weight_g).abs() / ms_to_s(dt_ms) as f32;
                if rate > self.cfg.spike_ceiling_gps {
                    if self.confirm_steps
                        && let Some(prev) = self.pending_step_g
                        && (w - prev).abs() <= self.cfg.step_confirm_g
                    {
                        tracing::debug!(
                            from_g = last.weight_g,
                            to_g = w,
                            "step change confirmed; flow history restarted"
                        );
                        self.pending_step_g = None;
                        self.history.clear();
                        return FusionOutcome::Accepted(self.accept(sample, now_ms));
                    }
                    self.pending_step_g = Some(w);
                    tracing::debug!(
                        rejected_g = w,
                        retained_g = last.weight_g,
                        rate_gps = rate,
                        "weight spike rejected"
                    );
                    return FusionOutcome::SpikeRejected {
                        rejected_g: w,
                        retained_g: last.weight_g,
                    };
                }
            }
        }

        self.pending_step_g = None;
        FusionOutcome::Accepted(self.accept(sample, now_ms))
    }

    fn accept(&mut self, sample: WeightSample, now_ms: u64) -> FusedWeight {
        self.history.push_back((now_ms, sample.weight_g));
        let keep_ms = self.cfg.flow_window_ms.max(self.cfg.flow_short_window_ms);
        while let Some(&(t, _)) = self.history.front() {
            if now_ms.saturating_sub(t) > keep_ms {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let flow_gps = sample
            .flow_gps
            .filter(|f| f.is_finite())
            .unwrap_or_else(|| self.local_flow(now_ms, self.cfg.flow_window_ms));
        let flow_short_gps = sample
            .flow_short_gps
            .filter(|f| f.is_finite())
            .unwrap_or_else(|| self.local_flow(now_ms, self.cfg.flow_short_window_ms));

        let fused = FusedWeight {
            weight_g: sample.weight_g,
            flow_gps,
            flow_short_gps,
            at_ms: now_ms,
        };
        self.last = Some(fused);
        fused
    }

    /// Regression slope over the last `window_ms`, or 0 while the window is
    /// not sufficiently covered.
    fn local_flow(&self, now_ms: u64, window_ms: u64) -> f32 {
        let pts: Vec<(u64, f32)> = self
            .history
            .iter()
            .copied()
            .filter(|&(t, _)| now_ms.saturating_sub(t) <= window_ms)
            .collect();
        let Some(&(oldest, _)) = pts.first() else {
            return 0.0;
        };
        let covered = now_ms.saturating_sub(oldest) as f64;
        if covered < window_ms as f64 * MIN_WINDOW_COVERAGE {
            return 0.0;
        }
        lslr_slope_per_s(&pts).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fusion() -> WeightFusion {
        WeightFusion::new(FusionCfg::default())
    }

    fn accepted(o: FusionOutcome) -> FusedWeight {
        match o {
            FusionOutcome::Accepted(f) => f,
            FusionOutcome::Seeded { first, .. } => first,
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.05)]
    #[case(-0.3)]
    fn noise_before_first_reading_is_ignored(#[case] w: f32) {
        let mut f = fusion();
        assert_eq!(f.on_weight(WeightSample::new(w), 0), FusionOutcome::NoiseIgnored);
        assert!(f.last().is_none());
    }

    #[test]
    fn first_real_reading_is_seeded_with_zero() {
        let mut f = fusion();
        f.on_weight(WeightSample::new(0.02), 0);
        match f.on_weight(WeightSample::new(0.4), 100) {
            FusionOutcome::Seeded { zero, first } => {
                assert_eq!(zero.weight_g, 0.0);
                assert_eq!(zero.at_ms, 100);
                assert_eq!(first.weight_g, 0.4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn jump_of_twenty_grams_in_100ms_is_rejected() {
        let mut f = fusion();
        f.on_weight(WeightSample::new(10.0), 0);
        let out = f.on_weight(WeightSample::new(30.0), 100);
        assert_eq!(
            out,
            FusionOutcome::SpikeRejected {
                rejected_g: 30.0,
                retained_g: 10.0
            }
        );
        assert_eq!(f.last().map(|l| l.weight_g), Some(10.0));
    }

    #[test]
    fn isolated_glitch_then_normal_reading_is_accepted() {
        let mut f = fusion();
        f.on_weight(WeightSample::new(10.0), 0);
        f.on_weight(WeightSample::new(30.0), 100);
        let next = accepted(f.on_weight(WeightSample::new(10.2), 200));
        assert_eq!(next.weight_g, 10.2);
    }

    #[test]
    fn repeated_glitch_is_rejected_without_step_confirmation() {
        let mut f = fusion();
        f.on_weight(WeightSample::new(15.8), 0);
        for (w, at) in [(45.0, 100), (45.1, 200)] {
            assert!(matches!(
                f.on_weight(WeightSample::new(w), at),
                FusionOutcome::SpikeRejected { retained_g, .. } if retained_g == 15.8
            ));
        }
        let next = accepted(f.on_weight(WeightSample::new(16.4), 300));
        assert_eq!(next.weight_g, 16.4);
    }

    #[test]
    fn confirmed_step_is_accepted() {
        let mut f = fusion();
        f.set_step_confirmation(true);
        f.on_weight(WeightSample::new(36.0), 0);
        assert!(matches!(
            f.on_weight(WeightSample::new(-300.0), 100),
            FusionOutcome::SpikeRejected { .. }
        ));
        let step = accepted(f.on_weight(WeightSample::new(-300.2), 200));
        assert_eq!(step.weight_g, -300.2);
    }

    #[test]
    fn fast_changes_inside_min_dt_are_not_spike_checked() {
        let mut f = fusion();
        f.on_weight(WeightSample::new(10.0), 0);
        let w = accepted(f.on_weight(WeightSample::new(12.0), 40));
        assert_eq!(w.weight_g, 12.0);
    }

    #[test]
    fn local_flow_follows_a_steady_ramp() {
        let mut f = fusion();
        let mut last = None;
        for i in 0..=20u64 {
            let w = 1.0 + 2.0 * (i as f32) * 0.1;
            last = Some(accepted(f.on_weight(WeightSample::new(w), i * 100)));
        }
        let last = last.unwrap();
        assert!((last.flow_gps - 2.0).abs() < 0.01, "{}", last.flow_gps);
        assert!((last.flow_short_gps - 2.0).abs() < 0.01);
    }

    #[test]
    fn local_flow_is_zero_until_window_is_covered() {
        let mut f = fusion();
        let a = accepted(f.on_weight(WeightSample::new(1.0), 0));
        let b = accepted(f.on_weight(WeightSample::new(1.2), 100));
        assert_eq!(a.flow_gps, 0.0);
        assert_eq!(b.flow_gps, 0.0);
    }

    #[test]
    fn scale_supplied_flow_wins() {
        let mut f = fusion();
        let w = accepted(f.on_weight(WeightSample::with_flow(5.0, 1.7, 1.9), 0));
        assert_eq!(w.flow_gps, 1.7);
        assert_eq!(w.flow_short_gps, 1.9);
    }

    #[test]
    fn reset_requires_a_new_seed() {
        let mut f = fusion();
        f.on_weight(WeightSample::new(5.0), 0);
        f.reset();
        assert_eq!(f.on_weight(WeightSample::new(0.0), 100), FusionOutcome::NoiseIgnored);
        assert!(matches!(
            f.on_weight(WeightSample::new(0.3), 200),
            FusionOutcome::Seeded { .. }
        ));
    }
}
