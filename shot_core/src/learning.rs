//! Stop-at-weight learning: validating settled shots and predicting drip.
//!
//! The core never stores history. `LearningHistory` is a read-only snapshot
//! supplied at build time; each validated shot is emitted as a
//! `SawLearningRecord` for an external store to append.

use thiserror::Error;

use crate::config::LearningCfg;

/// Drip prediction bounds (g).
const MIN_EXPECTED_DRIP_G: f32 = 0.5;
const MAX_EXPECTED_DRIP_G: f32 = 20.0;
/// 2 * sigma^2 for a flow similarity sigma of 1.5 g/s.
const FLOW_SIMILARITY_DENOM: f64 = 4.5;
const RECENCY_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SawLearningRecord {
    pub drip_g: f32,
    pub flow_at_stop_gps: f32,
    pub overshoot_g: f32,
}

/// Everything known about a shot once its weight has settled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettledMeasurement {
    pub final_weight_g: f32,
    pub weight_at_stop_g: f32,
    pub target_g: f32,
    pub flow_at_stop_gps: f32,
    pub peak_weight_g: f32,
    pub scale_connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LearningRejected {
    #[error("scale disconnected")]
    ScaleDisconnected,
    #[error("flow at stop too low: {0:.2} g/s")]
    LowFlow(f32),
    #[error("negative final weight: {0:.1} g")]
    NegativeFinal(f32),
    #[error("weight dropped {drop_g:.1} g from its peak (cup removed?)")]
    CupRemoved { drop_g: f32 },
    #[error("overshoot out of range: {0:.1} g")]
    Overshoot(f32),
    #[error("drip out of range: {0:.1} g")]
    Drip(f32),
}

/// Turn a settled measurement into a learning record, or explain why not.
pub fn evaluate(
    m: &SettledMeasurement,
    cfg: &LearningCfg,
) -> Result<SawLearningRecord, LearningRejected> {
    if !m.scale_connected {
        return Err(LearningRejected::ScaleDisconnected);
    }
    if m.flow_at_stop_gps < cfg.min_flow_at_stop_gps {
        return Err(LearningRejected::LowFlow(m.flow_at_stop_gps));
    }
    if m.final_weight_g < 0.0 {
        return Err(LearningRejected::NegativeFinal(m.final_weight_g));
    }
    let drop_g = m.peak_weight_g - m.final_weight_g;
    if drop_g > cfg.max_peak_drop_g {
        return Err(LearningRejected::CupRemoved { drop_g });
    }
    let overshoot_g = m.final_weight_g - m.target_g;
    if overshoot_g.abs() > cfg.max_abs_overshoot_g {
        return Err(LearningRejected::Overshoot(overshoot_g));
    }
    let mut drip_g = m.final_weight_g - m.weight_at_stop_g;
    if drip_g > cfg.max_drip_g {
        return Err(LearningRejected::Drip(drip_g));
    }
    if drip_g < 0.0 {
        tracing::warn!(
            drip_g,
            final_g = m.final_weight_g,
            at_stop_g = m.weight_at_stop_g,
            "settled below stop weight; drip clamped to 0"
        );
        drip_g = 0.0;
    }
    Ok(SawLearningRecord {
        drip_g,
        flow_at_stop_gps: m.flow_at_stop_gps,
        overshoot_g,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningEntry {
    pub drip_g: f32,
    pub flow_gps: f32,
}

/// Recent drip observations, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningHistory {
    entries: Vec<LearningEntry>,
    converged: bool,
}

impl LearningHistory {
    pub fn new(entries: Vec<LearningEntry>, converged: bool) -> Self {
        Self { entries, converged }
    }

    pub fn entries(&self) -> &[LearningEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// Drip expected after a stop at `flow_gps`.
    ///
    /// Weighted mean of recent drips: recency weight falls linearly from 10 to
    /// 1 (3 once converged) over the newest 8 entries (12 once converged),
    /// multiplied by a Gaussian flow similarity. Without usable history the
    /// estimate is `flow_gps * lag_coefficient_s`.
    pub fn expected_drip(&self, flow_gps: f32, lag_coefficient_s: f32) -> f32 {
        let fallback = flow_gps * lag_coefficient_s;
        if self.entries.is_empty() {
            return fallback;
        }
        let (max_entries, recency_min) = if self.converged {
            (12usize, 3.0)
        } else {
            (8usize, 1.0)
        };
        let count = self.entries.len().min(max_entries);
        let step = (RECENCY_MAX - recency_min) / (count.saturating_sub(1).max(1)) as f64;

        let mut weighted = 0.0f64;
        let mut total = 0.0f64;
        for (i, e) in self.entries.iter().take(count).enumerate() {
            let recency = RECENCY_MAX - i as f64 * step;
            let diff = f64::from(e.flow_gps - flow_gps);
            let similarity = (-(diff * diff) / FLOW_SIMILARITY_DENOM).exp();
            let w = recency * similarity;
            weighted += f64::from(e.drip_g) * w;
            total += w;
        }
        if total < 0.01 {
            return fallback;
        }
        ((weighted / total) as f32).clamp(MIN_EXPECTED_DRIP_G, MAX_EXPECTED_DRIP_G)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn measurement() -> SettledMeasurement {
        SettledMeasurement {
            final_weight_g: 36.4,
            weight_at_stop_g: 34.0,
            target_g: 36.0,
            flow_at_stop_gps: 2.0,
            peak_weight_g: 36.5,
            scale_connected: true,
        }
    }

    #[test]
    fn good_shot_produces_a_record() {
        let r = evaluate(&measurement(), &LearningCfg::default()).unwrap();
        assert!((r.drip_g - 2.4).abs() < 1e-4);
        assert!((r.overshoot_g - 0.4).abs() < 1e-4);
        assert_eq!(r.flow_at_stop_gps, 2.0);
    }

    #[rstest]
    #[case(SettledMeasurement { scale_connected: false, ..measurement() })]
    #[case(SettledMeasurement { flow_at_stop_gps: 0.3, ..measurement() })]
    #[case(SettledMeasurement { final_weight_g: -1.0, ..measurement() })]
    #[case(SettledMeasurement { peak_weight_g: 60.0, ..measurement() })]
    #[case(SettledMeasurement { target_g: 10.0, ..measurement() })]
    #[case(SettledMeasurement { weight_at_stop_g: 10.0, target_g: 30.0, ..measurement() })]
    fn implausible_shots_are_rejected(#[case] m: SettledMeasurement) {
        assert!(evaluate(&m, &LearningCfg::default()).is_err());
    }

    #[test]
    fn negative_drip_clamps_to_zero() {
        let m = SettledMeasurement {
            final_weight_g: 33.8,
            ..measurement()
        };
        let r = evaluate(&m, &LearningCfg::default()).unwrap();
        assert_eq!(r.drip_g, 0.0);
    }

    #[test]
    fn empty_history_uses_lag_coefficient() {
        let h = LearningHistory::default();
        assert!((h.expected_drip(2.0, 1.5) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn single_entry_at_same_flow_is_returned() {
        let h = LearningHistory::new(
            vec![LearningEntry {
                drip_g: 2.2,
                flow_gps: 2.0,
            }],
            false,
        );
        assert!((h.expected_drip(2.0, 1.5) - 2.2).abs() < 1e-5);
    }

    #[test]
    fn similar_flows_dominate() {
        let h = LearningHistory::new(
            vec![
                LearningEntry {
                    drip_g: 1.0,
                    flow_gps: 1.0,
                },
                LearningEntry {
                    drip_g: 6.0,
                    flow_gps: 8.0,
                },
            ],
            false,
        );
        let d = h.expected_drip(1.0, 1.5);
        assert!(d < 1.1, "{d}");
    }

    #[test]
    fn dissimilar_history_falls_back() {
        let h = LearningHistory::new(
            vec![LearningEntry {
                drip_g: 4.0,
                flow_gps: 12.0,
            }],
            false,
        );
        // exp(-100/4.5) * 10 is far below 0.01
        assert!((h.expected_drip(2.0, 1.5) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn result_is_clamped() {
        let h = LearningHistory::new(
            vec![LearningEntry {
                drip_g: 0.1,
                flow_gps: 2.0,
            }],
            true,
        );
        assert_eq!(h.expected_drip(2.0, 1.5), 0.5);
    }
}
