//! `From` implementations bridging `shot_config` types to `shot_core` types.

use crate::builder::ShotControllerBuilder;
use crate::config::{
    AttributionCfg, FusionCfg, LearningCfg, PredictorCfg, SettlingCfg, TareCfg, TimingCfg,
};
use crate::learning::{LearningEntry, LearningHistory};

// ── TimingCfg ────────────────────────────────────────────────────────────────

impl From<&shot_config::Timing> for TimingCfg {
    fn from(c: &shot_config::Timing) -> Self {
        Self {
            display_refresh_ms: c.display_refresh_ms,
            pre_epoch_capacity: c.pre_epoch_capacity,
            max_extrapolation_ms: c.max_extrapolation_ms,
        }
    }
}

// ── FusionCfg ────────────────────────────────────────────────────────────────

impl From<&shot_config::Fusion> for FusionCfg {
    fn from(c: &shot_config::Fusion) -> Self {
        Self {
            spike_ceiling_gps: c.spike_ceiling_gps,
            spike_min_dt_ms: c.spike_min_dt_ms,
            noise_floor_g: c.noise_floor_g,
            step_confirm_g: c.step_confirm_g,
            flow_window_ms: c.flow_window_ms,
            flow_short_window_ms: c.flow_short_window_ms,
        }
    }
}

// ── TareCfg ──────────────────────────────────────────────────────────────────

impl From<&shot_config::Tare> for TareCfg {
    fn from(c: &shot_config::Tare) -> Self {
        Self {
            timeout_ms: c.timeout_ms,
        }
    }
}

// ── PredictorCfg ─────────────────────────────────────────────────────────────

impl From<&shot_config::Predictor> for PredictorCfg {
    fn from(c: &shot_config::Predictor) -> Self {
        Self {
            lag_coefficient_s: c.lag_coefficient_s,
            max_flow_gps: c.max_flow_gps,
            min_flow_gps: c.min_flow_gps,
            early_guard_ms: c.early_guard_ms,
            early_guard_max_g: c.early_guard_max_g,
        }
    }
}

// ── SettlingCfg ──────────────────────────────────────────────────────────────

impl From<&shot_config::Settling> for SettlingCfg {
    fn from(c: &shot_config::Settling) -> Self {
        Self {
            drift_g: c.drift_g,
            stable_ms: c.stable_ms,
            still_delta_g: c.still_delta_g,
            watchdog_ms: c.watchdog_ms,
            cup_removal_drop_g: c.cup_removal_drop_g,
            below_stop_tolerance_g: c.below_stop_tolerance_g,
        }
    }
}

// ── LearningCfg ──────────────────────────────────────────────────────────────

impl From<&shot_config::Learning> for LearningCfg {
    fn from(c: &shot_config::Learning) -> Self {
        Self {
            min_flow_at_stop_gps: c.min_flow_at_stop_gps,
            max_abs_overshoot_g: c.max_abs_overshoot_g,
            max_drip_g: c.max_drip_g,
            max_peak_drop_g: c.max_peak_drop_g,
        }
    }
}

// ── AttributionCfg ───────────────────────────────────────────────────────────

impl From<&shot_config::Attribution> for AttributionCfg {
    fn from(c: &shot_config::Attribution) -> Self {
        Self {
            time_ratio: c.time_ratio,
        }
    }
}

// ── LearningHistory ──────────────────────────────────────────────────────────

impl From<&shot_config::LearningRow> for LearningEntry {
    fn from(r: &shot_config::LearningRow) -> Self {
        Self {
            drip_g: r.drip_g,
            flow_gps: r.flow_gps,
        }
    }
}

impl LearningHistory {
    /// History from CSV rows (newest first).
    pub fn from_rows(rows: &[shot_config::LearningRow], converged: bool) -> Self {
        Self::new(rows.iter().map(LearningEntry::from).collect(), converged)
    }
}

// ── Whole config ─────────────────────────────────────────────────────────────

impl From<&shot_config::Config> for ShotControllerBuilder {
    /// Builder carrying every section of `cfg`. Learning history, clock,
    /// profile and sinks are added by the caller.
    fn from(cfg: &shot_config::Config) -> Self {
        ShotControllerBuilder::default()
            .with_target_grams(cfg.shot.target_g)
            .with_timing((&cfg.timing).into())
            .with_fusion((&cfg.fusion).into())
            .with_tare((&cfg.tare).into())
            .with_predictor((&cfg.predictor).into())
            .with_settling((&cfg.settling).into())
            .with_learning((&cfg.learning).into())
            .with_attribution((&cfg.attribution).into())
    }
}
