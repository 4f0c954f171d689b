//! Configuration types for the shot timing core.
//!
//! These are the runtime configuration structs used by `ShotController`.
//! They are separate from the TOML-deserialized config in `shot_config`.

/// Timeline and display timing.
#[derive(Debug, Clone)]
pub struct TimingCfg {
    /// Period of the display-refresh timer (ms). Also drives settling checks
    /// when the scale goes quiet.
    pub display_refresh_ms: u64,
    /// Weight samples held while waiting for the first telemetry sample.
    pub pre_epoch_capacity: usize,
    /// How far past the last telemetry sample a weight sample may be stamped (ms).
    pub max_extrapolation_ms: u64,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            display_refresh_ms: 50,
            pre_epoch_capacity: 32,
            max_extrapolation_ms: 1_000,
        }
    }
}

/// Weight/flow fusion: spike rejection, noise floor, flow windows.
#[derive(Debug, Clone)]
pub struct FusionCfg {
    /// Implied rate above which a sample is treated as a glitch (g/s).
    pub spike_ceiling_gps: f32,
    /// Spike check only applies when the gap to the last accepted sample exceeds this (ms).
    pub spike_min_dt_ms: u64,
    /// Readings below this are pre-drip noise until the first real reading (g).
    pub noise_floor_g: f32,
    /// A rejected reading confirmed by the next sample within this band is a real step (g).
    pub step_confirm_g: f32,
    /// Long flow window (ms).
    pub flow_window_ms: u64,
    /// Short flow window used by the stop predictor (ms).
    pub flow_short_window_ms: u64,
}

impl Default for FusionCfg {
    fn default() -> Self {
        Self {
            spike_ceiling_gps: 10.0,
            spike_min_dt_ms: 50,
            noise_floor_g: 0.1,
            step_confirm_g: 1.0,
            flow_window_ms: 1_000,
            flow_short_window_ms: 500,
        }
    }
}

/// Tare handshake.
#[derive(Debug, Clone)]
pub struct TareCfg {
    /// Time to wait for the scale to confirm a tare before forcing completion (ms).
    pub timeout_ms: u64,
}

impl Default for TareCfg {
    fn default() -> Self {
        Self { timeout_ms: 2_000 }
    }
}

/// Stop-at-weight predictor.
#[derive(Debug, Clone)]
pub struct PredictorCfg {
    /// Seconds of flow assumed still in flight when no learning history applies.
    pub lag_coefficient_s: f32,
    /// Flow used for the lag estimate is capped here (g/s).
    pub max_flow_gps: f32,
    /// Below this short-window flow the predictor does not decide (g/s).
    pub min_flow_gps: f32,
    /// Early-extraction window in which heavy readings are distrusted (ms).
    pub early_guard_ms: u64,
    /// Readings above this during the early window are ignored (g).
    pub early_guard_max_g: f32,
}

impl Default for PredictorCfg {
    fn default() -> Self {
        Self {
            lag_coefficient_s: 1.5,
            max_flow_gps: 12.0,
            min_flow_gps: 0.5,
            early_guard_ms: 3_000,
            early_guard_max_g: 50.0,
        }
    }
}

/// Post-stop settling detection.
#[derive(Debug, Clone)]
pub struct SettlingCfg {
    /// Maximum rolling-average drift still considered stable (g).
    pub drift_g: f32,
    /// How long the average must stay stable (ms).
    pub stable_ms: u64,
    /// Per-sample change that counts as movement for the stillness path (g).
    pub still_delta_g: f32,
    /// Upper bound on time spent settling (ms).
    pub watchdog_ms: u64,
    /// Drop from current or peak weight that means the cup was lifted (g).
    pub cup_removal_drop_g: f32,
    /// The settled average may not sit further than this below the stop weight (g).
    pub below_stop_tolerance_g: f32,
}

impl Default for SettlingCfg {
    fn default() -> Self {
        Self {
            drift_g: 0.3,
            stable_ms: 1_000,
            still_delta_g: 0.1,
            watchdog_ms: 10_000,
            cup_removal_drop_g: 20.0,
            below_stop_tolerance_g: 0.5,
        }
    }
}

/// Limits a settled measurement must satisfy before it is offered for learning.
#[derive(Debug, Clone)]
pub struct LearningCfg {
    /// Flow at stop below this makes the drip/flow ratio meaningless (g/s).
    pub min_flow_at_stop_gps: f32,
    /// Larger |overshoot| is treated as a scale glitch (g).
    pub max_abs_overshoot_g: f32,
    /// Larger drip is treated as a scale glitch (g).
    pub max_drip_g: f32,
    /// Peak minus final weight above this means the cup was lifted (g).
    pub max_peak_drop_g: f32,
}

impl Default for LearningCfg {
    fn default() -> Self {
        Self {
            min_flow_at_stop_gps: 0.5,
            max_abs_overshoot_g: 20.0,
            max_drip_g: 20.0,
            max_peak_drop_g: 20.0,
        }
    }
}

/// Frame transition attribution.
#[derive(Debug, Clone)]
pub struct AttributionCfg {
    /// Fraction of nominal duration after which an armed exit loses to the clock.
    pub time_ratio: f64,
}

impl Default for AttributionCfg {
    fn default() -> Self {
        Self { time_ratio: 0.9 }
    }
}
