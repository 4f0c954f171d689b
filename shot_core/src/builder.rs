//! Builder for `ShotController`.
//!
//! Every setter is optional; `build()` fills in defaults and validates the
//! runtime configuration before anything is constructed.

use std::sync::Arc;

use shot_traits::clock::{Clock, MonotonicClock};

use crate::config::*;
use crate::controller::{Parts, ShotController, check_target};
use crate::error::{BuildError, Result};
use crate::learning::LearningHistory;
use crate::profile::Profile;
use crate::router::BoxedSink;

impl ShotController {
    /// Start building a controller.
    pub fn builder() -> ShotControllerBuilder {
        ShotControllerBuilder::default()
    }
}

#[derive(Default)]
pub struct ShotControllerBuilder {
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    timing: Option<TimingCfg>,
    fusion: Option<FusionCfg>,
    tare: Option<TareCfg>,
    predictor: Option<PredictorCfg>,
    settling: Option<SettlingCfg>,
    learning: Option<LearningCfg>,
    attribution: Option<AttributionCfg>,
    profile: Option<Profile>,
    target_g: Option<f32>,
    history: Option<LearningHistory>,
    sinks: Vec<BoxedSink>,
}

impl core::fmt::Debug for ShotControllerBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShotControllerBuilder")
            .field("target_g", &self.target_g)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f32) -> bool {
    v.is_finite() && v >= 0.0
}

impl ShotControllerBuilder {
    /// Use a custom clock (tests and trace replay use `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_timing(mut self, cfg: TimingCfg) -> Self {
        self.timing = Some(cfg);
        self
    }

    pub fn with_fusion(mut self, cfg: FusionCfg) -> Self {
        self.fusion = Some(cfg);
        self
    }

    pub fn with_tare(mut self, cfg: TareCfg) -> Self {
        self.tare = Some(cfg);
        self
    }

    pub fn with_predictor(mut self, cfg: PredictorCfg) -> Self {
        self.predictor = Some(cfg);
        self
    }

    pub fn with_settling(mut self, cfg: SettlingCfg) -> Self {
        self.settling = Some(cfg);
        self
    }

    pub fn with_learning(mut self, cfg: LearningCfg) -> Self {
        self.learning = Some(cfg);
        self
    }

    pub fn with_attribution(mut self, cfg: AttributionCfg) -> Self {
        self.attribution = Some(cfg);
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Stop target in grams; 0 disables stop-at-weight.
    pub fn with_target_grams(mut self, grams: f32) -> Self {
        self.target_g = Some(grams);
        self
    }

    pub fn with_learning_history(mut self, history: LearningHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_sink(mut self, sink: BoxedSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<ShotController> {
        let timing = self.timing.unwrap_or_default();
        let fusion = self.fusion.unwrap_or_default();
        let tare = self.tare.unwrap_or_default();
        let predictor = self.predictor.unwrap_or_default();
        let settling = self.settling.unwrap_or_default();
        let learning = self.learning.unwrap_or_default();
        let attribution = self.attribution.unwrap_or_default();
        let target_g = self.target_g.unwrap_or(0.0);

        check_target(target_g)?;
        if timing.display_refresh_ms == 0 {
            return Err(invalid("display_refresh_ms must be >= 1"));
        }
        if timing.pre_epoch_capacity == 0 {
            return Err(invalid("pre_epoch_capacity must be >= 1"));
        }
        if !positive(fusion.spike_ceiling_gps) {
            return Err(invalid("spike_ceiling_gps must be > 0"));
        }
        if !non_negative(fusion.noise_floor_g) {
            return Err(invalid("noise_floor_g must be >= 0"));
        }
        if !non_negative(fusion.step_confirm_g) {
            return Err(invalid("step_confirm_g must be >= 0"));
        }
        if fusion.flow_window_ms == 0 || fusion.flow_short_window_ms == 0 {
            return Err(invalid("flow windows must be >= 1 ms"));
        }
        if fusion.flow_short_window_ms > fusion.flow_window_ms {
            return Err(invalid("flow_short_window_ms must be <= flow_window_ms"));
        }
        if tare.timeout_ms == 0 {
            return Err(invalid("tare timeout_ms must be >= 1"));
        }
        if !non_negative(predictor.lag_coefficient_s) {
            return Err(invalid("lag_coefficient_s must be >= 0"));
        }
        if !positive(predictor.max_flow_gps) {
            return Err(invalid("max_flow_gps must be > 0"));
        }
        if !non_negative(predictor.min_flow_gps) || predictor.min_flow_gps > predictor.max_flow_gps {
            return Err(invalid("min_flow_gps must be in 0..=max_flow_gps"));
        }
        if !positive(settling.drift_g) {
            return Err(invalid("settling drift_g must be > 0"));
        }
        if settling.stable_ms == 0 {
            return Err(invalid("settling stable_ms must be >= 1"));
        }
        if settling.watchdog_ms < settling.stable_ms {
            return Err(invalid("settling watchdog_ms must be >= stable_ms"));
        }
        if !positive(settling.cup_removal_drop_g) {
            return Err(invalid("cup_removal_drop_g must be > 0"));
        }
        if !non_negative(settling.still_delta_g) || !non_negative(settling.below_stop_tolerance_g) {
            return Err(invalid("settling tolerances must be >= 0"));
        }
        if !positive(learning.max_drip_g)
            || !positive(learning.max_abs_overshoot_g)
            || !positive(learning.max_peak_drop_g)
        {
            return Err(invalid("learning limits must be > 0"));
        }
        if !(attribution.time_ratio > 0.0 && attribution.time_ratio <= 1.0) {
            return Err(invalid("time_ratio must be in (0, 1]"));
        }

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(c) => c,
            None => Arc::new(MonotonicClock::new()),
        };

        Ok(ShotController::from_parts(Parts {
            clock,
            timing,
            fusion,
            tare,
            predictor,
            settling,
            learning,
            attribution,
            profile: self.profile.unwrap_or_default(),
            target_g,
            history: self.history.unwrap_or_default(),
            sinks: self.sinks,
        }))
    }
}
