//! Stop-at-weight predictor.
//!
//! Fires once per shot when the weight plus the drip still expected to land
//! in the cup reaches the target.

use crate::config::PredictorCfg;
use crate::fusion::FusedWeight;
use crate::learning::LearningHistory;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopDecision {
    pub weight_at_stop_g: f32,
    pub flow_at_stop_gps: f32,
    pub target_g: f32,
    pub expected_drip_g: f32,
    pub threshold_g: f32,
}

#[derive(Debug, Clone)]
pub struct StopPredictor {
    cfg: PredictorCfg,
    latched: bool,
}

impl StopPredictor {
    pub fn new(cfg: PredictorCfg) -> Self {
        Self {
            cfg,
            latched: false,
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn reset(&mut self) {
        self.latched = false;
    }

    /// Heavy readings early in extraction come from an un-tared cup.
    pub fn early_guard_blocks(&self, weight_g: f32, extraction_elapsed_ms: u64) -> bool {
        extraction_elapsed_ms < self.cfg.early_guard_ms && weight_g > self.cfg.early_guard_max_g
    }

    /// Evaluate one fused reading. `target_g <= 0` disables the predictor.
    pub fn evaluate(
        &mut self,
        target_g: f32,
        fused: &FusedWeight,
        extraction_elapsed_ms: u64,
        history: &LearningHistory,
    ) -> Option<StopDecision> {
        if self.latched || target_g <= 0.0 {
            return None;
        }
        if self.early_guard_blocks(fused.weight_g, extraction_elapsed_ms) {
            tracing::debug!(
                weight_g = fused.weight_g,
                extraction_elapsed_ms,
                "early heavy reading ignored"
            );
            return None;
        }
        if fused.flow_short_gps < self.cfg.min_flow_gps {
            return None;
        }

        let flow = fused.flow_short_gps.min(self.cfg.max_flow_gps);
        let expected_drip_g = history.expected_drip(flow, self.cfg.lag_coefficient_s);
        let threshold_g = target_g - expected_drip_g;
        if fused.weight_g < threshold_g {
            return None;
        }

        self.latched = true;
        tracing::info!(
            weight_g = fused.weight_g,
            threshold_g,
            flow_gps = fused.flow_short_gps,
            expected_drip_g,
            target_g,
            "stop-at-weight fired"
        );
        Some(StopDecision {
            weight_at_stop_g: fused.weight_g,
            flow_at_stop_gps: fused.flow_short_gps,
            target_g,
            expected_drip_g,
            threshold_g,
        })
    }
}
