#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and learning-history parsing for the shot controller.
//!
//! - `Config` and its sections are deserialized from TOML; every section is
//!   optional and falls back to the controller defaults.
//! - `validate()` names the offending key in its error.
//! - The learning-history CSV loader enforces exact headers.
use serde::Deserialize;

/// Learning history CSV schema, newest shot first.
///
/// Expected headers:
/// drip_g,flow_gps
///
/// Example:
/// drip_g,flow_gps
/// 2.4,2.1
/// 3.1,2.6
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct LearningRow {
    pub drip_g: f32,
    pub flow_gps: f32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Shot {
    /// Stop-at-weight target in grams; 0 disables it.
    pub target_g: f32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub display_refresh_ms: u64,
    /// Weight samples kept while waiting for the first telemetry sample.
    pub pre_epoch_capacity: usize,
    pub max_extrapolation_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            display_refresh_ms: 50,
            pre_epoch_capacity: 32,
            max_extrapolation_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Fusion {
    pub spike_ceiling_gps: f32,
    pub spike_min_dt_ms: u64,
    pub noise_floor_g: f32,
    pub step_confirm_g: f32,
    pub flow_window_ms: u64,
    pub flow_short_window_ms: u64,
}

impl Default for Fusion {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Tare {
    pub timeout_ms: u64,
}

impl Default for Tare {
    fn default() -> Self {
        Self { timeout_ms: 2_000 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Predictor {
    /// Seconds of flow assumed still in flight when no learning applies.
    pub lag_coefficient_s: f32,
    pub max_flow_gps: f32,
    pub min_flow_gps: f32,
    pub early_guard_ms: u64,
    pub early_guard_max_g: f32,
}

impl Default for Predictor {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settling {
    pub drift_g: f32,
    pub stable_ms: u64,
    pub still_delta_g: f32,
    pub watchdog_ms: u64,
    pub cup_removal_drop_g: f32,
    pub below_stop_tolerance_g: f32,
}

impl Default for Settling {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Learning {
    pub min_flow_at_stop_gps: f32,
    pub max_abs_overshoot_g: f32,
    pub max_drip_g: f32,
    pub max_peak_drop_g: f32,
    /// History has converged: longer memory, flatter recency weights.
    pub converged: bool,
    /// Optional learning history CSV (drip_g,flow_gps), newest first.
    pub history_csv: Option<String>,
}

impl Default for Learning {
    fn default() -> Self {
        Self {
            min_flow_at_stop_gps: 0.5,
            max_abs_overshoot_g: 20.0,
            max_drip_g: 20.0,
            max_peak_drop_g: 20.0,
            converged: false,
            history_csv: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Attribution {
    /// Fraction of nominal duration after which an armed exit is attributed to time.
    pub time_ratio: f64,
}

impl Default for Attribution {
    fn default() -> Self {
        Self { time_ratio: 0.9 }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub shot: Shot,
    pub timing: Timing,
    pub fusion: Fusion,
    pub tare: Tare,
    pub predictor: Predictor,
    pub settling: Settling,
    pub learning: Learning,
    pub attribution: Attribution,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn finite_ge0(v: f32) -> bool {
    v.is_finite() && v >= 0.0
}

fn finite_gt0(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Shot
        let t = self.shot.target_g;
        if !(t == 0.0 || (0.1..=5000.0).contains(&t)) {
            eyre::bail!("shot.target_g must be 0 (disabled) or in [0.1, 5000]");
        }

        // Timing
        if self.timing.display_refresh_ms == 0 {
            eyre::bail!("timing.display_refresh_ms must be >= 1");
        }
        if self.timing.display_refresh_ms > 1_000 {
            eyre::bail!("timing.display_refresh_ms must be <= 1000");
        }
        if self.timing.pre_epoch_capacity == 0 {
            eyre::bail!("timing.pre_epoch_capacity must be >= 1");
        }

        // Fusion
        if !finite_gt0(self.fusion.spike_ceiling_gps) {
            eyre::bail!("fusion.spike_ceiling_gps must be > 0");
        }
        if !finite_ge0(self.fusion.noise_floor_g) {
            eyre::bail!("fusion.noise_floor_g must be >= 0");
        }
        if !finite_ge0(self.fusion.step_confirm_g) {
            eyre::bail!("fusion.step_confirm_g must be >= 0");
        }
        if self.fusion.flow_window_ms == 0 || self.fusion.flow_short_window_ms == 0 {
            eyre::bail!("fusion.flow_window_ms and fusion.flow_short_window_ms must be >= 1");
        }
        if self.fusion.flow_short_window_ms > self.fusion.flow_window_ms {
            eyre::bail!("fusion.flow_short_window_ms must be <= fusion.flow_window_ms");
        }

        // Tare
        if self.tare.timeout_ms == 0 {
            eyre::bail!("tare.timeout_ms must be >= 1");
        }

        // Predictor
        if !finite_ge0(self.predictor.lag_coefficient_s) || self.predictor.lag_coefficient_s > 10.0 {
            eyre::bail!("predictor.lag_coefficient_s must be in [0, 10]");
        }
        if !finite_gt0(self.predictor.max_flow_gps) {
            eyre::bail!("predictor.max_flow_gps must be > 0");
        }
        if !finite_ge0(self.predictor.min_flow_gps)
            || self.predictor.min_flow_gps > self.predictor.max_flow_gps
        {
            eyre::bail!("predictor.min_flow_gps must be in [0, predictor.max_flow_gps]");
        }
        if !finite_ge0(self.predictor.early_guard_max_g) {
            eyre::bail!("predictor.early_guard_max_g must be >= 0");
        }

        // Settling
        if !finite_gt0(self.settling.drift_g) {
            eyre::bail!("settling.drift_g must be > 0");
        }
        if self.settling.stable_ms == 0 {
            eyre::bail!("settling.stable_ms must be >= 1");
        }
        if self.settling.watchdog_ms < self.settling.stable_ms {
            eyre::bail!("settling.watchdog_ms must be >= settling.stable_ms");
        }
        if self.settling.watchdog_ms > 5 * 60 * 1000 {
            eyre::bail!("settling.watchdog_ms is unreasonably large (>5min)");
        }
        if !finite_ge0(self.settling.still_delta_g) {
            eyre::bail!("settling.still_delta_g must be >= 0");
        }
        if !finite_gt0(self.settling.cup_removal_drop_g) {
            eyre::bail!("settling.cup_removal_drop_g must be > 0");
        }
        if !finite_ge0(self.settling.below_stop_tolerance_g) {
            eyre::bail!("settling.below_stop_tolerance_g must be >= 0");
        }

        // Learning
        if !finite_ge0(self.learning.min_flow_at_stop_gps) {
            eyre::bail!("learning.min_flow_at_stop_gps must be >= 0");
        }
        if !finite_gt0(self.learning.max_abs_overshoot_g) {
            eyre::bail!("learning.max_abs_overshoot_g must be > 0");
        }
        if !finite_gt0(self.learning.max_drip_g) {
            eyre::bail!("learning.max_drip_g must be > 0");
        }
        if !finite_gt0(self.learning.max_peak_drop_g) {
            eyre::bail!("learning.max_peak_drop_g must be > 0");
        }

        // Attribution
        let r = self.attribution.time_ratio;
        if !(r > 0.0 && r <= 1.0) {
            eyre::bail!("attribution.time_ratio must be in (0.0, 1.0]");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot.to_ascii_lowercase().as_str(), "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

pub fn load_learning_csv(path: &std::path::Path) -> eyre::Result<Vec<LearningRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open learning CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["drip_g", "flow_gps"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "learning CSV must have headers 'drip_g,flow_gps', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<LearningRow>().enumerate() {
        let row = match rec {
            Ok(row) => row,
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        };
        if !finite_ge0(row.drip_g) || !finite_ge0(row.flow_gps) {
            eyre::bail!(
                "invalid CSV row {}: drip_g and flow_gps must be finite and >= 0",
                idx + 2
            );
        }
        rows.push(row);
    }
    Ok(rows)
}
