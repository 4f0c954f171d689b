//! Clock reconciliation: one shot-relative timeline for two unsynchronized streams.
//!
//! The machine's telemetry timer is the reference. Its first value after
//! `start_shot` becomes the epoch, so the first telemetry sample sits at 0.
//! Scale samples carry no device time; they are placed relative to the last
//! telemetry sample using the local monotonic clock, or provisionally against
//! the shot start while no telemetry has arrived yet.
//!
//! Every stamp handed out is clamped to be >= the previous one, so the
//! published timeline never runs backwards even across a machine reconnect.

use crate::util::ms_to_s;

/// Seconds since the shot epoch.
pub type ShotTime = f64;

/// Result of stamping a telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryStamp {
    pub time: ShotTime,
    /// This sample defined the epoch.
    pub epoch_established: bool,
    /// The device timer went backwards on this sample.
    pub clock_restarted: bool,
    /// First restart seen this shot; accuracy is degraded from here on.
    pub first_restart: bool,
}

/// Result of stamping a weight sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightStamp {
    /// Placed on the shared timeline.
    Anchored(ShotTime),
    /// No epoch yet: seconds since `start_shot` by the local clock. Must be
    /// re-anchored before publication.
    Provisional(ShotTime),
}

#[derive(Debug, Clone)]
pub struct ClockReconciler {
    max_extrapolation_ms: u64,
    shot_start_ms: Option<u64>,
    epoch_s: Option<f64>,
    epoch_wall_ms: u64,
    last_raw_s: f64,
    // Added to (raw - epoch) once the device timer has restarted mid-shot.
    rebase_s: f64,
    last_time: ShotTime,
    last_telemetry_time: ShotTime,
    last_telemetry_wall_ms: u64,
    degraded: bool,
}

impl ClockReconciler {
    pub fn new(max_extrapolation_ms: u64) -> Self {
        Self {
            max_extrapolation_ms,
            shot_start_ms: None,
            epoch_s: None,
            epoch_wall_ms: 0,
            last_raw_s: 0.0,
            rebase_s: 0.0,
            last_time: 0.0,
            last_telemetry_time: 0.0,
            last_telemetry_wall_ms: 0,
            degraded: false,
        }
    }

    /// Arm a new shot. The epoch is taken from the next telemetry sample.
    pub fn start_shot(&mut self, now_ms: u64) {
        *self = Self::new(self.max_extrapolation_ms);
        self.shot_start_ms = Some(now_ms);
    }

    pub fn is_armed(&self) -> bool {
        self.shot_start_ms.is_some()
    }

    pub fn has_epoch(&self) -> bool {
        self.epoch_s.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Latest value handed out on the shared timeline.
    pub fn last_time(&self) -> ShotTime {
        self.last_time
    }

    /// Stamp a telemetry sample carrying the device timer `raw_s`.
    ///
    /// Returns `None` when no shot is armed.
    pub fn stamp_telemetry(&mut self, raw_s: f64, now_ms: u64) -> Option<TelemetryStamp> {
        self.shot_start_ms?;
        if !raw_s.is_finite() {
            tracing::warn!(raw_s, "non-finite device timer; holding timeline");
            return Some(TelemetryStamp {
                time: self.last_time,
                epoch_established: false,
                clock_restarted: false,
                first_restart: false,
            });
        }

        let (epoch, epoch_established) = match self.epoch_s {
            Some(e) => (e, false),
            None => {
                self.epoch_s = Some(raw_s);
                self.epoch_wall_ms = now_ms;
                self.last_raw_s = raw_s;
                tracing::debug!(epoch_s = raw_s, "shot epoch established");
                (raw_s, true)
            }
        };

        let mut clock_restarted = false;
        let mut first_restart = false;
        if !epoch_established && raw_s < self.last_raw_s {
            // Keep the epoch; continue from where the timeline already stands.
            self.rebase_s = self.last_time - (raw_s - epoch);
            clock_restarted = true;
            if !self.degraded {
                first_restart = true;
                tracing::warn!(
                    last_raw_s = self.last_raw_s,
                    raw_s,
                    held_at_s = self.last_time,
                    "device timer went backwards (reconnect?); timeline accuracy degraded"
                );
            }
            self.degraded = true;
        }
        self.last_raw_s = raw_s;

        let t = (raw_s - epoch + self.rebase_s).max(0.0).max(self.last_time);
        self.last_time = t;
        self.last_telemetry_time = t;
        self.last_telemetry_wall_ms = now_ms;
        Some(TelemetryStamp {
            time: t,
            epoch_established,
            clock_restarted,
            first_restart,
        })
    }

    /// Stamp a weight sample arriving at local time `now_ms`.
    ///
    /// Returns `None` when no shot is armed.
    pub fn stamp_weight(&mut self, now_ms: u64) -> Option<WeightStamp> {
        let start = self.shot_start_ms?;
        if self.epoch_s.is_none() {
            return Some(WeightStamp::Provisional(ms_to_s(
                now_ms.saturating_sub(start),
            )));
        }
        let ahead_ms = now_ms
            .saturating_sub(self.last_telemetry_wall_ms)
            .min(self.max_extrapolation_ms);
        let t = (self.last_telemetry_time + ms_to_s(ahead_ms)).max(self.last_time);
        self.last_time = t;
        Some(WeightStamp::Anchored(t))
    }

    /// Map a provisional stamp onto the timeline once the epoch is known.
    ///
    /// Pre-epoch samples are shifted by the local time that passed between
    /// `start_shot` and the epoch, and never land after the current timeline
    /// value.
    pub fn reanchor(&self, provisional: ShotTime) -> ShotTime {
        let Some(start) = self.shot_start_ms else {
            return 0.0;
        };
        let shift = ms_to_s(self.epoch_wall_ms.saturating_sub(start));
        (provisional - shift).max(0.0).min(self.last_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed() -> ClockReconciler {
        let mut c = ClockReconciler::new(1_000);
        c.start_shot(10_000);
        c
    }

    #[test]
    fn first_telemetry_defines_epoch_at_zero() {
        let mut c = armed();
        let s = c.stamp_telemetry(120.0, 10_100).unwrap();
        assert_eq!(s.time, 0.0);
        assert!(s.epoch_established);
        let s = c.stamp_telemetry(120.25, 10_350).unwrap();
        assert!((s.time - 0.25).abs() < 1e-9);
        assert!(!s.epoch_established);
    }

    #[test]
    fn unarmed_reconciler_stamps_nothing() {
        let mut c = ClockReconciler::new(1_000);
        assert!(c.stamp_telemetry(1.0, 0).is_none());
        assert!(c.stamp_weight(0).is_none());
    }

    #[test]
    fn restart_holds_then_advances_without_resetting_epoch() {
        let mut c = armed();
        c.stamp_telemetry(120.0, 10_000);
        c.stamp_telemetry(121.0, 11_000);
        let s = c.stamp_telemetry(0.5, 11_200).unwrap();
        assert!(s.clock_restarted && s.first_restart);
        assert!((s.time - 1.0).abs() < 1e-9);
        let s = c.stamp_telemetry(0.7, 11_400).unwrap();
        assert!((s.time - 1.2).abs() < 1e-9);
        assert!(!s.first_restart);
        assert!(c.is_degraded());
    }

    #[test]
    fn weight_before_epoch_is_provisional_and_reanchors_to_zero() {
        let mut c = armed();
        let w = c.stamp_weight(10_400).unwrap();
        assert_eq!(w, WeightStamp::Provisional(0.4));
        c.stamp_telemetry(50.0, 10_600);
        assert_eq!(c.reanchor(0.4), 0.0);
    }

    #[test]
    fn weight_after_epoch_extrapolates_but_is_capped() {
        let mut c = armed();
        c.stamp_telemetry(5.0, 10_000);
        c.stamp_telemetry(6.0, 11_000);
        match c.stamp_weight(11_100).unwrap() {
            WeightStamp::Anchored(t) => assert!((t - 1.1).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
        // Scale keeps talking while telemetry is silent: cap at +1 s.
        match c.stamp_weight(15_000).unwrap() {
            WeightStamp::Anchored(t) => assert!((t - 2.0).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
        // Telemetry that lags behind the extrapolated stamp is clamped.
        let s = c.stamp_telemetry(6.2, 15_050).unwrap();
        assert!((s.time - 2.0).abs() < 1e-9);
    }

    #[test]
    fn start_shot_resets_everything() {
        let mut c = armed();
        c.stamp_telemetry(5.0, 10_000);
        c.stamp_telemetry(9.0, 14_000);
        c.start_shot(20_000);
        assert!(!c.has_epoch());
        assert_eq!(c.last_time(), 0.0);
        let s = c.stamp_telemetry(3.0, 20_100).unwrap();
        assert_eq!(s.time, 0.0);
    }
}
