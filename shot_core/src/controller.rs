//! `ShotController`: the single owner of all per-shot state.
//!
//! Every input (telemetry, weight, tare confirmation, timers, operator
//! actions) is a handler that runs to completion and publishes its results
//! through the `SampleRouter`. Nothing here blocks or performs I/O.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use shot_traits::clock::Clock;

use crate::attribution::FrameAttributor;
use crate::config::{LearningCfg, SettlingCfg, TareCfg, TimingCfg};
use crate::error::{BuildError, Result};
use crate::fusion::{FusedWeight, FusionOutcome, WeightFusion};
use crate::learning::{self, LearningHistory, SettledMeasurement};
use crate::predictor::{StopDecision, StopPredictor};
use crate::profile::Profile;
use crate::router::{AbandonReason, BoxedSink, Degradation, SampleRouter, ShotEvent};
use crate::settling::{SettledVia, SettlingDetector, SettlingOutcome};
use crate::tare::{TareMachine, TareState, TareVia};
use crate::timeline::{ClockReconciler, ShotTime, WeightStamp};
use crate::timer::{ShotGeneration, TimerKind, TimerQueue, TimerToken};
use crate::types::{SensorReading, TelemetrySample, WeightSample};
use crate::util::period_ms;

/// Accepted target weights; 0 disables stop-at-weight.
pub(crate) const TARGET_RANGE_G: std::ops::RangeInclusive<f32> = 0.1..=5000.0;

pub(crate) fn check_target(target_g: f32) -> Result<()> {
    if target_g == 0.0 || TARGET_RANGE_G.contains(&target_g) {
        Ok(())
    } else {
        Err(eyre::Report::new(BuildError::TargetOutOfRange(target_g)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShotPhase {
    /// No shot started yet.
    #[default]
    Idle,
    Active,
    /// `end_shot` called; settling may still be running.
    Ended,
}

/// Read-only view of the controller for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotSnapshot {
    pub generation: u64,
    pub phase: ShotPhase,
    pub shot_time: ShotTime,
    pub tare: TareState,
    pub weight_g: Option<f32>,
    pub flow_gps: Option<f32>,
    pub target_g: f32,
    pub stop_latched: bool,
    pub settling: bool,
    pub frame: Option<u32>,
    pub clock_degraded: bool,
    pub weight_exit_frames: Vec<u32>,
}

pub struct ShotController {
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    timing: TimingCfg,
    tare_cfg: TareCfg,
    settling_cfg: SettlingCfg,
    learning_cfg: LearningCfg,
    attributor: FrameAttributor,
    profile: Profile,
    target_g: f32,
    history: LearningHistory,

    generation: ShotGeneration,
    phase: ShotPhase,
    timeline: ClockReconciler,
    pre_epoch: VecDeque<(ShotTime, FusedWeight)>,
    fusion: WeightFusion,
    tare: TareMachine,
    predictor: StopPredictor,
    stop: Option<StopDecision>,
    settling: Option<SettlingDetector>,
    weight_exit_frames: BTreeSet<u32>,
    current_frame: Option<u32>,
    frame_started_at: ShotTime,
    last_reading: Option<SensorReading>,
    extraction_started_ms: Option<u64>,
    last_weight: Option<FusedWeight>,
    scale_connected: bool,
    ready_sent: bool,
    timers: TimerQueue,
    router: SampleRouter,
}

impl core::fmt::Debug for ShotController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShotController")
            .field("generation", &self.generation)
            .field("phase", &self.phase)
            .field("target_g", &self.target_g)
            .field("tare", &self.tare.state())
            .field("stop_latched", &self.predictor.is_latched())
            .field("settling", &self.settling.is_some())
            .finish()
    }
}

/// Everything the builder validated.
pub(crate) struct Parts {
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub timing: TimingCfg,
    pub fusion: crate::config::FusionCfg,
    pub tare: TareCfg,
    pub predictor: crate::config::PredictorCfg,
    pub settling: SettlingCfg,
    pub learning: LearningCfg,
    pub attribution: crate::config::AttributionCfg,
    pub profile: Profile,
    pub target_g: f32,
    pub history: LearningHistory,
    pub sinks: Vec<BoxedSink>,
}

impl ShotController {
    pub(crate) fn from_parts(p: Parts) -> Self {
        let epoch = p.clock.now();
        let mut router = SampleRouter::new();
        for sink in p.sinks {
            router.add_sink(sink);
        }
        Self {
            clock: p.clock,
            epoch,
            timeline: ClockReconciler::new(p.timing.max_extrapolation_ms),
            pre_epoch: VecDeque::with_capacity(p.timing.pre_epoch_capacity),
            timing: p.timing,
            tare_cfg: p.tare,
            settling_cfg: p.settling,
            learning_cfg: p.learning,
            attributor: FrameAttributor::new(p.attribution),
            profile: p.profile,
            target_g: p.target_g,
            history: p.history,
            generation: ShotGeneration::default(),
            phase: ShotPhase::Idle,
            fusion: WeightFusion::new(p.fusion),
            tare: TareMachine::new(),
            predictor: StopPredictor::new(p.predictor),
            stop: None,
            settling: None,
            weight_exit_frames: BTreeSet::new(),
            current_frame: None,
            frame_started_at: 0.0,
            last_reading: None,
            extraction_started_ms: None,
            last_weight: None,
            scale_connected: true,
            ready_sent: false,
            timers: TimerQueue::new(),
            router,
        }
    }

    #[inline]
    fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub fn add_sink(&mut self, sink: BoxedSink) {
        self.router.add_sink(sink);
    }

    pub fn phase(&self) -> ShotPhase {
        self.phase
    }

    pub fn generation(&self) -> ShotGeneration {
        self.generation
    }

    pub fn target_weight(&self) -> f32 {
        self.target_g
    }

    /// Change the stop target. Takes effect on the next weight sample; a stop
    /// already latched this shot is not re-armed.
    pub fn set_target_weight(&mut self, target_g: f32) -> Result<()> {
        check_target(target_g)?;
        tracing::debug!(target_g, "target weight set");
        self.target_g = target_g;
        Ok(())
    }

    pub fn set_profile(&mut self, profile: Profile) {
        tracing::debug!(frames = profile.frames.len(), "profile set");
        self.profile = profile;
    }

    pub fn snapshot(&self) -> ShotSnapshot {
        ShotSnapshot {
            generation: self.generation.0,
            phase: self.phase,
            shot_time: self.timeline.last_time(),
            tare: self.tare.state(),
            weight_g: self.last_weight.map(|w| w.weight_g),
            flow_gps: self.last_weight.map(|w| w.flow_gps),
            target_g: self.target_g,
            stop_latched: self.predictor.is_latched(),
            settling: self.settling.is_some(),
            frame: self.current_frame,
            clock_degraded: self.timeline.is_degraded(),
            weight_exit_frames: self.weight_exit_frames.iter().copied().collect(),
        }
    }

    // ── Shot lifecycle ───────────────────────────────────────────────────────

    /// Begin a new shot: clears every latch, timer and window, then requests a tare.
    ///
    /// An unfinished previous shot is ended first; if it is still settling,
    /// settling is abandoned and that shot is reported ready.
    pub fn start_shot(&mut self) {
        if self.phase == ShotPhase::Active {
            self.end_shot();
        }
        if self.settling.is_some() {
            self.abandon_settling(AbandonReason::NewShot);
        }

        let now = self.now_ms();
        self.generation = self.generation.next();
        self.timers.clear();
        self.timeline.start_shot(now);
        self.router.reset_timeline();
        self.pre_epoch.clear();
        self.fusion.reset();
        self.tare.reset();
        self.predictor.reset();
        self.stop = None;
        self.settling = None;
        self.weight_exit_frames.clear();
        self.current_frame = None;
        self.frame_started_at = 0.0;
        self.last_reading = None;
        self.extraction_started_ms = None;
        self.last_weight = None;
        self.ready_sent = false;
        self.phase = ShotPhase::Active;

        tracing::info!(generation = self.generation.0, target_g = self.target_g, "shot started");
        self.timers.schedule(
            TimerKind::DisplayRefresh,
            self.generation,
            now + period_ms(self.timing.display_refresh_ms),
        );
        self.tare();
    }

    /// Finish the shot. Reports it ready unless a weight-triggered stop is still settling.
    pub fn end_shot(&mut self) {
        if self.phase != ShotPhase::Active {
            tracing::debug!(phase = ?self.phase, "end_shot ignored");
            return;
        }
        self.phase = ShotPhase::Ended;
        self.timers.cancel_kind(TimerKind::TareTimeout);
        tracing::info!(
            generation = self.generation.0,
            shot_time = self.timeline.last_time(),
            stop_latched = self.predictor.is_latched(),
            "shot ended"
        );
        if self.settling.is_some() {
            tracing::debug!("waiting for settling before reporting shot ready");
        } else {
            self.timers.cancel_kind(TimerKind::DisplayRefresh);
            self.report_ready();
        }
    }

    // ── Tare ─────────────────────────────────────────────────────────────────

    /// Ask the scale to tare. Only honoured once per shot.
    pub fn tare(&mut self) {
        if self.phase != ShotPhase::Active {
            tracing::debug!("tare outside an active shot ignored");
            return;
        }
        let now = self.now_ms();
        if self.tare.request(now) {
            self.fusion.reset();
            self.router.publish(ShotEvent::TareRequested);
            self.timers.cancel_kind(TimerKind::TareTimeout);
            self.timers.schedule(
                TimerKind::TareTimeout,
                self.generation,
                now + self.tare_cfg.timeout_ms,
            );
        }
    }

    pub fn on_tare_confirmed(&mut self) {
        if let Some(via) = self.tare.confirm() {
            self.tare_completed(via);
        }
    }

    fn tare_timed_out(&mut self) {
        if let Some(via) = self.tare.timeout() {
            tracing::warn!(timeout_ms = self.tare_cfg.timeout_ms, "tare not confirmed; assuming complete");
            self.tare_completed(via);
            self.router.publish(ShotEvent::Degraded(Degradation::TareTimeout));
        }
    }

    fn tare_completed(&mut self, via: TareVia) {
        self.timers.cancel_kind(TimerKind::TareTimeout);
        self.fusion.reset();
        tracing::debug!(via = via.as_str(), "tare complete");
        self.router.publish(ShotEvent::TareCompleted { via });
    }

    // ── Scale connection ─────────────────────────────────────────────────────

    pub fn on_scale_connection(&mut self, connected: bool) {
        if self.scale_connected == connected {
            return;
        }
        self.scale_connected = connected;
        if connected {
            tracing::info!("scale connected");
        } else {
            tracing::warn!("scale disconnected");
            self.abandon_settling(AbandonReason::ScaleDisconnected);
        }
    }

    // ── Telemetry ────────────────────────────────────────────────────────────

    pub fn on_telemetry(&mut self, sample: &TelemetrySample) {
        let active = self.phase == ShotPhase::Active;
        if !active && self.settling.is_none() {
            return;
        }
        let now = self.now_ms();
        let Some(stamp) = self.timeline.stamp_telemetry(sample.timer_s, now) else {
            return;
        };
        if stamp.first_restart {
            self.router
                .publish(ShotEvent::Degraded(Degradation::ClockDiscontinuity));
        }
        if stamp.epoch_established {
            self.extraction_started_ms = Some(now);
            self.frame_started_at = stamp.time;
            tracing::info!(device_timer_s = sample.timer_s, "extraction started");
            self.flush_pre_epoch();
        }

        self.router.publish(ShotEvent::Telemetry {
            time: stamp.time,
            pressure: sample.pressure_bar,
            flow: sample.flow_mlps,
            temperature: sample.head_temp_c,
            pressure_goal: sample.pressure_goal,
            flow_goal: sample.flow_goal,
            temp_goal: sample.temp_goal,
            frame: sample.frame,
            is_flow_mode: sample.is_flow_mode,
        });

        if active {
            self.track_frame(sample.frame, stamp.time);
        }
        self.last_reading = Some(SensorReading::from(sample));
    }

    fn track_frame(&mut self, frame: u32, time: ShotTime) {
        match self.current_frame {
            None => {
                self.current_frame = Some(frame);
                self.frame_started_at = time;
            }
            Some(prev) if prev != frame => {
                let reason = self.attributor.attribute(
                    self.profile.frame(prev),
                    self.weight_exit_frames.contains(&prev),
                    self.last_reading,
                    time - self.frame_started_at,
                );
                tracing::info!(from = prev, to = frame, reason = %reason, "frame transition");
                self.router.publish(ShotEvent::FrameTransition {
                    time,
                    from: prev,
                    to: frame,
                    reason,
                });
                self.current_frame = Some(frame);
                self.frame_started_at = time;
            }
            Some(_) => {}
        }
    }

    fn flush_pre_epoch(&mut self) {
        let pending = std::mem::take(&mut self.pre_epoch);
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "re-anchoring pre-epoch weights");
        }
        for (provisional, fused) in pending {
            let time = self.timeline.reanchor(provisional);
            self.last_weight = Some(fused);
            self.router.publish(ShotEvent::Weight {
                time,
                weight: fused.weight_g,
                flow_rate: fused.flow_gps,
            });
        }
    }

    // ── Weight ───────────────────────────────────────────────────────────────

    pub fn on_weight(&mut self, sample: WeightSample) {
        if self.phase == ShotPhase::Idle
            || (self.phase == ShotPhase::Ended && self.settling.is_none())
        {
            return;
        }
        let now = self.now_ms();
        let (first, second) = match self.fusion.on_weight(sample, now) {
            FusionOutcome::Accepted(f) => (f, None),
            FusionOutcome::Seeded { zero, first } => (zero, Some(first)),
            FusionOutcome::NoiseIgnored | FusionOutcome::SpikeRejected { .. } => return,
        };
        for fused in std::iter::once(first).chain(second) {
            match self.timeline.stamp_weight(now) {
                None => return,
                Some(WeightStamp::Provisional(t)) => {
                    if self.pre_epoch.len() >= self.timing.pre_epoch_capacity.max(1) {
                        self.pre_epoch.pop_front();
                        tracing::debug!("pre-epoch buffer full; dropped oldest weight");
                    }
                    self.pre_epoch.push_back((t, fused));
                }
                Some(WeightStamp::Anchored(t)) => self.handle_fused(t, fused, now),
            }
        }
    }

    fn handle_fused(&mut self, time: ShotTime, fused: FusedWeight, now_ms: u64) {
        let settling = self
            .settling
            .as_mut()
            .map(|d| d.on_weight(fused.weight_g, now_ms));
        if let Some(SettlingOutcome::CupRemoved { .. }) = settling {
            self.abandon_settling(AbandonReason::CupRemoved);
            return;
        }

        self.last_weight = Some(fused);
        self.router.publish(ShotEvent::Weight {
            time,
            weight: fused.weight_g,
            flow_rate: fused.flow_gps,
        });

        if let Some(SettlingOutcome::Settled { final_weight_g, via }) = settling {
            self.finish_settling(final_weight_g, via);
            return;
        }

        if self.phase != ShotPhase::Active || !self.tare.is_complete() {
            return;
        }
        let Some(started) = self.extraction_started_ms else {
            return;
        };
        let elapsed = now_ms.saturating_sub(started);
        if let Some(decision) = self
            .predictor
            .evaluate(self.target_g, &fused, elapsed, &self.history)
        {
            self.on_stop(time, decision, now_ms);
        }
        self.check_frame_weight(fused.weight_g, elapsed);
    }

    fn on_stop(&mut self, time: ShotTime, d: StopDecision, now_ms: u64) {
        self.stop = Some(d);
        self.router.publish(ShotEvent::StopAtWeightReached {
            time,
            weight: d.weight_at_stop_g,
            flow_rate: d.flow_at_stop_gps,
            target: d.target_g,
        });
        self.settling = Some(SettlingDetector::start(
            self.settling_cfg.clone(),
            d.weight_at_stop_g,
            now_ms,
        ));
        self.fusion.set_step_confirmation(true);
        self.timers.cancel_kind(TimerKind::SettlingWatchdog);
        self.timers.schedule(
            TimerKind::SettlingWatchdog,
            self.generation,
            now_ms + self.settling_cfg.watchdog_ms,
        );
    }

    fn check_frame_weight(&mut self, weight_g: f32, extraction_elapsed_ms: u64) {
        let Some(frame) = self.current_frame else {
            return;
        };
        if self.predictor.early_guard_blocks(weight_g, extraction_elapsed_ms) {
            return;
        }
        let Some(exit_g) = self.profile.frame(frame).and_then(|f| f.exit_weight_g) else {
            return;
        };
        if exit_g > 0.0 && weight_g >= exit_g && self.weight_exit_frames.insert(frame) {
            tracing::info!(frame, weight_g, exit_g, "frame weight exit reached");
            self.router.publish(ShotEvent::PerFrameWeightReached { frame });
        }
    }

    // ── Settling ─────────────────────────────────────────────────────────────

    fn finish_settling(&mut self, final_weight_g: f32, via: SettledVia) {
        let Some(detector) = self.settling.take() else {
            return;
        };
        self.fusion.set_step_confirmation(false);
        self.timers.cancel_kind(TimerKind::SettlingWatchdog);
        self.router.publish(ShotEvent::Settled {
            time: self.timeline.last_time(),
            weight: final_weight_g,
            via,
        });

        if let Some(stop) = self.stop {
            let m = SettledMeasurement {
                final_weight_g,
                weight_at_stop_g: stop.weight_at_stop_g,
                target_g: stop.target_g,
                flow_at_stop_gps: stop.flow_at_stop_gps,
                peak_weight_g: detector.peak(),
                scale_connected: self.scale_connected,
            };
            match learning::evaluate(&m, &self.learning_cfg) {
                Ok(record) => {
                    tracing::info!(
                        drip_g = record.drip_g,
                        flow_gps = record.flow_at_stop_gps,
                        overshoot_g = record.overshoot_g,
                        "learning record ready"
                    );
                    self.router.publish(ShotEvent::SawLearningComplete(record));
                }
                Err(why) => {
                    tracing::warn!(reason = %why, "learning skipped");
                    self.router
                        .publish(ShotEvent::Degraded(Degradation::LearningSkipped(why)));
                }
            }
        }

        if self.phase == ShotPhase::Ended {
            self.timers.cancel_kind(TimerKind::DisplayRefresh);
            self.report_ready();
        }
    }

    fn abandon_settling(&mut self, reason: AbandonReason) {
        if self.settling.take().is_none() {
            return;
        }
        self.fusion.set_step_confirmation(false);
        self.timers.cancel_kind(TimerKind::SettlingWatchdog);
        tracing::warn!(reason = reason.as_str(), "settling abandoned; no learning record");
        self.router
            .publish(ShotEvent::Degraded(Degradation::SettlingAbandoned(reason)));
        if self.phase == ShotPhase::Ended {
            self.timers.cancel_kind(TimerKind::DisplayRefresh);
            self.report_ready();
        }
    }

    fn report_ready(&mut self) {
        if self.ready_sent {
            return;
        }
        self.ready_sent = true;
        tracing::debug!(generation = self.generation.0, "shot processing ready");
        self.router.publish(ShotEvent::ShotProcessingReady);
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    /// Earliest pending timer deadline, in controller milliseconds.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Milliseconds since the controller was built, on its own clock.
    pub fn elapsed_ms(&self) -> u64 {
        self.now_ms()
    }

    /// Fire every timer that is due. Returns how many fired.
    pub fn poll_timers(&mut self) -> usize {
        let now = self.now_ms();
        let mut fired = 0;
        while let Some((_, token)) = self.timers.pop_due(now) {
            self.on_timer(token);
            fired += 1;
        }
        fired
    }

    /// Handle one timer. Tokens from an earlier shot are ignored.
    pub fn on_timer(&mut self, token: TimerToken) {
        if token.generation != self.generation {
            tracing::trace!(kind = ?token.kind, "stale timer ignored");
            return;
        }
        let now = self.now_ms();
        match token.kind {
            TimerKind::TareTimeout => self.tare_timed_out(),
            TimerKind::SettlingWatchdog => {
                if let Some(SettlingOutcome::Settled { final_weight_g, via }) =
                    self.settling.as_ref().map(SettlingDetector::expire)
                {
                    self.finish_settling(final_weight_g, via);
                }
            }
            TimerKind::DisplayRefresh => {
                if let Some(SettlingOutcome::Settled { final_weight_g, via }) =
                    self.settling.as_mut().map(|d| d.on_tick(now))
                {
                    self.finish_settling(final_weight_g, via);
                }
                if self.phase == ShotPhase::Active || self.settling.is_some() {
                    self.timers.schedule(
                        TimerKind::DisplayRefresh,
                        self.generation,
                        now + period_ms(self.timing.display_refresh_ms),
                    );
                }
            }
        }
    }
}
