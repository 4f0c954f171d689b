//! Published events and their fan-out to external observers.

use crossbeam_channel as xch;
use shot_traits::Sink;

use crate::attribution::FrameExitReason;
use crate::error::ShotError;
use crate::learning::{LearningRejected, SawLearningRecord};
use crate::settling::SettledVia;
use crate::tare::TareVia;
use crate::timeline::ShotTime;

/// Why settling ended without a learning record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    CupRemoved,
    ScaleDisconnected,
    NewShot,
}

impl AbandonReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AbandonReason::CupRemoved => "cup_removed",
            AbandonReason::ScaleDisconnected => "scale_disconnected",
            AbandonReason::NewShot => "new_shot",
        }
    }
}

/// Non-fatal conditions worth surfacing to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Degradation {
    /// Device timer restarted mid-shot; timestamps after this point are approximate.
    ClockDiscontinuity,
    /// Tare was forced complete without scale confirmation.
    TareTimeout,
    SettlingAbandoned(AbandonReason),
    /// Settled, but the measurement was not plausible enough to learn from.
    LearningSkipped(LearningRejected),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShotEvent {
    Telemetry {
        time: ShotTime,
        pressure: f32,
        flow: f32,
        temperature: f32,
        pressure_goal: f32,
        flow_goal: f32,
        temp_goal: f32,
        frame: u32,
        is_flow_mode: bool,
    },
    Weight {
        time: ShotTime,
        weight: f32,
        flow_rate: f32,
    },
    StopAtWeightReached {
        time: ShotTime,
        weight: f32,
        flow_rate: f32,
        target: f32,
    },
    PerFrameWeightReached {
        frame: u32,
    },
    FrameTransition {
        time: ShotTime,
        from: u32,
        to: u32,
        reason: FrameExitReason,
    },
    Settled {
        time: ShotTime,
        weight: f32,
        via: SettledVia,
    },
    SawLearningComplete(SawLearningRecord),
    ShotProcessingReady,
    TareRequested,
    TareCompleted {
        via: TareVia,
    },
    Degraded(Degradation),
}

impl ShotEvent {
    /// Timeline position for events that carry one.
    pub fn time(&self) -> Option<ShotTime> {
        match self {
            ShotEvent::Telemetry { time, .. }
            | ShotEvent::Weight { time, .. }
            | ShotEvent::StopAtWeightReached { time, .. }
            | ShotEvent::FrameTransition { time, .. }
            | ShotEvent::Settled { time, .. } => Some(*time),
            _ => None,
        }
    }

    /// Stable snake_case name, used for logging and JSON output.
    pub fn name(&self) -> &'static str {
        match self {
            ShotEvent::Telemetry { .. } => "telemetry",
            ShotEvent::Weight { .. } => "weight",
            ShotEvent::StopAtWeightReached { .. } => "stop_at_weight_reached",
            ShotEvent::PerFrameWeightReached { .. } => "per_frame_weight_reached",
            ShotEvent::FrameTransition { .. } => "frame_transition",
            ShotEvent::Settled { .. } => "settled",
            ShotEvent::SawLearningComplete(_) => "saw_learning_complete",
            ShotEvent::ShotProcessingReady => "shot_processing_ready",
            ShotEvent::TareRequested => "tare_requested",
            ShotEvent::TareCompleted { .. } => "tare_completed",
            ShotEvent::Degraded(_) => "degraded",
        }
    }
}

pub type BoxedSink = Box<dyn Sink<ShotEvent> + Send>;

/// Fans every event out to the registered sinks in order.
///
/// A sink that fails is logged and dropped; the remaining sinks keep
/// receiving events.
#[derive(Default)]
pub struct SampleRouter {
    sinks: Vec<BoxedSink>,
    last_time: ShotTime,
    published: u64,
}

impl std::fmt::Debug for SampleRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRouter")
            .field("sinks", &self.sinks.len())
            .field("last_time", &self.last_time)
            .field("published", &self.published)
            .finish()
    }
}

impl SampleRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: BoxedSink) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// New shot: the timeline restarts at 0.
    pub fn reset_timeline(&mut self) {
        self.last_time = 0.0;
    }

    pub fn publish(&mut self, event: ShotEvent) {
        if let Some(t) = event.time() {
            debug_assert!(
                t >= self.last_time,
                "published time went backwards: {t} < {}",
                self.last_time
            );
            self.last_time = self.last_time.max(t);
        }
        self.published += 1;
        tracing::trace!(event = event.name(), "publish");
        self.sinks.retain_mut(|sink| match sink.publish(&event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, event = event.name(), "sink failed; removing it");
                false
            }
        });
    }
}

/// Forwards events onto a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: xch::Sender<ShotEvent>,
}

impl ChannelSink {
    pub fn new(tx: xch::Sender<ShotEvent>) -> Self {
        Self { tx }
    }
}

impl Sink<ShotEvent> for ChannelSink {
    fn publish(&mut self, item: &ShotEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.tx
            .send(item.clone())
            .map_err(|e| Box::new(ShotError::Channel(e.to_string())) as _)
    }
}
