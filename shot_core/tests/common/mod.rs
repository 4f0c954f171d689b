#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use shot_core::mocks::RecordingSink;
use shot_core::{ShotController, ShotControllerBuilder, ShotEvent, TelemetrySample, WeightSample};
use shot_traits::ManualClock;

/// Device timer value of the first telemetry sample in these tests.
pub const DEVICE_EPOCH_S: f64 = 120.0;

/// A controller on a manual clock with every published event recorded.
pub struct Harness {
    pub clock: ManualClock,
    pub sink: RecordingSink,
    pub ctl: ShotController,
}

impl Harness {
    pub fn new(builder: ShotControllerBuilder) -> Self {
        let clock = ManualClock::new();
        let sink = RecordingSink::new();
        let ctl = builder
            .with_clock(Arc::new(clock.clone()))
            .with_sink(Box::new(sink.clone()))
            .build()
            .expect("valid controller");
        Self { clock, sink, ctl }
    }

    pub fn with_target(target_g: f32) -> Self {
        Self::new(ShotController::builder().with_target_grams(target_g))
    }

    pub fn now(&self) -> u64 {
        self.ctl.elapsed_ms()
    }

    /// Move to controller time `target_ms`, firing due timers at their deadlines.
    pub fn advance_to(&mut self, target_ms: u64) {
        while let Some(due) = self.ctl.next_deadline() {
            if due > target_ms {
                break;
            }
            let step = due.saturating_sub(self.now());
            self.clock.advance(Duration::from_millis(step));
            self.ctl.poll_timers();
        }
        let step = target_ms.saturating_sub(self.now());
        self.clock.advance(Duration::from_millis(step));
    }

    pub fn advance(&mut self, ms: u64) {
        let target = self.now() + ms;
        self.advance_to(target);
    }

    pub fn telemetry(&mut self, timer_s: f64, frame: u32, pressure_bar: f32, flow_mlps: f32) {
        let s = TelemetrySample {
            timer_s,
            pressure_bar,
            flow_mlps,
            head_temp_c: 93.0,
            mix_temp_c: 92.0,
            frame,
            ..TelemetrySample::default()
        };
        self.ctl.on_telemetry(&s);
    }

    pub fn weight(&mut self, weight_g: f32) {
        self.ctl.on_weight(WeightSample::new(weight_g));
    }

    pub fn weight_flow(&mut self, weight_g: f32, flow_gps: f32) {
        self.ctl
            .on_weight(WeightSample::with_flow(weight_g, flow_gps, flow_gps));
    }

    pub fn events(&self) -> Vec<ShotEvent> {
        self.sink.events()
    }

    pub fn count(&self, pred: impl Fn(&ShotEvent) -> bool) -> usize {
        self.sink.events().iter().filter(|e| pred(e)).count()
    }

    /// Start a shot and confirm the tare straight away.
    pub fn start_tared(&mut self) {
        self.ctl.start_shot();
        self.advance(50);
        self.ctl.on_tare_confirmed();
    }

    /// Drive a shot in 100 ms ticks from the current time until `until_ms`.
    ///
    /// Telemetry goes out every 200 ms starting at `DEVICE_EPOCH_S`, the first
    /// sample 50 ms after the call. `weight_at(shot_s)` yields the scale
    /// reading (sent with a 2 g/s scale flow) or `None` for a silent scale.
    /// Returns the controller time of the first telemetry sample.
    pub fn brew(
        &mut self,
        until_ms: u64,
        frame_at: impl Fn(f64) -> u32,
        weight_at: impl Fn(f64) -> Option<f32>,
    ) -> u64 {
        let start = self.now() + 50;
        let mut t = start;
        while t <= until_ms {
            self.advance_to(t);
            let shot_s = (t - start) as f64 / 1000.0;
            if (t - start) % 200 == 0 {
                self.telemetry(DEVICE_EPOCH_S + shot_s, frame_at(shot_s), 9.0, 2.0);
            }
            if let Some(w) = weight_at(shot_s) {
                self.weight_flow(w, 2.0);
            }
            t += 100;
        }
        start
    }
}

/// Zero until 7 s, then 2 g/s: 34 g at 24 s.
pub fn ramp_2gps(shot_s: f64) -> f32 {
    if shot_s < 7.0 {
        0.0
    } else {
        (2.0 * (shot_s - 7.0)) as f32
    }
}

pub fn is_stop(e: &ShotEvent) -> bool {
    matches!(e, ShotEvent::StopAtWeightReached { .. })
}

pub fn is_ready(e: &ShotEvent) -> bool {
    matches!(e, ShotEvent::ShotProcessingReady)
}

pub fn is_learning(e: &ShotEvent) -> bool {
    matches!(e, ShotEvent::SawLearningComplete(_))
}
