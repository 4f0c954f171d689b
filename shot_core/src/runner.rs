//! Driving a `ShotController`: a channel-fed event loop for live use and a
//! deterministic replay of recorded traces.

use std::time::Duration;

use crossbeam_channel as xch;
use eyre::WrapErr;
use shot_traits::clock::ManualClock;

use crate::controller::{ShotController, ShotPhase};
use crate::error::{Result, ShotError};
use crate::profile::Profile;
use crate::types::{TelemetrySample, WeightSample};

/// Everything the transports and the operator can feed into the core.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    StartShot,
    EndShot,
    Tare,
    TareConfirmed,
    Telemetry(TelemetrySample),
    Weight(WeightSample),
    ScaleConnection(bool),
    TargetWeight(f32),
    Profile(Profile),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// Apply one input to the controller.
pub fn dispatch(controller: &mut ShotController, event: InputEvent) -> Result<Flow> {
    match event {
        InputEvent::StartShot => controller.start_shot(),
        InputEvent::EndShot => controller.end_shot(),
        InputEvent::Tare => controller.tare(),
        InputEvent::TareConfirmed => controller.on_tare_confirmed(),
        InputEvent::Telemetry(s) => controller.on_telemetry(&s),
        InputEvent::Weight(s) => controller.on_weight(s),
        InputEvent::ScaleConnection(c) => controller.on_scale_connection(c),
        InputEvent::TargetWeight(g) => controller
            .set_target_weight(g)
            .wrap_err("rejected target weight")?,
        InputEvent::Profile(p) => controller.set_profile(p),
        InputEvent::Shutdown => return Ok(Flow::Shutdown),
    }
    Ok(Flow::Continue)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub events: u64,
    pub rejected: u64,
    pub timers_fired: u64,
}

/// Single-threaded loop: waits for the next input or the next timer deadline,
/// whichever comes first.
#[derive(Debug)]
pub struct EventLoop {
    rx: xch::Receiver<InputEvent>,
}

impl EventLoop {
    pub fn new(rx: xch::Receiver<InputEvent>) -> Self {
        Self { rx }
    }

    /// Run until `Shutdown` arrives or every sender is dropped.
    pub fn run(&self, controller: &mut ShotController) -> LoopStats {
        let mut stats = LoopStats::default();
        loop {
            stats.timers_fired += controller.poll_timers() as u64;
            let received = match controller.next_deadline() {
                Some(due) => {
                    let wait = due.saturating_sub(controller.elapsed_ms());
                    match self.rx.recv_timeout(Duration::from_millis(wait)) {
                        Ok(ev) => ev,
                        Err(xch::RecvTimeoutError::Timeout) => continue,
                        Err(xch::RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(ev) => ev,
                    Err(_) => break,
                },
            };
            stats.events += 1;
            match dispatch(controller, received) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Shutdown) => break,
                Err(e) => {
                    stats.rejected += 1;
                    tracing::warn!(error = %e, "input rejected");
                }
            }
        }
        tracing::debug!(events = stats.events, timers = stats.timers_fired, "event loop stopped");
        stats
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub events: u64,
    pub rejected: u64,
    pub timers_fired: u64,
    /// Controller time when replay finished (ms).
    pub end_ms: u64,
}

/// Move `clock` forward to `target_ms` (controller time), firing every timer
/// due on the way at its own deadline.
fn advance_to(controller: &mut ShotController, clock: &ManualClock, target_ms: u64) -> u64 {
    let mut fired = 0;
    while let Some(due) = controller.next_deadline()
        && due <= target_ms
    {
        let step = due.saturating_sub(controller.elapsed_ms());
        clock.advance(Duration::from_millis(step));
        fired += controller.poll_timers() as u64;
    }
    let step = target_ms.saturating_sub(controller.elapsed_ms());
    clock.advance(Duration::from_millis(step));
    fired
}

/// Replay a recorded trace of `(at_ms, input)` pairs.
///
/// `controller` must have been built with `clock`; `at_ms` is measured from
/// the moment the controller was built. Timers fire in deadline order between
/// inputs. After the last input, outstanding timers of a finished shot are
/// drained so settling can complete.
pub fn replay<I>(controller: &mut ShotController, clock: &ManualClock, trace: I) -> Result<ReplayStats>
where
    I: IntoIterator<Item = (u64, InputEvent)>,
{
    let mut stats = ReplayStats::default();
    let mut last_at = 0u64;
    for (at_ms, event) in trace {
        if at_ms < last_at {
            return Err(eyre::Report::new(ShotError::Replay(format!(
                "trace not in time order: {at_ms} ms after {last_at} ms"
            ))));
        }
        last_at = at_ms;
        stats.timers_fired += advance_to(controller, clock, at_ms);
        stats.events += 1;
        match dispatch(controller, event) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Shutdown) => break,
            Err(e) => {
                stats.rejected += 1;
                tracing::warn!(at_ms, error = %e, "trace input rejected");
            }
        }
    }

    while controller.phase() != ShotPhase::Active
        && let Some(due) = controller.next_deadline()
    {
        stats.timers_fired += advance_to(controller, clock, due);
    }
    stats.end_ms = controller.elapsed_ms();
    Ok(stats)
}
