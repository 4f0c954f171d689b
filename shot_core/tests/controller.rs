mod common;

use common::{DEVICE_EPOCH_S, Harness, is_learning, is_ready, is_stop, ramp_2gps};
use shot_core::timer::{ShotGeneration, TimerKind, TimerQueue};
use shot_core::{
    AbandonReason, Degradation, ExitKind, FrameExitReason, FrameSpec, Profile, SettledVia,
    SettlingCfg, ShotController, ShotEvent, ShotPhase, TareCfg, TareState, TareVia, TimingCfg,
};

fn until_cap(cap: f32) -> impl Fn(f64) -> Option<f32> {
    move |s| Some(ramp_2gps(s).min(cap))
}

fn stop_weight(h: &Harness) -> f32 {
    h.events()
        .iter()
        .find_map(|e| match e {
            ShotEvent::StopAtWeightReached { weight, .. } => Some(*weight),
            _ => None,
        })
        .expect("stop fired")
}

#[test]
fn stop_fires_once_below_target_and_learns_drip() {
    let mut h = Harness::with_target(36.0);
    h.start_tared();
    h.brew(26_000, |_| 1, until_cap(35.0));

    assert_eq!(h.count(is_stop), 1);
    let at_stop = stop_weight(&h);
    assert!(at_stop <= 36.0);
    assert!((at_stop - 33.0).abs() < 0.05, "fired at {at_stop}");

    let settled: Vec<f32> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            ShotEvent::Settled { weight, .. } => Some(*weight),
            _ => None,
        })
        .collect();
    assert_eq!(settled.len(), 1);
    assert!((settled[0] - 35.0).abs() < 0.05);

    let record = h
        .events()
        .iter()
        .find_map(|e| match e {
            ShotEvent::SawLearningComplete(r) => Some(*r),
            _ => None,
        })
        .expect("learning record");
    assert!((record.drip_g - 2.0).abs() < 0.1);
    assert!((record.overshoot_g + 1.0).abs() < 0.1);
    assert!((record.flow_at_stop_gps - 2.0).abs() < 1e-6);

    // Settling already finished; ending reports ready straight away.
    assert_eq!(h.count(is_ready), 0);
    h.ctl.end_shot();
    assert_eq!(h.count(is_ready), 1);
    h.ctl.end_shot();
    assert_eq!(h.count(is_ready), 1);
}

#[test]
fn tare_precedes_every_weight() {
    let mut h = Harness::with_target(36.0);
    h.start_tared();
    h.brew(10_000, |_| 0, until_cap(35.0));
    let events = h.events();
    let tared = events
        .iter()
        .position(|e| matches!(e, ShotEvent::TareCompleted { via: TareVia::Confirmed }))
        .unwrap();
    let first_weight = events
        .iter()
        .position(|e| matches!(e, ShotEvent::Weight { .. }))
        .unwrap();
    assert!(matches!(events[0], ShotEvent::TareRequested));
    assert!(tared < first_weight);
}

#[test]
fn unconfirmed_tare_times_out_and_degrades() {
    let mut h = Harness::with_target(36.0);
    h.ctl.start_shot();
    h.advance_to(1_999);
    assert_eq!(h.ctl.snapshot().tare, TareState::Pending);
    h.advance_to(2_000);

    let events = h.events();
    let done = events
        .iter()
        .position(|e| matches!(e, ShotEvent::TareCompleted { via: TareVia::TimedOut }))
        .expect("forced completion");
    assert!(matches!(
        events[done + 1],
        ShotEvent::Degraded(Degradation::TareTimeout)
    ));
    assert_eq!(h.ctl.snapshot().tare, TareState::Complete);

    // A late confirmation changes nothing.
    h.ctl.on_tare_confirmed();
    assert_eq!(
        h.count(|e| matches!(e, ShotEvent::TareCompleted { .. })),
        1
    );
}

#[test]
fn no_stop_while_tare_is_pending() {
    let mut h = Harness::new(
        ShotController::builder()
            .with_target_grams(36.0)
            .with_tare(TareCfg { timeout_ms: 60_000 }),
    );
    h.ctl.start_shot();
    h.brew(26_000, |_| 0, until_cap(40.0));
    assert_eq!(h.count(is_stop), 0);
    assert!(h.count(|e| matches!(e, ShotEvent::Weight { .. })) > 0);
}

#[test]
fn pre_epoch_weights_are_reanchored_to_zero() {
    let mut h = Harness::with_target(0.0);
    h.start_tared();
    for (at, w) in [(100, 1.0), (200, 1.2), (300, 1.4)] {
        h.advance_to(at);
        h.weight(w);
    }
    assert_eq!(h.count(|e| matches!(e, ShotEvent::Weight { .. })), 0);

    h.advance_to(400);
    h.telemetry(120.0, 0, 1.0, 0.5);
    h.advance_to(500);
    h.weight(1.6);

    let weights: Vec<(f64, f32)> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            ShotEvent::Weight { time, weight, .. } => Some((*time, *weight)),
            _ => None,
        })
        .collect();
    assert_eq!(weights.len(), 5);
    // Synthetic zero, then the three buffered readings, all at the epoch.
    for (t, _) in &weights[..4] {
        assert_eq!(*t, 0.0);
    }
    assert_eq!(weights[0].1, 0.0);
    assert!((weights[4].0 - 0.1).abs() < 1e-9);
}

#[test]
fn pre_epoch_overflow_drops_oldest() {
    let mut h = Harness::new(ShotController::builder().with_timing(TimingCfg {
        pre_epoch_capacity: 3,
        ..TimingCfg::default()
    }));
    h.start_tared();
    for (at, w) in [(100, 1.0), (200, 1.2), (300, 1.4), (400, 1.6)] {
        h.advance_to(at);
        h.weight(w);
    }
    h.advance_to(450);
    h.telemetry(120.0, 0, 1.0, 0.5);

    let weights: Vec<f32> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            ShotEvent::Weight { weight, .. } => Some(*weight),
            _ => None,
        })
        .collect();
    assert_eq!(weights, vec![1.2, 1.4, 1.6]);
}

#[test]
fn shot_without_stop_is_ready_once_at_end() {
    let mut h = Harness::with_target(0.0);
    h.start_tared();
    h.brew(10_000, |_| 1, until_cap(40.0));
    assert_eq!(h.count(is_ready), 0);
    h.ctl.end_shot();
    assert_eq!(h.ctl.phase(), ShotPhase::Ended);
    h.advance(5_000);
    assert_eq!(h.count(is_ready), 1);
    assert_eq!(h.count(|e| matches!(e, ShotEvent::Settled { .. })), 0);
    assert_eq!(h.ctl.next_deadline(), None);
}

fn four_frames() -> Profile {
    Profile::new(vec![
        FrameSpec::named("fill").with_duration(2.0),
        FrameSpec::named("preinfuse").with_duration(3.0),
        FrameSpec::named("pour").with_duration(20.0).with_exit_weight(4.0),
        FrameSpec::named("decline").with_duration(20.0),
    ])
}

fn frame_at(s: f64) -> u32 {
    match s {
        s if s < 2.0 => 0,
        s if s < 5.0 => 1,
        s if s < 12.0 => 2,
        _ => 3,
    }
}

#[test]
fn per_frame_weight_exit_fires_once_and_attributes_transition() {
    let mut h = Harness::new(ShotController::builder().with_profile(four_frames()));
    h.start_tared();
    h.brew(14_000, frame_at, until_cap(40.0));

    assert_eq!(
        h.count(|e| matches!(e, ShotEvent::PerFrameWeightReached { frame: 2 })),
        1
    );
    assert_eq!(h.ctl.snapshot().weight_exit_frames, vec![2]);

    let transitions: Vec<(u32, u32, FrameExitReason)> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            ShotEvent::FrameTransition { from, to, reason, .. } => Some((*from, *to, *reason)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (0, 1, FrameExitReason::Time),
            (1, 2, FrameExitReason::Time),
            (2, 3, FrameExitReason::Weight),
        ]
    );
}

#[test]
fn pressure_exit_is_attributed_from_the_last_reading() {
    let profile = Profile::new(vec![
        FrameSpec::named("ramp")
            .with_duration(10.0)
            .with_exit(ExitKind::PressureOver, 3.0),
        FrameSpec::named("hold").with_duration(10.0),
    ]);
    let mut h = Harness::new(ShotController::builder().with_profile(profile));
    h.start_tared();
    h.advance_to(100);
    h.telemetry(120.0, 0, 2.0, 1.0);
    h.advance_to(300);
    h.telemetry(120.2, 0, 3.2, 1.0);
    // 4 s into a 10 s frame.
    h.advance_to(4_100);
    h.telemetry(124.0, 1, 3.3, 1.0);

    let reason = h.events().iter().find_map(|e| match e {
        ShotEvent::FrameTransition { reason, .. } => Some(*reason),
        _ => None,
    });
    assert_eq!(reason, Some(FrameExitReason::Pressure));
}

#[test]
fn timers_from_an_earlier_shot_are_ignored() {
    let mut h = Harness::with_target(36.0);
    h.ctl.start_shot();
    h.advance(100);
    h.ctl.start_shot();
    let current = h.ctl.generation();
    assert_eq!(current, ShotGeneration(2));

    let mut q = TimerQueue::new();
    let stale = q.schedule(TimerKind::TareTimeout, ShotGeneration(1), 0);
    h.ctl.on_timer(stale);
    assert_eq!(h.ctl.snapshot().tare, TareState::Pending);

    let live = q.schedule(TimerKind::TareTimeout, current, 0);
    h.ctl.on_timer(live);
    assert_eq!(h.ctl.snapshot().tare, TareState::Complete);
    assert_eq!(
        h.count(|e| matches!(e, ShotEvent::TareCompleted { via: TareVia::TimedOut })),
        1
    );
}

#[test]
fn device_timer_restart_degrades_once_and_stays_monotone() {
    let mut h = Harness::with_target(0.0);
    h.start_tared();
    let trace = [
        (100, 120.0),
        (300, 120.2),
        (500, 120.4),
        (700, 0.5),
        (900, 0.7),
        (1_100, 0.1),
        (1_300, 0.3),
    ];
    for (i, (at, raw)) in trace.into_iter().enumerate() {
        h.advance_to(at);
        h.telemetry(raw, 0, 9.0, 2.0);
        h.advance(50);
        h.weight_flow(1.0 + i as f32 * 0.2, 2.0);
    }

    assert_eq!(
        h.count(|e| matches!(e, ShotEvent::Degraded(Degradation::ClockDiscontinuity))),
        1
    );
    assert!(h.ctl.snapshot().clock_degraded);

    let times: Vec<f64> = h.events().iter().filter_map(ShotEvent::time).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]), "{times:?}");
    let last = *times.last().unwrap();
    assert!((last - 0.95).abs() < 1e-6, "continued from {last}");
}

/// Runs a shot up to just past the stop (33 g at 23.5 s) and leaves it settling.
fn settling_shot(h: &mut Harness) {
    h.start_tared();
    h.brew(24_000, |_| 1, until_cap(40.0));
    assert_eq!(h.count(is_stop), 1);
    assert!(h.ctl.snapshot().settling);
}

fn abandoned(h: &Harness, why: AbandonReason) -> usize {
    h.count(|e| matches!(e, ShotEvent::Degraded(Degradation::SettlingAbandoned(r)) if *r == why))
}

#[test]
fn lifting_the_cup_abandons_settling() {
    let mut h = Harness::with_target(36.0);
    settling_shot(&mut h);
    h.ctl.end_shot();
    assert_eq!(h.count(is_ready), 0);

    // The first low reading looks like a glitch; the second confirms it.
    h.advance(100);
    h.weight(2.0);
    assert_eq!(abandoned(&h, AbandonReason::CupRemoved), 0);
    h.advance(100);
    h.weight(2.1);

    assert_eq!(abandoned(&h, AbandonReason::CupRemoved), 1);
    assert_eq!(h.count(is_ready), 1);
    assert_eq!(h.count(is_learning), 0);
    assert_eq!(h.count(|e| matches!(e, ShotEvent::Settled { .. })), 0);
    assert!(!h.ctl.snapshot().settling);
}

#[test]
fn scale_disconnect_abandons_settling() {
    let mut h = Harness::with_target(36.0);
    settling_shot(&mut h);
    h.ctl.on_scale_connection(false);
    assert_eq!(abandoned(&h, AbandonReason::ScaleDisconnected), 1);
    assert_eq!(h.count(is_ready), 0);

    h.ctl.end_shot();
    assert_eq!(h.count(is_ready), 1);
    assert_eq!(h.count(is_learning), 0);
}

#[test]
fn new_shot_abandons_settling_and_reports_previous_ready() {
    let mut h = Harness::with_target(36.0);
    settling_shot(&mut h);
    let first = h.ctl.generation();
    h.ctl.start_shot();

    assert_eq!(abandoned(&h, AbandonReason::NewShot), 1);
    assert_eq!(h.count(is_ready), 1);
    assert_eq!(h.ctl.generation(), first.next());
    let snap = h.ctl.snapshot();
    assert_eq!(snap.phase, ShotPhase::Active);
    assert!(!snap.stop_latched);
    assert!(!snap.settling);
    assert_eq!(snap.tare, TareState::Pending);
}

#[test]
fn silent_scale_settles_on_the_display_tick() {
    let mut h = Harness::with_target(36.0);
    h.start_tared();
    h.brew(25_000, |_| 1, |s| (s <= 23.5).then(|| ramp_2gps(s)));

    let settled = h.events().iter().find_map(|e| match e {
        ShotEvent::Settled { weight, via, .. } => Some((*weight, *via)),
        _ => None,
    });
    let (weight, via) = settled.expect("settled");
    assert_eq!(via, SettledVia::Stillness);
    assert!((weight - 33.0).abs() < 0.05);
    assert_eq!(h.count(is_learning), 1);
}

#[test]
fn watchdog_settles_a_noisy_scale() {
    let mut h = Harness::new(
        ShotController::builder()
            .with_target_grams(36.0)
            .with_settling(SettlingCfg {
                watchdog_ms: 3_000,
                ..SettlingCfg::default()
            }),
    );
    h.start_tared();
    // After the stop the reading chatters 0.4 g below the stop weight.
    h.brew(27_000, |_| 1, |s| {
        if s <= 23.5 {
            Some(ramp_2gps(s))
        } else {
            let k = ((s - 23.5) * 10.0).round() as u32;
            Some(31.0 + 0.4 * (k % 2) as f32)
        }
    });

    let vias: Vec<SettledVia> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            ShotEvent::Settled { via, .. } => Some(*via),
            _ => None,
        })
        .collect();
    assert_eq!(vias, vec![SettledVia::Watchdog]);
    assert!(!h.ctl.snapshot().settling);
}

#[test]
fn target_change_applies_to_the_running_shot() {
    let mut h = Harness::with_target(36.0);
    h.start_tared();
    h.ctl.set_target_weight(20.0).unwrap();
    h.brew(26_000, |_| 1, until_cap(40.0));
    let at_stop = stop_weight(&h);
    assert!((at_stop - 17.0).abs() < 0.05, "fired at {at_stop}");
    assert!(h.ctl.set_target_weight(-1.0).is_err());
    assert_eq!(h.ctl.target_weight(), 20.0);
}

#[test]
fn two_sample_knock_on_the_cup_does_not_stop_the_shot() {
    let mut h = Harness::with_target(36.0);
    h.start_tared();
    // True weight is about 16 g when the scale reads 45 g twice.
    h.brew(26_000, |_| 1, |s| {
        if (14.95..15.15).contains(&s) {
            Some(45.0 + ((s - 15.0) as f32).max(0.0))
        } else {
            Some(ramp_2gps(s).min(35.0))
        }
    });

    assert_eq!(h.count(is_stop), 1);
    let at_stop = stop_weight(&h);
    assert!((at_stop - 33.0).abs() < 0.05, "fired at {at_stop}");
    assert_eq!(
        h.count(|e| matches!(e, ShotEvent::Weight { weight, .. } if *weight > 40.0)),
        0
    );
}

#[test]
fn continued_pour_after_the_stop_is_not_settled() {
    let mut h = Harness::with_target(36.0);
    h.start_tared();
    h.brew(30_000, |_| 1, until_cap(100.0));

    assert_eq!(h.count(is_stop), 1);
    assert_eq!(h.count(|e| matches!(e, ShotEvent::Settled { .. })), 0);
    assert_eq!(h.count(is_learning), 0);
    assert!(h.ctl.snapshot().settling);
}

#[test]
fn curve_starts_at_zero_and_keeps_small_readings_once_seeded() {
    let mut h = Harness::with_target(36.0);
    h.start_tared();
    h.advance_to(100);
    h.telemetry(DEVICE_EPOCH_S, 1, 9.0, 2.0);
    for (at, w) in [(200, 0.05), (300, 0.4), (400, 0.05)] {
        h.advance_to(at);
        h.weight(w);
    }

    let weights: Vec<f32> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            ShotEvent::Weight { weight, .. } => Some(*weight),
            _ => None,
        })
        .collect();
    assert_eq!(weights, vec![0.0, 0.4, 0.05]);
}
