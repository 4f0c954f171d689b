//! Decide why a profile frame ended.
//!
//! Rules, first match wins:
//! 1. operator weight cutoff issued for the frame -> `Weight`
//! 2. configured exit whose reading crossed its threshold -> `Pressure`/`Flow`
//! 3. configured exit and elapsed >= `time_ratio` x nominal duration -> `Time`
//! 4. no exit configured -> `Time`
//! 5. anything else -> `Unknown`

use std::fmt;

use crate::config::AttributionCfg;
use crate::profile::{ExitKind, FrameSpec};
use crate::types::SensorReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameExitReason {
    Weight,
    Pressure,
    Flow,
    Time,
    Unknown,
}

impl FrameExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameExitReason::Weight => "weight",
            FrameExitReason::Pressure => "pressure",
            FrameExitReason::Flow => "flow",
            FrameExitReason::Time => "time",
            FrameExitReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FrameExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameAttributor {
    cfg: AttributionCfg,
}

impl FrameAttributor {
    pub fn new(cfg: AttributionCfg) -> Self {
        Self { cfg }
    }

    /// Attribute the frame that just ended.
    ///
    /// `frame` is `None` when the index is not in the profile. `last` holds the
    /// readings observed before the transition sample, if any.
    pub fn attribute(
        &self,
        frame: Option<&FrameSpec>,
        cutoff_issued: bool,
        last: Option<SensorReading>,
        elapsed_s: f64,
    ) -> FrameExitReason {
        if cutoff_issued {
            return FrameExitReason::Weight;
        }
        let Some(frame) = frame else {
            return FrameExitReason::Unknown;
        };
        let Some(exit) = frame.exit else {
            return FrameExitReason::Time;
        };

        if let Some(r) = last {
            let crossed = match exit.kind {
                ExitKind::PressureOver => r.pressure_bar >= exit.threshold,
                ExitKind::PressureUnder => r.pressure_bar <= exit.threshold,
                ExitKind::FlowOver => r.flow_mlps >= exit.threshold,
                ExitKind::FlowUnder => r.flow_mlps <= exit.threshold,
            };
            if crossed {
                return match exit.kind {
                    ExitKind::PressureOver | ExitKind::PressureUnder => FrameExitReason::Pressure,
                    ExitKind::FlowOver | ExitKind::FlowUnder => FrameExitReason::Flow,
                };
            }
        }

        if let Some(duration) = frame.duration_s
            && duration > 0.0
            && elapsed_s >= duration * self.cfg.time_ratio
        {
            return FrameExitReason::Time;
        }

        tracing::debug!(
            frame = %frame.name,
            exit = exit.kind.as_str(),
            threshold = exit.threshold,
            elapsed_s,
            "frame exit ambiguous"
        );
        FrameExitReason::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn reading(pressure_bar: f32, flow_mlps: f32) -> Option<SensorReading> {
        Some(SensorReading {
            pressure_bar,
            flow_mlps,
        })
    }

    #[rstest]
    #[case(ExitKind::PressureOver, 3.0, reading(3.2, 1.0), FrameExitReason::Pressure)]
    #[case(ExitKind::PressureOver, 3.0, reading(3.0, 1.0), FrameExitReason::Pressure)]
    #[case(ExitKind::PressureUnder, 2.0, reading(1.5, 1.0), FrameExitReason::Pressure)]
    #[case(ExitKind::FlowOver, 4.0, reading(6.0, 4.5), FrameExitReason::Flow)]
    #[case(ExitKind::FlowUnder, 1.0, reading(9.0, 0.8), FrameExitReason::Flow)]
    #[case(ExitKind::PressureOver, 3.0, reading(2.0, 1.0), FrameExitReason::Unknown)]
    #[case(ExitKind::FlowOver, 4.0, None, FrameExitReason::Unknown)]
    fn threshold_crossing_at_40_percent(
        #[case] kind: ExitKind,
        #[case] threshold: f32,
        #[case] last: Option<SensorReading>,
        #[case] expected: FrameExitReason,
    ) {
        let frame = FrameSpec::named("f").with_duration(10.0).with_exit(kind, threshold);
        let a = FrameAttributor::default();
        assert_eq!(a.attribute(Some(&frame), false, last, 4.0), expected);
    }

    #[test]
    fn weight_cutoff_beats_everything() {
        let frame = FrameSpec::named("f").with_exit(ExitKind::PressureOver, 3.0);
        let a = FrameAttributor::default();
        assert_eq!(
            a.attribute(Some(&frame), true, reading(9.0, 9.0), 1.0),
            FrameExitReason::Weight
        );
        assert_eq!(a.attribute(None, true, None, 0.0), FrameExitReason::Weight);
    }

    #[test]
    fn no_exit_condition_is_time() {
        let frame = FrameSpec::named("f").with_duration(5.0);
        let a = FrameAttributor::default();
        assert_eq!(
            a.attribute(Some(&frame), false, reading(1.0, 1.0), 5.0),
            FrameExitReason::Time
        );
    }

    #[rstest]
    #[case(8.9, FrameExitReason::Unknown)]
    #[case(9.5, FrameExitReason::Time)]
    #[case(12.0, FrameExitReason::Time)]
    fn armed_exit_loses_to_the_clock_late_in_the_frame(
        #[case] elapsed: f64,
        #[case] expected: FrameExitReason,
    ) {
        let frame = FrameSpec::named("f")
            .with_duration(10.0)
            .with_exit(ExitKind::PressureOver, 9.0);
        let a = FrameAttributor::default();
        assert_eq!(
            a.attribute(Some(&frame), false, reading(4.0, 2.0), elapsed),
            expected
        );
    }

    #[test]
    fn exit_without_duration_is_unknown_unless_crossed() {
        let frame = FrameSpec::named("f").with_exit(ExitKind::FlowOver, 3.0);
        let a = FrameAttributor::default();
        assert_eq!(
            a.attribute(Some(&frame), false, reading(1.0, 1.0), 100.0),
            FrameExitReason::Unknown
        );
    }

    #[test]
    fn frame_missing_from_profile_is_unknown() {
        let a = FrameAttributor::default();
        assert_eq!(
            a.attribute(None, false, reading(1.0, 1.0), 3.0),
            FrameExitReason::Unknown
        );
    }
}
