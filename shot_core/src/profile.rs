//! Profile metadata needed for frame exit attribution and per-frame weight exits.
//!
//! Profiles are parsed and stored elsewhere; the core only reads the fields below.

use std::str::FromStr;

use crate::error::ShotError;

/// What the machine regulates during a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    Pressure,
    Flow,
}

/// Machine-side early exit condition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    PressureOver,
    PressureUnder,
    FlowOver,
    FlowUnder,
}

impl ExitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitKind::PressureOver => "pressure_over",
            ExitKind::PressureUnder => "pressure_under",
            ExitKind::FlowOver => "flow_over",
            ExitKind::FlowUnder => "flow_under",
        }
    }
}

impl FromStr for ExitKind {
    type Err = ShotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pressure_over" => Ok(ExitKind::PressureOver),
            "pressure_under" => Ok(ExitKind::PressureUnder),
            "flow_over" => Ok(ExitKind::FlowOver),
            "flow_under" => Ok(ExitKind::FlowUnder),
            other => Err(ShotError::Config(format!("unknown exit condition '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitCondition {
    pub kind: ExitKind,
    pub threshold: f32,
}

impl ExitCondition {
    pub fn new(kind: ExitKind, threshold: f32) -> Self {
        Self { kind, threshold }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameSpec {
    pub name: String,
    pub control: ControlMode,
    /// Nominal frame duration in seconds.
    pub duration_s: Option<f64>,
    pub exit: Option<ExitCondition>,
    /// Operator weight cutoff for this frame (g).
    pub exit_weight_g: Option<f32>,
}

impl FrameSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_s = Some(seconds);
        self
    }

    pub fn with_exit(mut self, kind: ExitKind, threshold: f32) -> Self {
        self.exit = Some(ExitCondition::new(kind, threshold));
        self
    }

    pub fn with_exit_weight(mut self, grams: f32) -> Self {
        self.exit_weight_g = Some(grams);
        self
    }

    pub fn with_control(mut self, control: ControlMode) -> Self {
        self.control = control;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Profile {
    pub frames: Vec<FrameSpec>,
}

impl Profile {
    pub fn new(frames: Vec<FrameSpec>) -> Self {
        Self { frames }
    }

    pub fn frame(&self, index: u32) -> Option<&FrameSpec> {
        self.frames.get(usize::try_from(index).ok()?)
    }
}
