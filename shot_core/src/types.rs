//! Decoded sample shapes delivered by the machine and scale transports.

/// One decoded machine telemetry sample (~5 Hz).
///
/// `timer_s` is the machine's own elapsed-time counter. It is monotonic only
/// within one connection and restarts after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySample {
    pub timer_s: f64,
    pub pressure_bar: f32,
    pub flow_mlps: f32,
    pub head_temp_c: f32,
    pub mix_temp_c: f32,
    pub pressure_goal: f32,
    pub flow_goal: f32,
    pub temp_goal: f32,
    pub frame: u32,
    pub is_flow_mode: bool,
}

/// One decoded scale reading, on the scale's own cadence.
///
/// Scales that compute flow themselves fill in the flow fields; otherwise
/// they are derived from the accepted weight history.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeightSample {
    pub weight_g: f32,
    pub flow_gps: Option<f32>,
    pub flow_short_gps: Option<f32>,
}

impl WeightSample {
    pub fn new(weight_g: f32) -> Self {
        Self {
            weight_g,
            flow_gps: None,
            flow_short_gps: None,
        }
    }

    pub fn with_flow(weight_g: f32, flow_gps: f32, flow_short_gps: f32) -> Self {
        Self {
            weight_g,
            flow_gps: Some(flow_gps),
            flow_short_gps: Some(flow_short_gps),
        }
    }
}

/// Last machine-side readings, kept for frame exit attribution.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    pub pressure_bar: f32,
    pub flow_mlps: f32,
}

impl From<&TelemetrySample> for SensorReading {
    fn from(s: &TelemetrySample) -> Self {
        Self {
            pressure_bar: s.pressure_bar,
            flow_mlps: s.flow_mlps,
        }
    }
}
