//! Trace replay: JSONL trace in, one JSON line per published event out.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use serde::Deserialize;
use serde_json::{Value, json};
use shot_core::{
    ControlMode, Degradation, ExitKind, FrameSpec, InputEvent, LearningHistory, Profile,
    ReplayStats, ShotControllerBuilder, ShotEvent, TelemetrySample, WeightSample,
};
use shot_traits::{ManualClock, Sink};

/// One trace line: `{"at_ms": 1200, "event": "weight", "weight_g": 3.4}`.
#[derive(Debug, Deserialize)]
struct TraceLine {
    at_ms: u64,
    #[serde(flatten)]
    event: TraceEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TraceEvent {
    StartShot,
    EndShot,
    Tare,
    TareConfirmed,
    Telemetry {
        timer_s: f64,
        #[serde(default)]
        pressure_bar: f32,
        #[serde(default)]
        flow_mlps: f32,
        #[serde(default)]
        head_temp_c: f32,
        #[serde(default)]
        mix_temp_c: f32,
        #[serde(default)]
        pressure_goal: f32,
        #[serde(default)]
        flow_goal: f32,
        #[serde(default)]
        temp_goal: f32,
        #[serde(default)]
        frame: u32,
        #[serde(default)]
        is_flow_mode: bool,
    },
    Weight {
        weight_g: f32,
        #[serde(default)]
        flow_gps: Option<f32>,
        #[serde(default)]
        flow_short_gps: Option<f32>,
    },
    ScaleConnection {
        connected: bool,
    },
    TargetWeight {
        grams: f32,
    },
    Profile {
        frames: Vec<TraceFrame>,
    },
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct TraceFrame {
    #[serde(default)]
    name: String,
    #[serde(default)]
    flow_mode: bool,
    #[serde(default)]
    duration_s: Option<f64>,
    #[serde(default)]
    exit: Option<TraceExit>,
    #[serde(default)]
    exit_weight_g: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct TraceExit {
    kind: String,
    threshold: f32,
}

impl TraceFrame {
    fn into_spec(self) -> Result<FrameSpec> {
        let mut spec = FrameSpec::named(self.name).with_control(if self.flow_mode {
            ControlMode::Flow
        } else {
            ControlMode::Pressure
        });
        if let Some(d) = self.duration_s {
            spec = spec.with_duration(d);
        }
        if let Some(e) = self.exit {
            spec = spec.with_exit(e.kind.parse::<ExitKind>()?, e.threshold);
        }
        if let Some(g) = self.exit_weight_g {
            spec = spec.with_exit_weight(g);
        }
        Ok(spec)
    }
}

impl TraceEvent {
    fn into_input(self) -> Result<InputEvent> {
        Ok(match self {
            TraceEvent::StartShot => InputEvent::StartShot,
            TraceEvent::EndShot => InputEvent::EndShot,
            TraceEvent::Tare => InputEvent::Tare,
            TraceEvent::TareConfirmed => InputEvent::TareConfirmed,
            TraceEvent::Telemetry {
                timer_s,
                pressure_bar,
                flow_mlps,
                head_temp_c,
                mix_temp_c,
                pressure_goal,
                flow_goal,
                temp_goal,
                frame,
                is_flow_mode,
            } => InputEvent::Telemetry(TelemetrySample {
                timer_s,
                pressure_bar,
                flow_mlps,
                head_temp_c,
                mix_temp_c,
                pressure_goal,
                flow_goal,
                temp_goal,
                frame,
                is_flow_mode,
            }),
            TraceEvent::Weight {
                weight_g,
                flow_gps,
                flow_short_gps,
            } => InputEvent::Weight(WeightSample {
                weight_g,
                flow_gps,
                flow_short_gps,
            }),
            TraceEvent::ScaleConnection { connected } => InputEvent::ScaleConnection(connected),
            TraceEvent::TargetWeight { grams } => InputEvent::TargetWeight(grams),
            TraceEvent::Profile { frames } => InputEvent::Profile(Profile::new(
                frames
                    .into_iter()
                    .map(TraceFrame::into_spec)
                    .collect::<Result<Vec<_>>>()?,
            )),
            TraceEvent::Shutdown => InputEvent::Shutdown,
        })
    }
}

/// Parse a JSONL trace. Blank lines and lines starting with `#` are skipped.
pub fn parse_trace(text: &str) -> Result<Vec<(u64, InputEvent)>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed: TraceLine = serde_json::from_str(line)
            .wrap_err_with(|| format!("trace line {}: not a valid trace event", idx + 1))?;
        let input = parsed
            .event
            .into_input()
            .wrap_err_with(|| format!("trace line {}", idx + 1))?;
        out.push((parsed.at_ms, input));
    }
    Ok(out)
}

/// JSON form of a published event.
pub fn event_json(event: &ShotEvent) -> Value {
    let name = event.name();
    match event {
        ShotEvent::Telemetry {
            time,
            pressure,
            flow,
            temperature,
            pressure_goal,
            flow_goal,
            temp_goal,
            frame,
            is_flow_mode,
        } => json!({
            "event": name, "time": time, "pressure": pressure, "flow": flow,
            "temperature": temperature, "pressure_goal": pressure_goal,
            "flow_goal": flow_goal, "temp_goal": temp_goal, "frame": frame,
            "is_flow_mode": is_flow_mode,
        }),
        ShotEvent::Weight {
            time,
            weight,
            flow_rate,
        } => json!({ "event": name, "time": time, "weight": weight, "flow_rate": flow_rate }),
        ShotEvent::StopAtWeightReached {
            time,
            weight,
            flow_rate,
            target,
        } => json!({
            "event": name, "time": time, "weight": weight,
            "flow_rate": flow_rate, "target": target,
        }),
        ShotEvent::PerFrameWeightReached { frame } => json!({ "event": name, "frame": frame }),
        ShotEvent::FrameTransition {
            time,
            from,
            to,
            reason,
        } => json!({
            "event": name, "time": time, "from": from, "to": to, "reason": reason.as_str(),
        }),
        ShotEvent::Settled { time, weight, via } => {
            json!({ "event": name, "time": time, "weight": weight, "via": via.as_str() })
        }
        ShotEvent::SawLearningComplete(r) => json!({
            "event": name, "drip_g": r.drip_g,
            "flow_at_stop_gps": r.flow_at_stop_gps, "overshoot_g": r.overshoot_g,
        }),
        ShotEvent::ShotProcessingReady | ShotEvent::TareRequested => json!({ "event": name }),
        ShotEvent::TareCompleted { via } => json!({ "event": name, "via": via.as_str() }),
        ShotEvent::Degraded(d) => {
            let (kind, detail) = match d {
                Degradation::ClockDiscontinuity => ("clock_discontinuity", Value::Null),
                Degradation::TareTimeout => ("tare_timeout", Value::Null),
                Degradation::SettlingAbandoned(r) => ("settling_abandoned", json!(r.as_str())),
                Degradation::LearningSkipped(why) => ("learning_skipped", json!(why.to_string())),
            };
            json!({ "event": name, "kind": kind, "detail": detail })
        }
    }
}

/// Writes each event as one JSON line on stdout.
#[derive(Debug, Default)]
pub struct JsonLineSink;

impl Sink<ShotEvent> for JsonLineSink {
    fn publish(&mut self, item: &ShotEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", event_json(item))?;
        Ok(())
    }
}

fn summary_json(stats: &ReplayStats) -> Value {
    json!({
        "event": "replay_summary",
        "inputs": stats.events,
        "rejected": stats.rejected,
        "timers_fired": stats.timers_fired,
        "end_ms": stats.end_ms,
    })
}

/// Replay `trace_path` through a controller built from `cfg`.
pub fn run_replay(
    cfg: &shot_config::Config,
    trace_path: &Path,
    target_override: Option<f32>,
    learning_path: Option<&Path>,
) -> Result<ReplayStats> {
    let text = std::fs::read_to_string(trace_path)
        .wrap_err_with(|| format!("read trace {trace_path:?}"))?;
    let trace = parse_trace(&text)?;
    tracing::info!(path = ?trace_path, inputs = trace.len(), "trace loaded");

    let history = load_history(cfg, learning_path)?;
    let clock = ManualClock::new();
    let mut builder = ShotControllerBuilder::from(cfg)
        .with_clock(Arc::new(clock.clone()))
        .with_learning_history(history)
        .with_sink(Box::new(JsonLineSink));
    if let Some(g) = target_override {
        builder = builder.with_target_grams(g);
    }
    let mut controller = builder.build().wrap_err("build shot controller")?;

    let stats = shot_core::replay(&mut controller, &clock, trace)?;
    tracing::info!(
        inputs = stats.events,
        rejected = stats.rejected,
        timers_fired = stats.timers_fired,
        end_ms = stats.end_ms,
        "replay finished"
    );
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", summary_json(&stats))?;
    Ok(stats)
}

/// Learning history from `--learning`, else `[learning] history_csv`, else empty.
pub fn load_history(
    cfg: &shot_config::Config,
    learning_path: Option<&Path>,
) -> Result<LearningHistory> {
    let path = learning_path
        .map(Path::to_path_buf)
        .or_else(|| cfg.learning.history_csv.as_ref().map(Into::into));
    let Some(path) = path else {
        return Ok(LearningHistory::default());
    };
    let rows = shot_config::load_learning_csv(&path)?;
    tracing::info!(path = ?path, entries = rows.len(), converged = cfg.learning.converged, "learning history loaded");
    Ok(LearningHistory::from_rows(&rows, cfg.learning.converged))
}
