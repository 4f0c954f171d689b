//! Human-readable error descriptions and structured JSON error formatting.

use shot_core::error::{BuildError, ShotError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `shot check-config`."
            ),
            BuildError::TargetOutOfRange(g) => format!(
                "What happened: Target weight {g} g is out of range.\nLikely causes: A typo in --target or [shot] target_g.\nHow to fix: Use 0 to disable stop-at-weight or a value between 0.1 and 5000 g."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<ShotError>() {
        return match se {
            ShotError::Replay(msg) => format!(
                "What happened: The trace could not be replayed ({msg}).\nLikely causes: Trace lines are not sorted by at_ms.\nHow to fix: Sort the trace by at_ms and rerun."
            ),
            ShotError::Config(msg) => format!(
                "What happened: {msg}.\nLikely causes: A misspelled value in the trace or config.\nHow to fix: Check the value against the documented names and rerun."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config or file loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("learning csv must have headers") {
        return "Invalid headers in learning CSV. Expected 'drip_g,flow_gps'.".to_string();
    }

    if lower.contains("trace line") {
        return format!(
            "What happened: The trace file is malformed.\nLikely causes: A line is not a JSON object with at_ms and a known event.\nHow to fix: Fix the reported line. Details: {msg}"
        );
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        return format!(
            "What happened: Configuration is invalid.\nLikely causes: Unknown keys, wrong types or out-of-range values.\nHow to fix: Edit the TOML config and try again. Details: {msg}"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 3 configuration, 4 replay, 1 anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 3;
    }
    match err.downcast_ref::<ShotError>() {
        Some(ShotError::Config(_)) => 3,
        Some(ShotError::Replay(_)) => 4,
        _ => {
            let lower = format!("{err:#}").to_ascii_lowercase();
            if lower.contains("invalid configuration")
                || lower.contains("parse config")
                || lower.contains("learning csv")
            {
                3
            } else {
                1
            }
        }
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(_) => "InvalidConfig",
            BuildError::TargetOutOfRange(_) => "TargetOutOfRange",
        };
    }
    match err.downcast_ref::<ShotError>() {
        Some(ShotError::Config(_)) => "Config",
        Some(ShotError::State(_)) => "State",
        Some(ShotError::Channel(_)) => "Channel",
        Some(ShotError::Replay(_)) => "Replay",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
