#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `shot`: replay recorded shots through the timing core and check configs.

mod cli;
mod error_fmt;
mod replay;

use std::path::Path;

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if !cli.json {
        let _ = color_eyre::install();
    }

    if let Err(e) = run(cli) {
        let code = exit_code_for_error(&e);
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
            tracing::debug!(error = ?e, "full error report");
        }
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    init_logging(&cli, &cfg)?;
    tracing::debug!(config = ?cli.config, "configuration loaded");

    match cli.cmd {
        Commands::Replay {
            trace,
            target,
            learning,
        } => {
            replay::run_replay(&cfg, &trace, target, learning.as_deref())?;
        }
        Commands::CheckConfig => check_config(&cfg, cli.json)?,
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<shot_config::Config> {
    let Some(path) = path else {
        return Ok(shot_config::Config::default());
    };
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("read config {path:?}"))?;
    let cfg = shot_config::load_toml(&text).wrap_err("parse config TOML")?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn init_logging(cli: &Cli, cfg: &shot_config::Config) -> Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    // Console logs go to stderr; stdout carries event JSON.
    let console: Box<dyn Layer<Registry> + Send + Sync> = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console];

    if let Some(file) = cfg.logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let appender = match cfg
            .logging
            .rotation
            .as_deref()
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let level = cfg.logging.level.as_deref().unwrap_or("info");
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(level))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| eyre::eyre!("init logging: {e}"))?;
    Ok(())
}

fn check_config(cfg: &shot_config::Config, json: bool) -> Result<()> {
    let history = replay::load_history(cfg, None)?;
    let core: shot_core::ShotControllerBuilder = cfg.into();
    // Same validation the replay path runs.
    core.build().wrap_err("build shot controller")?;

    if json {
        let v = serde_json::json!({
            "ok": true,
            "target_g": cfg.shot.target_g,
            "lag_coefficient_s": cfg.predictor.lag_coefficient_s,
            "tare_timeout_ms": cfg.tare.timeout_ms,
            "settling_watchdog_ms": cfg.settling.watchdog_ms,
            "learning_entries": history.entries().len(),
            "learning_converged": history.is_converged(),
        });
        println!("{v}");
    } else {
        println!("config ok");
        println!("  target_g:             {}", cfg.shot.target_g);
        println!("  lag_coefficient_s:    {}", cfg.predictor.lag_coefficient_s);
        println!("  tare_timeout_ms:      {}", cfg.tare.timeout_ms);
        println!("  settling_watchdog_ms: {}", cfg.settling.watchdog_ms);
        println!(
            "  learning entries:     {} (converged: {})",
            history.entries().len(),
            history.is_converged()
        );
    }
    Ok(())
}
