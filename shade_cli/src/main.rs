#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `shadectl`: drive the shade engine against simulated shades.

mod cli;
mod driver;
mod error_fmt;
mod script;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use eyre::{Result, WrapErr};
use shade_config::Config;
use shade_core::CalibrationCurve;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", error_fmt::format_error_json(&e));
        } else {
            eprintln!("{}", error_fmt::humanize(&e));
        }
        tracing::debug!(error = ?e, "command failed");
        std::process::exit(error_fmt::exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    // The calibration check works without a config file.
    let optional = matches!(cli.cmd, Commands::Calibration { .. });
    let cfg = load_config(&cli.config, optional)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;

    match cli.cmd {
        Commands::Run { script, poll } => run_script(&cfg, script.as_deref(), poll),
        Commands::CheckConfig => check_config(&cfg),
        Commands::Calibration { csv, invert } => check_calibration(&csv, invert),
        Commands::Diagnostics => {
            let (_sim, engine) = driver::build_engine(&cfg)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&engine.diagnostics_snapshot())?
            );
            Ok(())
        }
    }
}

fn load_config(path: &Path, optional: bool) -> Result<Config> {
    if optional && !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    let cfg = shade_config::load_toml(&text)?;
    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing(json: bool, level: &str, logging: &shade_config::Logging) -> Result<()> {
    // RUST_LOG wins over --log-level
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(level)?,
    };
    let console: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let file_layer = match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file must name a file, got {file:?}"))?;
            let rotation = match logging.rotation.as_deref() {
                None | Some("never") => Rotation::NEVER,
                Some("daily") => Rotation::DAILY,
                Some("hourly") => Rotation::HOURLY,
                Some(other) => {
                    eyre::bail!("logging.rotation must be never, daily or hourly, got {other:?}")
                }
            };
            let appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(name.to_string_lossy())
                .build(dir)
                .wrap_err_with(|| format!("failed to open log file {file}"))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let file_filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or(level))?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console.with_filter(console_filter))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn run_script(cfg: &Config, script: Option<&Path>, poll: bool) -> Result<()> {
    let (_sim, engine) = driver::build_engine(cfg)?;
    if poll {
        engine.start_polling();
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let write_timeout = Duration::from_millis(cfg.controller.request_timeout_ms + cfg.batch.window_ms);
    let stdout = std::io::stdout();
    let mut runner = driver::Driver::new(&engine, stdout.lock(), write_timeout, shutdown);
    let failures = match script {
        Some(path) => {
            let file = std::fs::File::open(path)
                .wrap_err_with(|| format!("failed to open script {}", path.display()))?;
            runner.run(BufReader::new(file))?
        }
        None => runner.run(std::io::stdin().lock())?,
    };
    if failures > 0 {
        eyre::bail!("{failures} script step(s) failed");
    }
    Ok(())
}

fn check_config(cfg: &Config) -> Result<()> {
    let (settings, rejected) = shade_core::Settings::from_config(cfg)?;
    if let Some(r) = rejected.first() {
        return Err::<(), _>(eyre::Report::new(r.error.clone()))
            .wrap_err_with(|| format!("calibration for shade {} is invalid", r.shade));
    }
    println!(
        "config ok: controller {}, {} simulated shades, {} calibrated shades, {} visual groups",
        cfg.controller.id,
        cfg.simulation.as_ref().map_or(0, |s| s.shades.len()),
        settings.calibrations.len(),
        settings.groups.groups().count()
    );
    Ok(())
}

fn check_calibration(csv: &Path, invert: bool) -> Result<()> {
    let rows = shade_config::load_anchors_csv(csv)?;
    let anchors = shade_core::calibration::anchors_from_pairs(rows.iter().map(|r| (r.percent, r.raw)))?;
    let curve = CalibrationCurve::new(anchors, invert)?;
    println!("percent,raw");
    for percent in (0..=100u8).step_by(10) {
        println!("{percent},{}", curve.percent_to_raw(f64::from(percent)));
    }
    Ok(())
}
