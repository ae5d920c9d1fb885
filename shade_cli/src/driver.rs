//! Engine assembly from config and script execution against it.

use crate::script::{Step, parse_line};
use eyre::{Result, WrapErr};
use shade_config::{Config, SimShadeCfg};
use shade_core::{CommandReceipt, EngineCfg, Settings, SettingsHandle, ShadeEngine};
use shade_sim::{SimShadeSpec, SimulatedController};
use shade_traits::ShadeController;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn sim_spec(cfg: &SimShadeCfg) -> SimShadeSpec {
    let mut spec = SimShadeSpec::new(&cfg.id, cfg.start_raw)
        .speed(cfg.speed_raw_per_s)
        .latency(Duration::from_millis(cfg.latency_ms));
    spec.name = cfg.name.clone();
    spec.connected = cfg.connected;
    spec.reject_writes = cfg.reject_writes;
    spec
}

/// Settings from config; invalid per-shade curves are reported and skipped.
pub fn settings_from_config(cfg: &Config) -> Result<Settings> {
    let (settings, rejected) = Settings::from_config(cfg)?;
    for r in &rejected {
        tracing::warn!(shade = %r.shade, error = %r.error, "calibration ignored");
    }
    Ok(settings)
}

/// Build the simulated controller and an engine over it, then poll once so
/// the shades are known before the first command.
pub fn build_engine(cfg: &Config) -> Result<(Arc<SimulatedController>, ShadeEngine)> {
    let sim = cfg.simulation.as_ref().ok_or_else(|| {
        eyre::eyre!("config has no [simulation] section; shadectl drives simulated shades only")
    })?;
    let controller = Arc::new(SimulatedController::new(
        &cfg.controller.id,
        sim.shades.iter().map(sim_spec),
    ));
    let settings = Arc::new(SettingsHandle::new(settings_from_config(cfg)?));
    let engine = ShadeEngine::builder()
        .with_shared_controller(Arc::clone(&controller) as Arc<dyn ShadeController>)
        .with_config(EngineCfg::from(cfg))
        .with_settings(settings)
        .build()?;
    let summary = engine.poll_once().wrap_err("initial poll failed")?;
    tracing::info!(
        controller = engine.controller_id(),
        shades = summary.added.len(),
        "engine ready"
    );
    Ok((controller, engine))
}

/// Runs script lines against an engine, writing results to `out`.
pub struct Driver<'a, W: Write> {
    engine: &'a ShadeEngine,
    out: W,
    /// How long to wait for a queued write to be reported.
    write_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<'a, W: Write> Driver<'a, W> {
    pub fn new(engine: &'a ShadeEngine, out: W, write_timeout: Duration, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            out,
            write_timeout,
            shutdown,
        }
    }

    /// Execute every line; returns how many steps failed.
    ///
    /// A failed step is reported on stderr and the script continues.
    pub fn run(&mut self, input: impl BufRead) -> Result<usize> {
        let mut failures = 0usize;
        for (idx, line) in input.lines().enumerate() {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!("interrupted, stopping script");
                break;
            }
            let line = line.wrap_err("read script")?;
            let outcome = parse_line(&line).and_then(|step| match step {
                Some(Step::Quit) => Ok(false),
                Some(step) => self.execute(&step).map(|()| true),
                None => Ok(true),
            });
            match outcome {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    failures += 1;
                    tracing::debug!(line = idx + 1, error = ?e, "script step failed");
                    eprintln!("error: line {}: {e:#}", idx + 1);
                }
            }
        }
        self.out.flush()?;
        Ok(failures)
    }

    fn execute(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Move { shade, command } => {
                let receipt = self.engine.apply_command(shade, *command)?;
                receipt.wait(self.write_timeout)?;
                writeln!(self.out, "ok {shade} {command:?}")?;
            }
            Step::Stop(shades) => {
                let receipts = if let [shade] = shades.as_slice() {
                    vec![self.engine.apply_command(shade, shade_core::Command::Stop)?]
                } else {
                    self.engine.stop_shades(shades)?
                };
                for receipt in &receipts {
                    self.report_stop(receipt)?;
                }
            }
            Step::StopGroup(group) => {
                let receipt = self.engine.stop_group(group)?;
                self.report_stop(&receipt)?;
            }
            Step::Boost => {
                self.engine.boost();
                writeln!(self.out, "ok boost")?;
            }
            Step::Poll => {
                let s = self.engine.poll_once()?;
                writeln!(
                    self.out,
                    "poll: {} added, {} moved, {} removed",
                    s.added.len(),
                    s.moved.len(),
                    s.removed.len()
                )?;
            }
            Step::Sleep(d) => std::thread::sleep(*d),
            Step::Status => {
                for shade in self.engine.shades() {
                    let raw = shade.raw.map_or_else(|| "-".to_string(), |r| r.to_string());
                    let percent = shade
                        .percent
                        .map_or_else(|| "-".to_string(), |p| format!("{p:.1}"));
                    let link = if shade.status.is_connected() {
                        "connected"
                    } else {
                        "disconnected"
                    };
                    let failed = if shade.write_failed { " write_failed" } else { "" };
                    writeln!(
                        self.out,
                        "{} raw={raw} percent={percent} {link}{failed}",
                        shade.id
                    )?;
                }
            }
            Step::Diag => {
                let snapshot = self.engine.diagnostics_snapshot();
                writeln!(self.out, "{}", serde_json::to_string(&snapshot)?)?;
            }
            Step::Assist(cohort) => {
                let target = self.engine.assisted_target(cohort)?;
                writeln!(self.out, "assist {cohort} -> {target}")?;
            }
            Step::Capture { cohort, percent } => {
                let run = self.engine.capture_assisted_anchor(cohort, *percent)?;
                let skipped: Vec<String> = run
                    .skipped
                    .iter()
                    .map(|s| format!("{} ({})", s.shade, s.reason))
                    .collect();
                writeln!(
                    self.out,
                    "capture {cohort} {percent}: saved [{}] unchanged [{}] skipped [{}]",
                    run.saved.join(", "),
                    run.unchanged.join(", "),
                    skipped.join(", ")
                )?;
            }
            Step::Quit => {}
        }
        Ok(())
    }

    fn report_stop(&mut self, receipt: &CommandReceipt) -> Result<()> {
        if let Some(plan) = receipt.plan() {
            for t in &plan.targets {
                writeln!(
                    self.out,
                    "stop {} -> {} ({})",
                    t.shade,
                    t.target,
                    t.source.as_str()
                )?;
            }
        }
        for err in receipt.skip_errors() {
            writeln!(self.out, "{err}")?;
        }
        receipt.wait(self.write_timeout)?;
        Ok(())
    }
}
