#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration anchor parsing for the shade engine.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Every section is optional; an empty file yields the stock timings
//!   (80 ms batch window, 12 s idle / 1.5 s boost polling).
//! - Calibration anchors are checked for shape here and for curve rules
//!   (ordering, endpoints, monotonic raw) by the engine when settings are built.
use serde::Deserialize;
use serde::de::Deserializer;
use std::collections::{BTreeMap, HashMap};

/// Calibration anchor CSV schema.
///
/// Expected headers:
/// percent,raw
///
/// Example:
/// percent,raw
/// 0,0
/// 50,30500
/// 100,65535
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AnchorRow {
    pub percent: i64,
    pub raw: i64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerCfg {
    /// Identity used in logs and diagnostics.
    pub id: String,
    /// Highest raw position the controller reports.
    pub position_max: u16,
    /// Per-request timeout applied by the transport (ms).
    pub request_timeout_ms: u64,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            id: "main".to_string(),
            position_max: u16::MAX,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BatchCfg {
    /// Coalescing window opened by the first enqueue (ms).
    pub window_ms: u64,
    /// Flush immediately once this many distinct shades are queued.
    pub max_items: usize,
}

impl Default for BatchCfg {
    fn default() -> Self {
        Self {
            window_ms: 80,
            max_items: 16,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PollingCfg {
    /// Poll interval while idle (ms).
    pub idle_ms: u64,
    /// Poll interval while boosted (ms).
    pub boost_ms: u64,
    /// How long a boost lasts after the last trigger (ms).
    pub boost_window_ms: u64,
}

impl Default for PollingCfg {
    fn default() -> Self {
        Self {
            idle_ms: 12_000,
            boost_ms: 1_500,
            boost_window_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PredictorCfg {
    /// Enable predictive stop; when false every stop freezes at the last position
    pub enabled: bool,
    /// EMA smoothing factor for the command latency estimate, (0.0, 1.0]
    pub latency_alpha: f64,
    /// Latency assumed before the first observation (ms)
    pub initial_latency_ms: u64,
    /// Upper clamp for a single latency observation (ms)
    pub max_latency_ms: u64,
    /// RLS forgetting factor, (0.0, 1.0]
    pub forgetting: f64,
    /// Initial RLS covariance; large values let the first sample dominate
    pub initial_covariance: f64,
}

impl Default for PredictorCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_alpha: 0.2,
            initial_latency_ms: 150,
            max_latency_ms: 1_500,
            forgetting: 0.98,
            initial_covariance: 1_000.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiagnosticsCfg {
    /// Number of stop plans, batch events and assisted runs retained.
    pub history: usize,
}

impl Default for DiagnosticsCfg {
    fn default() -> Self {
        Self { history: 20 }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Per-shade calibration as written by the options editor.
#[derive(Debug, Deserialize, Clone)]
pub struct ShadeCalibrationCfg {
    /// Accepts either:
    /// - array of tables: [{ pc = 0, raw = 0 }, ...]
    /// - array of tuples: [[0, 0], [100, 65535], ...]
    #[serde(deserialize_with = "de_anchors")]
    pub anchors: Vec<AnchorRow>,
    /// Overrides the global invert flag when present.
    #[serde(default)]
    pub invert: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CalibrationSection {
    /// Global axis inversion applied to shades without an override.
    pub invert: bool,
    pub shades: BTreeMap<String, ShadeCalibrationCfg>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct VisualGroupCfg {
    /// Display name; falls back to the group id when empty.
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimShadeCfg {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_raw: u16,
    #[serde(default = "default_sim_speed")]
    pub speed_raw_per_s: f64,
    #[serde(default = "default_sim_latency_ms")]
    pub latency_ms: u64,
    #[serde(default = "default_true")]
    pub connected: bool,
    /// Writes to this shade are rejected by the simulated controller.
    #[serde(default)]
    pub reject_writes: bool,
}

fn default_sim_speed() -> f64 {
    6_000.0
}

fn default_sim_latency_ms() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SimulationCfg {
    pub shades: Vec<SimShadeCfg>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerCfg,
    pub batch: BatchCfg,
    pub polling: PollingCfg,
    /// Predictive-stop configuration
    pub predictor: PredictorCfg,
    pub diagnostics: DiagnosticsCfg,
    pub logging: Logging,
    pub calibration: CalibrationSection,
    /// Visual groups keyed by group id
    pub visual_groups: BTreeMap<String, VisualGroupCfg>,
    /// Simulated controller used by the CLI when no transport is configured
    pub simulation: Option<SimulationCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnchorToml {
    Tuple((i64, i64)),
    Table { pc: i64, raw: i64 },
}

fn de_anchors<'de, D>(deserializer: D) -> Result<Vec<AnchorRow>, D::Error>
where
    D: Deserializer<'de>,
{
    let items: Vec<AnchorToml> = Vec::deserialize(deserializer)?;
    Ok(items
        .into_iter()
        .map(|a| match a {
            AnchorToml::Tuple((percent, raw)) => AnchorRow { percent, raw },
            AnchorToml::Table { pc, raw } => AnchorRow { percent: pc, raw },
        })
        .collect())
}

pub fn load_anchors_csv(path: &std::path::Path) -> eyre::Result<Vec<AnchorRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["percent", "raw"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'percent,raw', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<AnchorRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.len() < 2 {
        eyre::bail!("calibration CSV needs at least two anchors, got {}", rows.len());
    }
    Ok(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Controller
        if self.controller.id.trim().is_empty() {
            eyre::bail!("controller.id must not be empty");
        }
        if self.controller.position_max == 0 {
            eyre::bail!("controller.position_max must be > 0");
        }
        if self.controller.request_timeout_ms == 0 {
            eyre::bail!("controller.request_timeout_ms must be >= 1");
        }

        // Batch
        if self.batch.window_ms == 0 {
            eyre::bail!("batch.window_ms must be >= 1");
        }
        if self.batch.window_ms > 5_000 {
            eyre::bail!("batch.window_ms is unreasonably large (>5s)");
        }
        if self.batch.max_items == 0 || self.batch.max_items > 16 {
            eyre::bail!("batch.max_items must be in [1, 16]");
        }

        // Polling
        if self.polling.boost_ms == 0 {
            eyre::bail!("polling.boost_ms must be >= 1");
        }
        if self.polling.idle_ms <= self.polling.boost_ms {
            eyre::bail!("polling.idle_ms must be greater than polling.boost_ms");
        }
        if self.polling.idle_ms > 24 * 60 * 60 * 1000 {
            eyre::bail!("polling.idle_ms is unreasonably large (>24h)");
        }

        // Predictor
        let p = &self.predictor;
        if !(p.latency_alpha > 0.0 && p.latency_alpha <= 1.0) {
            eyre::bail!("predictor.latency_alpha must be in (0.0, 1.0]");
        }
        if !(p.forgetting > 0.0 && p.forgetting <= 1.0) {
            eyre::bail!("predictor.forgetting must be in (0.0, 1.0]");
        }
        if !(p.initial_covariance.is_finite() && p.initial_covariance > 0.0) {
            eyre::bail!("predictor.initial_covariance must be > 0.0");
        }
        if p.max_latency_ms == 0 {
            eyre::bail!("predictor.max_latency_ms must be >= 1");
        }
        if p.initial_latency_ms > p.max_latency_ms {
            eyre::bail!("predictor.initial_latency_ms must not exceed predictor.max_latency_ms");
        }

        // Diagnostics
        if self.diagnostics.history == 0 {
            eyre::bail!("diagnostics.history must be >= 1");
        }

        // Calibration: shape only; curve rules are enforced when settings are built
        for (shade, cal) in &self.calibration.shades {
            if shade.trim().is_empty() {
                eyre::bail!("calibration.shades keys must not be empty");
            }
            if cal.anchors.len() < 2 {
                eyre::bail!("calibration.shades.{shade}.anchors needs at least two anchors");
            }
        }

        // Visual groups: a shade may belong to one group only
        let mut owner: HashMap<&str, &str> = HashMap::new();
        for (group, cfg) in &self.visual_groups {
            if group.trim().is_empty() {
                eyre::bail!("visual_groups keys must not be empty");
            }
            for member in &cfg.members {
                if let Some(prev) = owner.insert(member.as_str(), group.as_str())
                    && prev != group.as_str()
                {
                    eyre::bail!(
                        "visual_groups: shade {member} is listed in both {prev} and {group}"
                    );
                }
            }
        }

        // Simulation
        if let Some(sim) = &self.simulation {
            for s in &sim.shades {
                if s.id.trim().is_empty() {
                    eyre::bail!("simulation.shades.id must not be empty");
                }
                if !(s.speed_raw_per_s.is_finite() && s.speed_raw_per_s > 0.0) {
                    eyre::bail!("simulation.shades.speed_raw_per_s must be > 0.0");
                }
            }
        }

        Ok(())
    }
}
