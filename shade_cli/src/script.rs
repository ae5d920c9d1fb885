//! Line-oriented command scripts for `shadectl run`.
//!
//! One command per line; blank lines and `#` comments are ignored.
//!
//! ```text
//! open kitchen
//! set kitchen 40
//! sleep 500
//! stop kitchen
//! stop-group living
//! capture group:living 50
//! ```

use eyre::{Result, WrapErr};
use shade_core::{Cohort, Command};
use shade_traits::ShadeId;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Move { shade: ShadeId, command: Command },
    /// Stop one or more shades; each touched cohort gets its own plan.
    Stop(Vec<ShadeId>),
    StopGroup(String),
    Boost,
    Poll,
    Sleep(Duration),
    Status,
    Diag,
    /// Suggest the next assisted-calibration percent for a cohort.
    Assist(Cohort),
    Capture { cohort: Cohort, percent: u8 },
    Quit,
}

/// Parse one script line; `Ok(None)` for blanks and comments.
pub fn parse_line(line: &str) -> Result<Option<Step>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let step = match (verb, args.as_slice()) {
        ("open", [shade]) => Step::Move {
            shade: ShadeId::from(*shade),
            command: Command::Open,
        },
        ("close", [shade]) => Step::Move {
            shade: ShadeId::from(*shade),
            command: Command::Close,
        },
        ("set", [shade, percent]) => Step::Move {
            shade: ShadeId::from(*shade),
            command: Command::SetPercent(parse_percent(percent)?),
        },
        ("stop", shades) if !shades.is_empty() => {
            Step::Stop(shades.iter().map(|s| ShadeId::from(*s)).collect())
        }
        ("stop-group", [group]) => Step::StopGroup((*group).to_string()),
        ("boost", []) => Step::Boost,
        ("poll", []) => Step::Poll,
        ("sleep", [ms]) => {
            let ms: u64 = ms
                .parse()
                .wrap_err_with(|| format!("sleep takes milliseconds, got {ms:?}"))?;
            Step::Sleep(Duration::from_millis(ms))
        }
        ("status", []) => Step::Status,
        ("diag", []) => Step::Diag,
        ("assist", [cohort]) => Step::Assist(parse_cohort(cohort)?),
        ("capture", [cohort, percent]) => {
            let percent: u8 = percent
                .parse()
                .ok()
                .filter(|p| *p <= 100)
                .ok_or_else(|| eyre::eyre!("capture percent must be a whole number in 0-100, got {percent:?}"))?;
            Step::Capture {
                cohort: parse_cohort(cohort)?,
                percent,
            }
        }
        ("quit" | "exit", []) => Step::Quit,
        (
            "open" | "close" | "set" | "stop" | "stop-group" | "boost" | "poll" | "sleep"
            | "status" | "diag" | "assist" | "capture" | "quit" | "exit",
            _,
        ) => eyre::bail!("wrong number of arguments for {verb:?}"),
        _ => eyre::bail!("unknown command {verb:?}"),
    };
    Ok(Some(step))
}

fn parse_percent(s: &str) -> Result<f64> {
    let p: f64 = s
        .parse()
        .wrap_err_with(|| format!("percent must be a number, got {s:?}"))?;
    if !(0.0..=100.0).contains(&p) {
        eyre::bail!("percent must be within 0-100, got {p}");
    }
    Ok(p)
}

/// `all`, `group:<id>` or `shade:<id>`.
pub fn parse_cohort(s: &str) -> Result<Cohort> {
    match s.split_once(':') {
        None if s == "all" => Ok(Cohort::All),
        Some(("group", id)) if !id.is_empty() => Ok(Cohort::Group(id.to_string())),
        Some(("shade", id)) if !id.is_empty() => Ok(Cohort::Standalone(ShadeId::from(id))),
        _ => eyre::bail!("cohort must be all, group:<id> or shade:<id>, got {s:?}"),
    }
}
