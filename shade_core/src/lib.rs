#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Shade control engine (transport-agnostic).
//!
//! This crate coordinates motorized shades behind a controller that only
//! exposes position get/set. All controller interactions go through
//! `shade_traits::ShadeController`.
//!
//! ## Architecture
//!
//! - **Calibration**: per-shade piecewise-linear percent ↔ raw curves (`calibration`)
//! - **Groups**: visual groups and the cohorts stops are scoped to (`groups`)
//! - **Estimator**: online speed/latency model per shade (`estimator`)
//! - **Batching**: 80 ms write coalescing, ≤16 shades per write (`batcher`, `batch_worker`)
//! - **Stop planning**: predictive or freeze-at-last-position stops (`planner`)
//! - **Cadence**: idle/boost polling intervals (`cadence`, `poller`)
//! - **Engine**: the facade tying it together (`engine`, `builder`)
//!
//! ## Raw positions
//!
//! Controllers report positions as `u16` raw values. Percent is only used at
//! the edges (commands in, diagnostics out) and always goes through the
//! shade's calibration curve.

pub mod batch_worker;
pub mod batcher;
pub mod builder;
pub mod cadence;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod groups;
pub mod mocks;
pub mod planner;
pub mod poller;
pub mod settings;
pub mod shade;
pub mod util;

pub use batch_worker::{FlushOutcome, ShadeWriteStatus, WriteTicket};
pub use calibration::{Anchor, CalibrationCurve, ShadeCalibration, percent_to_raw, raw_to_percent};
pub use config::{BatchCfg, EngineCfg, EstimatorCfg, PollingCfg};
pub use diagnostics::DiagnosticsSnapshot;
pub use engine::{Command, CommandReceipt, PollSummary, ShadeEngine};
pub use error::{BuildError, CalibrationError, ShadeError};
pub use groups::{Cohort, VisualGroup, VisualGroupRegistry};
pub use planner::{StopPlan, StopSource};
pub use settings::{Settings, SettingsHandle};
pub use shade::Shade;
