//! Percent ↔ raw mapping through a per-shade piecewise-linear curve.
//!
//! A curve is an ordered list of `(percent, raw)` anchors: percent strictly
//! ascending from 0 to 100, raw non-decreasing (flat runs allowed). Curves are
//! immutable and validated on construction, so an invalid curve can never be
//! attached to a shade. Replacing a curve means building a new one.
//!
//! Inversion flips the percent axis: with `invert_axis` set, 100% maps to the
//! raw value of the 0% anchor and vice versa.

use crate::error::CalibrationError;
use shade_traits::RAW_MAX;
use std::sync::Arc;

/// Percent coalescing distance used by the assisted calibration helpers.
pub const ASSISTED_PERCENT_EPSILON: u8 = 1;
/// Raw distance under which a re-captured anchor is considered unchanged.
pub const ASSISTED_RAW_EPSILON: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub percent: u8,
    pub raw: u16,
}

impl Anchor {
    pub const fn new(percent: u8, raw: u16) -> Self {
        Self { percent, raw }
    }
}

/// Convert loosely typed anchor pairs (as parsed from TOML/CSV) into anchors,
/// checking the numeric ranges. Curve rules are checked by [`validate`].
pub fn anchors_from_pairs(
    pairs: impl IntoIterator<Item = (i64, i64)>,
) -> Result<Vec<Anchor>, CalibrationError> {
    pairs
        .into_iter()
        .enumerate()
        .map(|(index, (percent, raw))| {
            let percent = u8::try_from(percent)
                .ok()
                .filter(|p| *p <= 100)
                .ok_or(CalibrationError::PercentRange { index, percent })?;
            let raw = u16::try_from(raw).map_err(|_| CalibrationError::RawRange { index, raw })?;
            Ok(Anchor { percent, raw })
        })
        .collect()
}

/// Check the curve rules: at least two anchors, 0% first, 100% last, percent
/// strictly ascending, raw non-decreasing.
pub fn validate(anchors: &[Anchor]) -> Result<(), CalibrationError> {
    if anchors.len() < 2 {
        return Err(CalibrationError::TooFewAnchors {
            count: anchors.len(),
        });
    }
    let (Some(first), Some(last)) = (anchors.first(), anchors.last()) else {
        return Err(CalibrationError::TooFewAnchors { count: 0 });
    };
    if first.percent != 0 || last.percent != 100 {
        return Err(CalibrationError::Endpoints);
    }
    for (offset, pair) in anchors.windows(2).enumerate() {
        let index = offset + 1;
        if pair[1].percent <= pair[0].percent {
            return Err(CalibrationError::PercentOrder { index });
        }
        if pair[1].raw < pair[0].raw {
            return Err(CalibrationError::RawDecreasing { index });
        }
    }
    Ok(())
}

/// A validated curve with a resolved inversion flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationCurve {
    anchors: Arc<[Anchor]>,
    invert_axis: bool,
}

impl CalibrationCurve {
    pub fn new(anchors: Vec<Anchor>, invert_axis: bool) -> Result<Self, CalibrationError> {
        validate(&anchors)?;
        Ok(Self {
            anchors: anchors.into(),
            invert_axis,
        })
    }

    /// Two-anchor identity curve `0 → 0, 100 → max_raw`.
    pub fn identity(max_raw: u16, invert_axis: bool) -> Self {
        Self {
            anchors: Arc::from([Anchor::new(0, 0), Anchor::new(100, max_raw)]),
            invert_axis,
        }
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn invert_axis(&self) -> bool {
        self.invert_axis
    }

    pub fn percent_to_raw(&self, percent: f64) -> u16 {
        percent_to_raw(self, percent)
    }

    pub fn raw_to_percent(&self, raw: u16) -> f64 {
        raw_to_percent(self, raw)
    }
}

/// Map a 0–100 percent (as seen by the entity layer) to a raw target.
///
/// Percent is clamped to [0, 100]; inversion is applied before lookup. A
/// percent that lands exactly on an anchor returns that anchor's raw value.
pub fn percent_to_raw(curve: &CalibrationCurve, percent: f64) -> u16 {
    let mut p = if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    if curve.invert_axis {
        p = 100.0 - p;
    }
    for pair in curve.anchors.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if p > f64::from(end.percent) {
            continue;
        }
        if p == f64::from(start.percent) {
            return start.raw;
        }
        if p == f64::from(end.percent) {
            return end.raw;
        }
        let span = f64::from(end.percent) - f64::from(start.percent);
        let ratio = (p - f64::from(start.percent)) / span;
        let raw = f64::from(start.raw) + (f64::from(end.raw) - f64::from(start.raw)) * ratio;
        return raw.round().clamp(0.0, f64::from(RAW_MAX)) as u16;
    }
    curve.anchors.last().map_or(0, |a| a.raw)
}

/// Map a raw position back to a 0–100 percent (unrounded).
///
/// Raw values outside the curve's span clamp to its ends. On a flat run the
/// lowest percent of the run is returned, so the inverse is deterministic.
pub fn raw_to_percent(curve: &CalibrationCurve, raw: u16) -> f64 {
    let (Some(first), Some(last)) = (curve.anchors.first(), curve.anchors.last()) else {
        return 0.0;
    };
    let r = raw.clamp(first.raw, last.raw);
    let mut pct = f64::from(last.percent);
    for pair in curve.anchors.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if r > end.raw {
            continue;
        }
        if r <= start.raw {
            pct = f64::from(start.percent);
        } else {
            // r > start.raw and r <= end.raw, so the segment is not flat here
            let span = f64::from(end.raw) - f64::from(start.raw);
            let ratio = (f64::from(r) - f64::from(start.raw)) / span;
            pct = f64::from(start.percent)
                + (f64::from(end.percent) - f64::from(start.percent)) * ratio;
        }
        break;
    }
    if curve.invert_axis { 100.0 - pct } else { pct }
}

/// Per-shade calibration: validated anchors plus an optional invert override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadeCalibration {
    anchors: Arc<[Anchor]>,
    invert_override: Option<bool>,
}

impl ShadeCalibration {
    pub fn new(anchors: Vec<Anchor>, invert_override: Option<bool>) -> Result<Self, CalibrationError> {
        validate(&anchors)?;
        Ok(Self {
            anchors: anchors.into(),
            invert_override,
        })
    }

    pub fn identity(max_raw: u16) -> Self {
        Self {
            anchors: Arc::from([Anchor::new(0, 0), Anchor::new(100, max_raw)]),
            invert_override: None,
        }
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn invert_override(&self) -> Option<bool> {
        self.invert_override
    }

    /// Resolve against the global invert default.
    pub fn curve(&self, global_invert: bool) -> CalibrationCurve {
        CalibrationCurve {
            anchors: Arc::clone(&self.anchors),
            invert_axis: self.invert_override.unwrap_or(global_invert),
        }
    }

    /// Insert or replace an anchor captured during assisted calibration.
    ///
    /// An existing anchor within [`ASSISTED_PERCENT_EPSILON`] is replaced,
    /// unless its raw value is already within [`ASSISTED_RAW_EPSILON`], in
    /// which case nothing changes and `false` is returned.
    pub fn with_assisted_anchor(
        &self,
        percent: u8,
        raw: u16,
    ) -> Result<(Self, bool), CalibrationError> {
        let percent = percent.min(100);
        let mut anchors: Vec<Anchor> = self.anchors.to_vec();
        if let Some(existing) = anchors
            .iter_mut()
            .find(|a| a.percent.abs_diff(percent) <= ASSISTED_PERCENT_EPSILON)
        {
            if existing.raw.abs_diff(raw) <= ASSISTED_RAW_EPSILON {
                return Ok((self.clone(), false));
            }
            existing.raw = raw;
        } else {
            let at = anchors
                .iter()
                .position(|a| percent < a.percent)
                .unwrap_or(anchors.len());
            anchors.insert(at, Anchor::new(percent, raw));
        }
        let next = Self::new(anchors, self.invert_override)?;
        Ok((next, true))
    }
}

/// Midpoint of the largest percent gap across a cohort's anchors.
///
/// Anchor percents from all curves are merged, points within `epsilon` of an
/// already kept point are coalesced, and the widest gap wins (earliest on
/// ties). Returns `default` when there is nothing to compare.
pub fn largest_gap_target<'a>(
    curves: impl IntoIterator<Item = &'a [Anchor]>,
    epsilon: u8,
    default: u8,
) -> u8 {
    let mut all: Vec<u8> = curves
        .into_iter()
        .flat_map(|anchors| anchors.iter().map(|a| a.percent))
        .collect();
    all.sort_unstable();
    let mut points: Vec<u8> = Vec::with_capacity(all.len());
    for p in all {
        if points.last().is_none_or(|last| p.abs_diff(*last) > epsilon) {
            points.push(p);
        }
    }
    if points.len() < 2 {
        return default;
    }
    let mut best_gap = 0u8;
    let mut target = default;
    for pair in points.windows(2) {
        let gap = pair[1] - pair[0];
        if gap > best_gap {
            best_gap = gap;
            target = pair[0] + gap / 2;
        }
    }
    target.min(100)
}
