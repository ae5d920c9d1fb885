//! User-editable settings shared by every engine operation.
//!
//! Operations take one [`SettingsHandle::snapshot`] at their start and use it
//! throughout, so a concurrent edit never produces a half-old, half-new view.
//! Edits build a complete new [`Settings`] and swap it in only after it
//! validated; a rejected edit leaves the previous value in effect.

use crate::calibration::{Anchor, CalibrationCurve, ShadeCalibration, anchors_from_pairs};
use crate::error::{CalibrationError, ShadeError};
use crate::groups::{VisualGroup, VisualGroupRegistry};
use shade_traits::{RAW_MAX, ShadeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct Settings {
    pub calibrations: HashMap<ShadeId, ShadeCalibration>,
    pub groups: VisualGroupRegistry,
    /// Applied to shades without a per-shade invert override.
    pub invert_default: bool,
    pub predictive_enabled: bool,
    /// Raw value of the 100% anchor in the identity curve.
    pub position_max: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            calibrations: HashMap::new(),
            groups: VisualGroupRegistry::default(),
            invert_default: false,
            predictive_enabled: true,
            position_max: RAW_MAX,
        }
    }
}

/// A configured calibration that failed validation and was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCalibration {
    pub shade: ShadeId,
    pub error: CalibrationError,
}

impl Settings {
    pub fn calibration_for(&self, shade: &ShadeId) -> ShadeCalibration {
        self.calibrations
            .get(shade)
            .cloned()
            .unwrap_or_else(|| ShadeCalibration::identity(self.position_max))
    }

    pub fn curve_for(&self, shade: &ShadeId) -> CalibrationCurve {
        self.calibration_for(shade).curve(self.invert_default)
    }

    /// Build settings from the loaded config.
    ///
    /// Invalid per-shade curves are skipped (the shade keeps the identity
    /// curve) and reported back; a group conflict fails the whole build.
    pub fn from_config(
        cfg: &shade_config::Config,
    ) -> Result<(Self, Vec<RejectedCalibration>), ShadeError> {
        let groups = VisualGroupRegistry::new(cfg.visual_groups.iter().map(|(id, g)| VisualGroup {
            id: id.clone(),
            name: g.name.clone(),
            members: g.members.iter().map(|m| ShadeId::from(m.as_str())).collect(),
        }))?;

        let mut calibrations = HashMap::new();
        let mut rejected = Vec::new();
        for (shade, cal) in &cfg.calibration.shades {
            let shade = ShadeId::from(shade.as_str());
            let built = anchors_from_pairs(cal.anchors.iter().map(|a| (a.percent, a.raw)))
                .and_then(|anchors| ShadeCalibration::new(anchors, cal.invert));
            match built {
                Ok(c) => {
                    calibrations.insert(shade, c);
                }
                Err(error) => {
                    tracing::warn!(%shade, %error, "ignoring invalid calibration");
                    rejected.push(RejectedCalibration { shade, error });
                }
            }
        }

        let settings = Self {
            calibrations,
            groups,
            invert_default: cfg.calibration.invert,
            predictive_enabled: cfg.predictor.enabled,
            position_max: cfg.controller.position_max,
        };
        Ok((settings, rejected))
    }
}

#[derive(Debug, Default)]
pub struct SettingsHandle {
    inner: RwLock<Arc<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        let guard = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Copy-on-write edit. `edit` works on a clone; nothing is stored unless
    /// it returns `Ok`.
    pub fn update(
        &self,
        edit: impl FnOnce(&mut Settings) -> Result<(), ShadeError>,
    ) -> Result<Arc<Settings>, ShadeError> {
        let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut next = Settings::clone(&guard);
        edit(&mut next)?;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        Ok(next)
    }

    pub fn replace(&self, settings: Settings) {
        let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Arc::new(settings);
    }

    pub fn set_calibration(
        &self,
        shade: &ShadeId,
        anchors: Vec<Anchor>,
        invert_override: Option<bool>,
    ) -> Result<(), ShadeError> {
        let cal = ShadeCalibration::new(anchors, invert_override)?;
        self.update(|s| {
            s.calibrations.insert(shade.clone(), cal);
            Ok(())
        })
        .map(|_| ())
    }

    pub fn set_groups(&self, groups: Vec<VisualGroup>) -> Result<(), ShadeError> {
        let registry = VisualGroupRegistry::new(groups)?;
        self.update(|s| {
            s.groups = registry;
            Ok(())
        })
        .map(|_| ())
    }

    pub fn set_predictive(&self, enabled: bool) {
        let _ = self.update(|s| {
            s.predictive_enabled = enabled;
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_calibration_keeps_previous_curve() {
        let handle = SettingsHandle::default();
        let id = ShadeId::from("s");
        handle
            .set_calibration(
                &id,
                vec![Anchor::new(0, 0), Anchor::new(50, 100), Anchor::new(100, 200)],
                None,
            )
            .unwrap();
        let before = handle.snapshot().curve_for(&id);
        let err = handle
            .set_calibration(&id, vec![Anchor::new(0, 0), Anchor::new(90, 5)], None)
            .unwrap_err();
        assert_eq!(
            err,
            ShadeError::InvalidCalibration(CalibrationError::Endpoints)
        );
        assert_eq!(handle.snapshot().curve_for(&id), before);
    }

    #[test]
    fn snapshot_is_stable_across_updates() {
        let handle = SettingsHandle::default();
        let old = handle.snapshot();
        handle.set_predictive(false);
        assert!(old.predictive_enabled);
        assert!(!handle.snapshot().predictive_enabled);
    }

    #[test]
    fn from_config_skips_bad_curves() {
        let cfg = shade_config::load_toml(
            r#"
            [calibration]
            invert = true
            [calibration.shades."good"]
            anchors = [[0, 0], [100, 1000]]
            invert = false
            [calibration.shades."bad"]
            anchors = [[0, 0], [60, 500], [40, 600], [100, 1000]]
            "#,
        )
        .unwrap();
        let (settings, rejected) = Settings::from_config(&cfg).unwrap();
        assert_eq!(
            rejected,
            vec![RejectedCalibration {
                shade: "bad".into(),
                error: CalibrationError::PercentOrder { index: 2 }
            }]
        );
        assert!(!settings.curve_for(&"good".into()).invert_axis());
        // falls back to identity with the global invert
        let bad = settings.curve_for(&"bad".into());
        assert!(bad.invert_axis());
        assert_eq!(bad.anchors().len(), 2);
    }

    #[test]
    fn from_config_rejects_group_conflicts() {
        let cfg = shade_config::load_toml(
            r#"
            [visual_groups.a]
            members = ["1"]
            [visual_groups.b]
            members = ["1"]
            "#,
        )
        .unwrap();
        assert!(matches!(
            Settings::from_config(&cfg),
            Err(ShadeError::GroupConflict { .. })
        ));
    }
}
