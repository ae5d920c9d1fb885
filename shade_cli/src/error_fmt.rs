//! Human-readable error descriptions and structured JSON error formatting.

use shade_core::{BuildError, CalibrationError, ShadeError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingController => {
                "What happened: No controller was provided to the shade engine.\nLikely causes: The simulated controller failed to initialize or was not wired into the builder.\nHow to fix: Ensure a controller is passed via with_controller(...) or with_shared_controller(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid engine configuration ({msg}).\nLikely causes: Out-of-range timings in [batch], [polling] or [predictor].\nHow to fix: Edit the config file, then rerun `shadectl check-config`."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CalibrationError>() {
        return calibration_hint(ce);
    }

    if let Some(se) = err.downcast_ref::<ShadeError>() {
        return match se {
            ShadeError::Timeout => "What happened: The controller did not answer in time.\nLikely causes: Controller overloaded or unreachable, or controller.request_timeout_ms too low.\nHow to fix: Check the controller's connection and consider raising controller.request_timeout_ms in the config.".to_string(),
            ShadeError::Controller(msg) => format!(
                "What happened: The controller reported an error ({msg}).\nLikely causes: Controller offline or refusing requests.\nHow to fix: Check that the controller is reachable, then retry."
            ),
            ShadeError::AllFailed { reason } => format!(
                "What happened: No shade accepted the write ({reason}).\nLikely causes: Controller unreachable, or every targeted shade is disconnected.\nHow to fix: Check the controller and the shades' connection status, then resend the command."
            ),
            ShadeError::PartialFailure { failed } => format!(
                "What happened: Some shades did not accept the write ({}).\nLikely causes: Those shades are disconnected or faulted.\nHow to fix: Check the listed shades; the others moved as requested.",
                failed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ),
            ShadeError::GroupConflict { shade, first, second } => format!(
                "What happened: Shade {shade} is listed in two visual groups ({first} and {second}).\nLikely causes: A shade was added to a new group without removing it from the old one.\nHow to fix: Keep each shade in at most one [visual_groups.<id>] members list."
            ),
            ShadeError::InvalidCalibration(ce) => calibration_hint(ce),
            ShadeError::UnknownShade(id) => format!(
                "What happened: Shade {id} is not known to the engine.\nLikely causes: Typo in the shade id, or the controller has not reported it yet.\nHow to fix: Check the id against `status` output, or poll first."
            ),
            ShadeError::UnknownGroup(id) => format!(
                "What happened: Visual group {id} does not exist.\nLikely causes: Typo in the group id.\nHow to fix: Use an id from the [visual_groups] section of the config."
            ),
            // Fallback to generic for other domain errors
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if err.downcast_ref::<toml::de::Error>().is_some() {
        return format!(
            "What happened: The config file is not valid TOML.\nLikely causes: A syntax error or a value of the wrong type.\nHow to fix: Fix the file; the parser said: {err}"
        );
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    // Calibration CSV header special-case
    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'percent,raw'.".to_string();
    }

    if lower.contains("[simulation]") {
        return "What happened: The config has no simulated shades.\nLikely causes: The [[simulation.shades]] entries are missing.\nHow to fix: Add at least one [[simulation.shades]] entry with an id.".to_string();
    }

    if lower.contains(" must ") || lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: A missing or out-of-range value.\nHow to fix: Edit the TOML config and try again."
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

fn calibration_hint(ce: &CalibrationError) -> String {
    format!(
        "What happened: Calibration anchors were rejected ({ce}).\nLikely causes: Anchors out of order, a raw value that decreases, or missing 0%/100% endpoints.\nHow to fix: List anchors from 0% to 100% with non-decreasing raw values."
    )
}

/// Stable name for the error, used as `reason` in JSON output.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(se) = err.downcast_ref::<ShadeError>() {
        return match se {
            ShadeError::InvalidCalibration(_) => "InvalidCalibration",
            ShadeError::Uninitialized(_) => "Uninitialized",
            ShadeError::PartialFailure { .. } => "PartialFailure",
            ShadeError::AllFailed { .. } => "AllFailed",
            ShadeError::SkippedNoPosition(_) => "SkippedNoPosition",
            ShadeError::UnknownShade(_) => "UnknownShade",
            ShadeError::UnknownGroup(_) => "UnknownGroup",
            ShadeError::GroupConflict { .. } => "GroupConflict",
            ShadeError::Controller(_) => "Controller",
            ShadeError::Timeout => "Timeout",
            ShadeError::Shutdown => "Shutdown",
        };
    }
    if err.downcast_ref::<CalibrationError>().is_some() {
        return "InvalidCalibration";
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    "Error"
}

/// Map engine failures to stable exit codes; everything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<ShadeError>() {
        Some(ShadeError::Timeout) => 3,
        Some(ShadeError::Controller(_)) => 4,
        Some(ShadeError::AllFailed { .. } | ShadeError::PartialFailure { .. }) => 5,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shade_traits::ShadeId;

    #[rstest]
    #[case(ShadeError::Timeout, "did not answer in time", 3)]
    #[case(ShadeError::Controller("connection refused".into()), "connection refused", 4)]
    #[case(ShadeError::AllFailed { reason: "motor fault".into() }, "motor fault", 5)]
    #[case(ShadeError::PartialFailure { failed: vec![ShadeId::from("a")] }, "(a)", 5)]
    #[case(ShadeError::UnknownGroup("x".into()), "Visual group x", 1)]
    #[case(ShadeError::Shutdown, "shutting down", 1)]
    fn shade_errors_are_explained(#[case] e: ShadeError, #[case] needle: &str, #[case] code: i32) {
        let report = eyre::Report::new(e);
        let text = humanize(&report);
        assert!(text.contains(needle), "{text}");
        assert_eq!(exit_code_for_error(&report), code);
    }

    #[test]
    fn csv_header_message_is_short() {
        let report = eyre::eyre!("calibration CSV must have headers 'percent,raw', got: a,b");
        assert_eq!(
            humanize(&report),
            "Invalid headers in calibration CSV. Expected 'percent,raw'."
        );
    }

    #[test]
    fn json_error_carries_reason() {
        let report = eyre::Report::new(ShadeError::Timeout);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&report)).unwrap();
        assert_eq!(v["reason"], "Timeout");
        assert!(v["message"].as_str().unwrap().starts_with("What happened"));
    }

    #[test]
    fn unknown_errors_fall_back_to_generic_text() {
        let report = eyre::eyre!("disk on fire");
        assert!(humanize(&report).starts_with("Something went wrong."));
        assert_eq!(reason_name(&report), "Error");
    }
}
