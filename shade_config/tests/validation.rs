use shade_config::load_toml;
use rstest::rstest;

const FULL: &str = r#"
[controller]
id = "living"
request_timeout_ms = 5000

[batch]
window_ms = 80
max_items = 16

[polling]
idle_ms = 12000
boost_ms = 1500
boost_window_ms = 10000

[predictor]
enabled = true
latency_alpha = 0.25

[calibration]
invert = true

[calibration.shades."12"]
anchors = [[0, 0], [50, 30000], [100, 65535]]

[calibration.shades."13"]
anchors = [{ pc = 0, raw = 1000 }, { pc = 100, raw = 64000 }]
invert = false

[visual_groups.front]
name = "Front windows"
members = ["12", "13"]

[visual_groups.back]
members = ["14"]
"#;

#[test]
fn empty_config_uses_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults must validate");
    assert_eq!(cfg.batch.window_ms, 80);
    assert_eq!(cfg.batch.max_items, 16);
    assert_eq!(cfg.polling.idle_ms, 12_000);
    assert_eq!(cfg.polling.boost_ms, 1_500);
    assert_eq!(cfg.polling.boost_window_ms, 10_000);
    assert!(cfg.predictor.enabled);
    assert_eq!(cfg.controller.position_max, u16::MAX);
    assert!(cfg.visual_groups.is_empty());
    assert!(cfg.simulation.is_none());
}

#[test]
fn full_config_parses_both_anchor_forms() {
    let cfg = load_toml(FULL).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert!(cfg.calibration.invert);
    let a = &cfg.calibration.shades["12"];
    assert_eq!(a.anchors.len(), 3);
    assert_eq!(a.anchors[1].percent, 50);
    assert_eq!(a.anchors[1].raw, 30000);
    assert_eq!(a.invert, None);
    let b = &cfg.calibration.shades["13"];
    assert_eq!(b.anchors[0].raw, 1000);
    assert_eq!(b.invert, Some(false));
    assert_eq!(cfg.visual_groups["front"].members, vec!["12", "13"]);
    assert_eq!(cfg.visual_groups["back"].name, "");
}

#[rstest]
#[case("[batch]\nwindow_ms = 0\n", "batch.window_ms must be >= 1")]
#[case("[batch]\nmax_items = 17\n", "batch.max_items must be in [1, 16]")]
#[case("[batch]\nmax_items = 0\n", "batch.max_items must be in [1, 16]")]
#[case(
    "[polling]\nidle_ms = 1000\nboost_ms = 1500\n",
    "polling.idle_ms must be greater than polling.boost_ms"
)]
#[case("[predictor]\nlatency_alpha = 0.0\n", "predictor.latency_alpha must be in (0.0, 1.0]")]
#[case("[predictor]\nforgetting = 1.5\n", "predictor.forgetting must be in (0.0, 1.0]")]
#[case(
    "[predictor]\ninitial_latency_ms = 2000\nmax_latency_ms = 1000\n",
    "predictor.initial_latency_ms must not exceed"
)]
#[case("[diagnostics]\nhistory = 0\n", "diagnostics.history must be >= 1")]
#[case("[controller]\nid = \" \"\n", "controller.id must not be empty")]
fn rejects_out_of_range_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn rejects_shade_in_two_groups() {
    let toml = r#"
[visual_groups.a]
members = ["1", "2"]

[visual_groups.b]
members = ["2"]
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("shade 2 is in two groups");
    let msg = format!("{err}");
    assert!(msg.contains("shade 2"), "{msg}");
}

#[test]
fn rejects_single_anchor_curve() {
    let toml = r#"
[calibration.shades."7"]
anchors = [[0, 0]]
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("one anchor is not a curve");
    assert!(format!("{err}").contains("calibration.shades.7.anchors"));
}

#[test]
fn rejects_non_positive_simulated_speed() {
    let toml = r#"
[[simulation.shades]]
id = "1"
speed_raw_per_s = 0.0
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("zero speed is invalid");
    assert!(format!("{err}").contains("speed_raw_per_s"));
}

#[test]
fn simulation_defaults_fill_in() {
    let toml = r#"
[[simulation.shades]]
id = "1"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid");
    let sim = cfg.simulation.expect("simulation section");
    assert_eq!(sim.shades[0].speed_raw_per_s, 6_000.0);
    assert_eq!(sim.shades[0].latency_ms, 300);
    assert!(sim.shades[0].connected);
    assert!(!sim.shades[0].reject_writes);
}
