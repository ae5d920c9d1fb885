#![no_main]
use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shade_core::calibration::anchors_from_pairs;
use shade_core::CalibrationCurve;

#[derive(Debug, Arbitrary)]
struct Input {
    pairs: Vec<(i64, i64)>,
    invert: bool,
    raws: Vec<u16>,
}

fuzz_target!(|input: Input| {
    let Ok(anchors) = anchors_from_pairs(input.pairs) else {
        return;
    };
    let Ok(curve) = CalibrationCurve::new(anchors, input.invert) else {
        return;
    };
    for raw in input.raws {
        let p = curve.raw_to_percent(raw);
        assert!((0.0..=100.0).contains(&p), "percent {p} out of range");
        let _ = curve.percent_to_raw(p);
    }
    // Anchors map exactly.
    for a in curve.anchors() {
        let percent = if curve.invert_axis() {
            100.0 - f64::from(a.percent)
        } else {
            f64::from(a.percent)
        };
        assert_eq!(curve.percent_to_raw(percent), a.raw);
    }
});
