use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use shade_core::estimator::Estimator;
use shade_core::{Anchor, CalibrationCurve, EstimatorCfg, percent_to_raw, raw_to_percent};
use shade_traits::ShadeId;
use std::time::{Duration, Instant};

fn eleven_point_curve() -> CalibrationCurve {
    // Uneven spacing so every segment has its own slope.
    let anchors = (0..=10u16)
        .map(|i| Anchor::new((i * 10) as u8, i * i * 600))
        .collect();
    CalibrationCurve::new(anchors, false).unwrap()
}

fn configure(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    // Allow quick tweaking without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p shade_core --bench mapper
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(Duration::from_millis(ms_u64));
    }
}

pub fn bench_curve(c: &mut Criterion) {
    let mut g = c.benchmark_group("curve");
    configure(&mut g);

    for (name, curve) in [
        ("identity", CalibrationCurve::identity(u16::MAX, false)),
        ("eleven_point", eleven_point_curve()),
        ("eleven_point_inverted", {
            let base = eleven_point_curve();
            CalibrationCurve::new(base.anchors().to_vec(), true).unwrap()
        }),
    ] {
        g.bench_function(format!("percent_to_raw_{name}"), |b| {
            b.iter(|| {
                let mut acc = 0u32;
                for p in 0..=1_000u32 {
                    acc += u32::from(percent_to_raw(&curve, black_box(f64::from(p) / 10.0)));
                }
                black_box(acc)
            })
        });
        g.bench_function(format!("raw_to_percent_{name}"), |b| {
            b.iter(|| {
                let mut acc = 0.0f64;
                for r in (0..=u16::MAX).step_by(64) {
                    acc += raw_to_percent(&curve, black_box(r));
                }
                black_box(acc)
            })
        });
    }
    g.finish();
}

pub fn bench_estimator(c: &mut Criterion) {
    let mut g = c.benchmark_group("estimator");
    configure(&mut g);

    let shade = ShadeId::from("bench");
    g.bench_function("record_sample_moving", |b| {
        b.iter_batched(
            || {
                let t0 = Instant::now();
                let mut est = Estimator::new(EstimatorCfg::default());
                est.record_sample(&shade, 0, t0);
                est.record_command(&shade, u16::MAX, t0);
                (est, t0)
            },
            |(mut est, t0)| {
                for i in 1..=500u32 {
                    let at = t0 + Duration::from_millis(u64::from(i) * 100);
                    let raw = (i * 120).min(u32::from(u16::MAX - 1)) as u16;
                    black_box(est.record_sample(&shade, raw, at));
                }
                black_box(est)
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

criterion_group!(mapper, bench_curve, bench_estimator);
criterion_main!(mapper);
