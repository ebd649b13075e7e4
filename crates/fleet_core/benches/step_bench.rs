//! Step Loop Benchmarks
//!
//! Measures the per-step cost of the engine across fleet sizes and both
//! gap strategies, plus one full stochastic scenario.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fleet_core::{ControlPolicy, GapStrategy, RunConfig, Scenario, Simulation};
use std::time::Duration;

fn scenario(capacity: usize) -> Scenario {
    Scenario {
        perimeter: capacity as f64 * 10.0,
        capacity,
        initial_active: capacity - capacity / 10,
        policy: ControlPolicy::StateAware,
        failure_rate: 0.02,
        failure_count: capacity / 5,
        seed: 7,
        ..Default::default()
    }
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");
    group.measurement_time(Duration::from_secs(3));

    for capacity in [10usize, 100, 1000] {
        for strategy in [GapStrategy::PositionSorted, GapStrategy::IndexRing] {
            let config = RunConfig::default()
                .with_steps(u64::MAX)
                .with_gap_strategy(strategy);
            let mut sim = Simulation::stochastic(scenario(capacity), config).unwrap();
            group.bench_function(BenchmarkId::new(format!("{strategy:?}"), capacity), |b| {
                b.iter(|| {
                    sim.step();
                    black_box(sim.ring().living_count())
                })
            });
        }
    }
    group.finish();
}

fn bench_full_scenario(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenario");
    group.sample_size(10);

    group.bench_function("state_aware_100_agents_5000_steps", |b| {
        b.iter(|| {
            let sim = Simulation::stochastic(scenario(100), RunConfig::default()).unwrap();
            black_box(sim.run())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_step, bench_full_scenario);
criterion_main!(benches);
