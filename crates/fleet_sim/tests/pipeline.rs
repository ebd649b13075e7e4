//! File-to-file runs through the same helpers the binary uses.

use fleet_core::{AgentMode, FailureSource, Loss, LossSchedule, RunConfig, Simulation};
use fleet_sim::output::{write_results_file, RunRecorder};
use fleet_sim::summarize::{read_summary, summarize_files, RunSummary};
use fleet_sim::{losses, read_scenarios_file, run_batch, ParamFile};
use std::fs;

const SCENARIOS: &str = "\
perimeter,capacity,v_nominal,v_max,sensing_radius,nominal_spacing,policy,density_threshold,speed_threshold,adaptation_window,failure_rate,failure_count,failure_distribution,initial_active,spare_trigger_ratio,spare_target_factor,neighbor_balance_factor,strike_fraction,seed
100,12,1.0,2.0,20,10,0,0.9,1.5,5,0.02,2,0,10,0.9,1.0,1.0,0,101
100,12,1.0,2.0,20,10,3,0.9,1.5,5,0.02,2,1,10,0.9,1.0,1.0,0,102
100,12,1.0,2.0,20,10,4,0.9,1.5,5,0.02,2,2,10,0.9,1.0,1.0,0,103
";

#[test]
fn batch_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scenarios.csv");
    let output = dir.path().join("results.csv");
    fs::write(&input, SCENARIOS).unwrap();

    let scenarios = read_scenarios_file(&input).unwrap();
    assert_eq!(scenarios.len(), 3);
    let results = run_batch(scenarios, &RunConfig::default().with_steps(800), 0).unwrap();
    write_results_file(&output, &results).unwrap();

    let mut reader = csv::Reader::from_path(&output).unwrap();
    let headers = reader.headers().unwrap().clone();
    let seed_col = headers.iter().position(|h| h == "seed").unwrap();
    let density_col = headers.iter().position(|h| h == "density").unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);
    for (row, seed) in rows.iter().zip(["101", "102", "103"]) {
        assert_eq!(&row[seed_col], seed);
        let density: f64 = row[density_col].parse().unwrap();
        assert!((0.0..=1.0).contains(&density));
    }
}

#[test]
fn parameter_run_with_generated_losses() {
    let dir = tempfile::tempdir().unwrap();
    let loss_path = dir.path().join("losses.csv");
    let summary_path = dir.path().join("run_a").join("summary.csv");
    let trace_path = dir.path().join("trace.csv");
    fs::create_dir_all(summary_path.parent().unwrap()).unwrap();

    let params = ParamFile::parse(
        "n=20\nperimeter=100\nd_star=5\nsteps=300\nnum_losses=2\nseed=7\nresilience=1\n",
    )
    .unwrap();
    let schedule =
        losses::load_or_generate(&loss_path, params.num_losses, params.seed, params.steps, params.n)
            .unwrap();
    assert!(loss_path.exists());
    let first_loss = schedule.losses()[0].step;

    let simulation = Simulation::new(
        params.scenario(),
        params.run_config(),
        FailureSource::Scheduled(schedule),
    )
    .unwrap();
    let mut recorder = RunRecorder::create(Some(&summary_path), Some(&trace_path)).unwrap();
    let metrics = simulation.run_with(&mut recorder);
    recorder.finish().unwrap();

    assert!(metrics.failures >= 1 && metrics.failures <= 2);
    assert!(metrics.formation_stability > 0.0 && metrics.formation_stability <= 1.0);

    let rows = read_summary(fs::File::open(&summary_path).unwrap()).unwrap();
    assert_eq!(rows.len(), 300);
    assert!(rows[0].alive >= 19 && rows[0].alive <= 20);

    let trace = fs::read_to_string(&trace_path).unwrap();
    // Header plus one line per slot per step
    assert_eq!(trace.lines().count(), 1 + 300 * 20);

    let runs = summarize_files(&[summary_path.clone()], first_loss).unwrap();
    assert_eq!(runs.len(), 1);
    let run: &RunSummary = &runs[0];
    assert_eq!(run.run, "run_a");
    assert_eq!(run.end.samples, 60);
    assert!(run.end.mean_gap.is_some());
}

#[test]
fn parameter_run_replaces_losses_with_held_spares() {
    let params = ParamFile::parse(
        "n=10\nperimeter=100\nd_star=8\nsteps=100\nnum_losses=1\nresilience=1\nincoming_hold_steps=3\n",
    )
    .unwrap();
    let schedule = LossSchedule::new(vec![Loss { step: 20, slot: 2 }, Loss { step: 40, slot: 5 }]);
    let mut sim = Simulation::new(
        params.scenario(),
        params.run_config(),
        FailureSource::Scheduled(schedule),
    )
    .unwrap();

    // Spread over the perimeter, not at d_star
    assert_eq!(sim.ring().agent(1).position, 10.0);
    assert_eq!(sim.ring().agent(9).position, 90.0);

    while sim.current_step() <= 20 {
        sim.step();
    }
    // Nothing is inserted on the step of the loss itself
    assert_eq!(sim.spares_inserted(), 0);
    sim.step();
    assert_eq!(sim.spares_inserted(), 1);
    let spare = sim.ring().agent(2);
    assert!(spare.alive);
    assert_eq!(spare.velocity, 1.0);
    assert_eq!(spare.mode, AgentMode::Incoming { remaining: 2 });

    // The second loss exceeds num_losses and is not replaced
    let metrics = sim.run();
    assert_eq!(metrics.failures, 2);
    assert_eq!(metrics.spares_inserted, 1);
    assert_eq!(metrics.active_count, 9);
}
