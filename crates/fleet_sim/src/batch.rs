//! Scenario Batch Driver
//!
//! Seeds are resolved in input order before any work starts, then every
//! scenario runs on the rayon pool with its own ring and generator. Results
//! come back in input order.

use anyhow::{Context, Result};
use fleet_core::{Metrics, RunConfig, Scenario, Simulation};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// The scenario as simulated, seed resolved
    pub scenario: Scenario,
    pub metrics: Metrics,
}

/// Seconds since the Unix epoch, 0 if the clock is before it.
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Run every scenario under the stochastic failure model.
pub fn run_batch(
    mut scenarios: Vec<Scenario>,
    config: &RunConfig,
    clock_secs: u64,
) -> Result<Vec<BatchResult>> {
    for (index, scenario) in scenarios.iter_mut().enumerate() {
        if !scenario.is_reproducible() {
            let seed = scenario.resolve_seed(index, clock_secs);
            debug!(index, seed, "Derived seed from clock");
        }
    }

    let total = scenarios.len();
    let done = AtomicUsize::new(0);
    let progress_every = (total / 10).max(1);
    let start = Instant::now();
    info!(scenarios = total, steps = config.steps, "Starting batch");

    let results = scenarios
        .into_par_iter()
        .enumerate()
        .map(|(index, scenario)| {
            let metrics = Simulation::stochastic(scenario.clone(), config.clone())
                .with_context(|| format!("Scenario {index} is not runnable"))?
                .run();
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if finished % progress_every == 0 || finished == total {
                info!(finished, total, "Batch progress");
            }
            Ok(BatchResult { scenario, metrics })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        scenarios = total,
        duration_secs = start.elapsed().as_secs_f64(),
        "Batch complete"
    );
    Ok(results)
}
