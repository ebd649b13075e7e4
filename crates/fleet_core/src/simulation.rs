//! Single-scenario engine.
//!
//! Step order is fixed:
//!
//! 1. failure source (stochastic injector or loss schedule)
//! 2. gap pass
//! 3. velocity pass, then observers
//! 4. mode-transition pass
//! 5. spare insertion (gaps are recomputed after an insertion)
//! 6. position advance
//! 7. metrics sample every `sample_interval` steps
//!
//! After the last step gaps are recomputed and a final sample is taken.

use crate::config::RunConfig;
use crate::control::ControlEngine;
use crate::failure::{FailureInjector, LossSchedule};
use crate::metrics::{Metrics, MetricsAggregator};
use crate::ring::Ring;
use crate::scenario::Scenario;
use crate::spare::SpareController;
use crate::{seeded_rng, FleetRng, Result};
use tracing::debug;

/// Where losses come from.
#[derive(Debug, Clone)]
pub enum FailureSource {
    Stochastic(FailureInjector),
    Scheduled(LossSchedule),
    None,
}

/// Hook into the step loop, called once per step right after the velocity
/// pass with the ring in its post-control, pre-advance state.
pub trait StepObserver {
    fn after_velocity_update(&mut self, step: u64, ring: &Ring);
}

impl StepObserver for () {
    fn after_velocity_update(&mut self, _step: u64, _ring: &Ring) {}
}

pub struct Simulation {
    scenario: Scenario,
    config: RunConfig,
    ring: Ring,
    control: ControlEngine,
    source: FailureSource,
    spares: SpareController,
    metrics: MetricsAggregator,
    rng: FleetRng,
    step: u64,
    failures: usize,
}

impl Simulation {
    /// Build an engine for a validated scenario. The scenario seed is used
    /// as is; resolve a zero seed before calling this.
    pub fn new(scenario: Scenario, config: RunConfig, source: FailureSource) -> Result<Self> {
        scenario.validate()?;
        config.validate()?;

        let ring = Ring::with_layout(&scenario, config.layout);
        let control = ControlEngine::new(&scenario, &config);
        let metrics = MetricsAggregator::new(&scenario);
        let rng = seeded_rng(scenario.seed);

        Ok(Self {
            scenario,
            config,
            ring,
            control,
            source,
            spares: SpareController::new(),
            metrics,
            rng,
            step: 0,
            failures: 0,
        })
    }

    /// Engine driven by the scenario's own stochastic failure model.
    pub fn stochastic(scenario: Scenario, config: RunConfig) -> Result<Self> {
        let injector = FailureInjector::new(&scenario, &config);
        Self::new(scenario, config, FailureSource::Stochastic(injector))
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn metrics(&self) -> &Metrics {
        self.metrics.current()
    }

    pub fn current_step(&self) -> u64 {
        self.step
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn spares_inserted(&self) -> usize {
        self.spares.inserted()
    }

    pub fn is_finished(&self) -> bool {
        self.step >= self.config.steps
    }

    pub fn step(&mut self) {
        self.step_with(&mut ());
    }

    /// Advance one step, reporting to `observer` after the velocity pass.
    pub fn step_with<O: StepObserver + ?Sized>(&mut self, observer: &mut O) {
        let step = self.step;
        let strategy = self.config.gap_strategy;

        let failed: Vec<usize> = match &mut self.source {
            FailureSource::Stochastic(injector) => injector
                .maybe_inject(&mut self.ring, step, &mut self.rng)
                .into_iter()
                .collect(),
            FailureSource::Scheduled(schedule) => schedule.apply(&mut self.ring, step),
            FailureSource::None => Vec::new(),
        };
        if !failed.is_empty() {
            self.failures += failed.len();
            self.metrics.record_failure(step);
            self.spares.record_loss(step);
        }

        self.ring.compute_gaps(strategy);
        self.control.update_velocities(&mut self.ring);
        observer.after_velocity_update(step, &self.ring);
        self.control.apply_transitions(&mut self.ring);

        if self
            .spares
            .try_insert(&mut self.ring, &self.scenario, &self.config, step)
            .is_some()
        {
            self.ring.compute_gaps(strategy);
        }

        self.ring.advance(self.config.dt);

        if step % self.config.sample_interval == 0 {
            self.metrics.sample(&self.ring, step);
        }
        self.step += 1;
    }

    pub fn run(self) -> Metrics {
        self.run_with(&mut ())
    }

    /// Run the remaining steps and return the final metrics.
    pub fn run_with<O: StepObserver + ?Sized>(mut self, observer: &mut O) -> Metrics {
        while !self.is_finished() {
            self.step_with(observer);
        }

        self.ring.compute_gaps(self.config.gap_strategy);
        let last_step = self.config.steps.saturating_sub(1);
        self.metrics.sample(&self.ring, last_step);

        let metrics = self.metrics.finish(self.failures, self.spares.inserted());
        debug!(
            seed = self.scenario.seed,
            policy = self.scenario.policy.name(),
            density = metrics.density,
            failures = metrics.failures,
            spares = metrics.spares_inserted,
            "Scenario finished"
        );
        metrics
    }
}
