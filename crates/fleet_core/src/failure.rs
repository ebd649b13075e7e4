//! Failure Injector
//!
//! Two ways of losing agents: a stochastic injector driven by the scenario's
//! failure model, and an explicit [`LossSchedule`] of `(step, slot)` pairs.
//! Both only ever flip `alive` to false; they never touch gaps or modes of
//! the surviving agents.

use crate::config::RunConfig;
use crate::ring::Ring;
use crate::scenario::Scenario;
use crate::{seeded_rng, FleetRng};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Slot draws before a selection gives up.
const MAX_ATTEMPTS: usize = 100;

/// Cluster radius of spatially clustered failures, as a divisor of capacity.
const CLUSTER_DIVISOR: usize = 5;

/// Spatial/temporal structure of stochastic failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum FailureDistribution {
    /// 0: any living agent, uniformly
    #[default]
    Random,
    /// 1: agents around a random center slot
    SpatialClustered,
    /// 2: neighbors of already-failed slots, increasingly likely over the run
    TemporalCascade,
}

impl From<u32> for FailureDistribution {
    fn from(id: u32) -> Self {
        match id {
            1 => FailureDistribution::SpatialClustered,
            2 => FailureDistribution::TemporalCascade,
            _ => FailureDistribution::Random,
        }
    }
}

impl From<FailureDistribution> for u32 {
    fn from(distribution: FailureDistribution) -> Self {
        match distribution {
            FailureDistribution::Random => 0,
            FailureDistribution::SpatialClustered => 1,
            FailureDistribution::TemporalCascade => 2,
        }
    }
}

impl FailureDistribution {
    pub fn name(&self) -> &'static str {
        match self {
            FailureDistribution::Random => "random",
            FailureDistribution::SpatialClustered => "spatial_clustered",
            FailureDistribution::TemporalCascade => "temporal_cascade",
        }
    }
}

/// Stochastic failure source of one scenario.
#[derive(Debug, Clone)]
pub struct FailureInjector {
    distribution: FailureDistribution,
    rate: f64,
    budget: usize,
    injected: usize,
    warmup_steps: u64,
    total_steps: u64,
}

impl FailureInjector {
    pub fn new(scenario: &Scenario, config: &RunConfig) -> Self {
        Self {
            distribution: scenario.failure_distribution,
            rate: scenario.failure_rate,
            budget: scenario.failure_count,
            injected: 0,
            warmup_steps: config.warmup_steps,
            total_steps: config.steps,
        }
    }

    pub fn injected(&self) -> usize {
        self.injected
    }

    pub fn budget_left(&self) -> usize {
        self.budget.saturating_sub(self.injected)
    }

    /// Per-step invocation policy: past warm-up and within budget, inject
    /// with probability `failure_rate`.
    ///
    /// The uniform draw happens every step, eligible or not, so the random
    /// stream only depends on the seed and the step count.
    pub fn maybe_inject(&mut self, ring: &mut Ring, step: u64, rng: &mut FleetRng) -> Option<usize> {
        let draw: f64 = rng.gen();
        if step <= self.warmup_steps || self.injected >= self.budget || draw >= self.rate {
            return None;
        }
        let slot = self.inject(ring, step, rng)?;
        self.injected += 1;
        Some(slot)
    }

    /// Deactivate at most one living NORMAL agent chosen by the scenario's
    /// distribution. `None` when the search found nobody.
    pub fn inject(&self, ring: &mut Ring, step: u64, rng: &mut FleetRng) -> Option<usize> {
        let slot = self.select(ring, step, rng)?;
        ring.fail(slot);
        debug!(
            slot,
            step,
            distribution = self.distribution.name(),
            "Injected agent failure"
        );
        Some(slot)
    }

    /// Choose a victim without mutating the ring.
    pub fn select(&self, ring: &Ring, step: u64, rng: &mut FleetRng) -> Option<usize> {
        match self.distribution {
            FailureDistribution::Random => select_random(ring, rng),
            FailureDistribution::SpatialClustered => select_clustered(ring, rng),
            FailureDistribution::TemporalCascade => {
                let progress = if self.total_steps == 0 {
                    1.0
                } else {
                    step as f64 / self.total_steps as f64
                };
                // Nobody fails on an untriggered step
                let trigger: f64 = rng.gen();
                if trigger < progress * progress {
                    select_cascade(ring, rng).or_else(|| select_random(ring, rng))
                } else {
                    None
                }
            }
        }
    }
}

fn select_random(ring: &Ring, rng: &mut FleetRng) -> Option<usize> {
    let capacity = ring.capacity();
    if capacity == 0 {
        return None;
    }
    (0..MAX_ATTEMPTS)
        .map(|_| rng.gen_range(0..capacity))
        .find(|&slot| ring.agent(slot).is_failable())
}

fn select_clustered(ring: &Ring, rng: &mut FleetRng) -> Option<usize> {
    let capacity = ring.capacity();
    if capacity == 0 {
        return None;
    }
    let center = rng.gen_range(0..capacity) as i64;
    let radius = (capacity / CLUSTER_DIVISOR) as i64;
    (0..MAX_ATTEMPTS)
        .map(|_| {
            let offset = rng.gen_range(-radius..=radius);
            (center + offset).rem_euclid(capacity as i64) as usize
        })
        .find(|&slot| ring.agent(slot).is_failable())
}

/// Look for a dormant slot and take down its living neighbor, the slot
/// after it first.
fn select_cascade(ring: &Ring, rng: &mut FleetRng) -> Option<usize> {
    let capacity = ring.capacity();
    if capacity == 0 {
        return None;
    }
    for _ in 0..MAX_ATTEMPTS {
        let dormant = rng.gen_range(0..capacity);
        if ring.agent(dormant).alive {
            continue;
        }
        let next = (dormant + 1) % capacity;
        if ring.agent(next).is_failable() {
            return Some(next);
        }
        let prev = (dormant + capacity - 1) % capacity;
        if ring.agent(prev).is_failable() {
            return Some(prev);
        }
    }
    None
}

/// One scheduled loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loss {
    pub step: u64,
    pub slot: usize,
}

/// Explicit list of losses, applied at the start of the matching step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossSchedule {
    losses: Vec<Loss>,
    cursor: usize,
}

impl LossSchedule {
    /// Build a schedule; entries are stably ordered by step.
    pub fn new(mut losses: Vec<Loss>) -> Self {
        losses.sort_by_key(|loss| loss.step);
        Self { losses, cursor: 0 }
    }

    /// Draw `count` losses from `seed`: uniform steps in `[0, steps)` and
    /// uniform slots in `[0, capacity)`.
    pub fn generate(seed: u64, count: usize, steps: u64, capacity: usize) -> Self {
        let mut rng = seeded_rng(seed);
        let losses = (0..count)
            .map(|_| Loss {
                step: rng.gen_range(0..steps.max(1)),
                slot: rng.gen_range(0..capacity.max(1)),
            })
            .collect();
        Self::new(losses)
    }

    pub fn losses(&self) -> &[Loss] {
        &self.losses
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    /// Apply every loss scheduled for `step`. Entries naming a slot that is
    /// out of range or already dormant are ignored. Returns the slots that
    /// actually failed.
    pub fn apply(&mut self, ring: &mut Ring, step: u64) -> Vec<usize> {
        while self.cursor < self.losses.len() && self.losses[self.cursor].step < step {
            self.cursor += 1;
        }

        let mut failed = Vec::new();
        while self.cursor < self.losses.len() && self.losses[self.cursor].step == step {
            let Loss { slot, .. } = self.losses[self.cursor];
            if ring.fail(slot) {
                debug!(slot, step, "Scheduled loss applied");
                failed.push(slot);
            } else {
                debug!(slot, step, "Scheduled loss ignored, slot not alive");
            }
            self.cursor += 1;
        }
        failed
    }
}
