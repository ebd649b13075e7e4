//! Ring-fleet station-keeping engine.
//!
//! Agents hold station on a closed 1D perimeter under a local spacing-control
//! law. The engine couples four pieces per step:
//!
//! 1. failure sources (stochastic injector or an explicit loss schedule),
//! 2. the ring gap model ([`ring::Ring::compute_gaps`]),
//! 3. the control law engine ([`control::ControlEngine`]) including the
//!    three-phase JOINING law for freshly inserted spares,
//! 4. the spare insertion controller and the metrics aggregator.
//!
//! Every scenario owns its ring and its own seeded generator
//! ([`FleetRng`]), so independent scenarios can run on separate threads.

pub mod agent;
pub mod config;
pub mod control;
pub mod failure;
pub mod metrics;
pub mod ring;
pub mod scenario;
pub mod simulation;
pub mod spare;

pub use agent::{Agent, AgentMode, JoinPhase};
pub use config::{GapStrategy, JoinTiming, Layout, RunConfig, SpareEntry, SpareTrigger, SymmetricGains};
pub use control::{ControlEngine, ControlPolicy};
pub use failure::{FailureDistribution, FailureInjector, Loss, LossSchedule};
pub use metrics::{Metrics, MetricsAggregator, StepSummary};
pub use ring::Ring;
pub use scenario::Scenario;
pub use simulation::{FailureSource, Simulation, StepObserver};
pub use spare::SpareController;

use thiserror::Error;

/// Per-scenario pseudo-random generator.
///
/// ChaCha8 keeps the stream identical across platforms, which the
/// determinism contract for non-zero seeds depends on.
pub type FleetRng = rand_chacha::ChaCha8Rng;

/// Build the generator for a resolved (non-zero) scenario seed.
pub fn seeded_rng(seed: u64) -> FleetRng {
    use rand::SeedableRng;
    FleetRng::seed_from_u64(seed)
}

#[derive(Debug, Error, PartialEq)]
pub enum FleetError {
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, FleetError>;
