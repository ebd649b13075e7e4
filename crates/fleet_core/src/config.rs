use serde::{Deserialize, Serialize};

#[cfg(feature = "cli")]
use clap::ValueEnum;

/// How neighbors are found when recomputing gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum GapStrategy {
    /// Nearest living slot with a lower/higher index. Only valid while slot
    /// order matches spatial order.
    IndexRing,
    /// Sort slots by position and pair consecutive living agents.
    #[default]
    PositionSorted,
}

/// Phase timing of the JOINING law, in seconds of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoinTiming {
    /// End of SOFT_ENTRY.
    #[serde(default = "default_ramp_time")]
    pub ramp_time: f64,
    /// End of POSITIONING.
    #[serde(default = "default_position_time")]
    pub position_time: f64,
    /// A JOINING agent never merges before this much time has elapsed.
    #[serde(default = "default_min_transition_time")]
    pub min_transition_time: f64,
}

impl Default for JoinTiming {
    fn default() -> Self {
        Self {
            ramp_time: default_ramp_time(),
            position_time: default_position_time(),
            min_transition_time: default_min_transition_time(),
        }
    }
}

fn default_ramp_time() -> f64 {
    0.5
}
fn default_position_time() -> f64 {
    1.5
}
fn default_min_transition_time() -> f64 {
    2.0
}

/// Gains of the symmetric front/back gap law.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymmetricGains {
    /// Gain on `gap_front - gap_back`.
    #[serde(default = "default_k_sym")]
    pub k_sym: f64,
    /// Gain used in recovery; ignored when not positive.
    #[serde(default = "default_k_sym")]
    pub k_sym_rec: f64,
    /// Safety distance below which speed is capped / repulsion applies.
    #[serde(default = "default_d_safe")]
    pub d_safe: f64,
    /// Repulsion gain from a too-close follower.
    #[serde(default = "default_k_rep")]
    pub k_rep: f64,
    /// Speed cap while in recovery.
    #[serde(default = "default_v_cap")]
    pub v_cap: f64,
    /// Recovery when `gap_front > alpha * d*`.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Recovery when `gap_back < beta * d*`.
    #[serde(default = "default_beta")]
    pub beta: f64,
}

impl Default for SymmetricGains {
    fn default() -> Self {
        Self {
            k_sym: default_k_sym(),
            k_sym_rec: default_k_sym(),
            d_safe: default_d_safe(),
            k_rep: default_k_rep(),
            v_cap: default_v_cap(),
            alpha: default_alpha(),
            beta: default_beta(),
        }
    }
}

fn default_k_sym() -> f64 {
    0.5
}
fn default_d_safe() -> f64 {
    1.0
}
fn default_k_rep() -> f64 {
    0.2
}
fn default_v_cap() -> f64 {
    1.5
}
fn default_alpha() -> f64 {
    1.2
}
fn default_beta() -> f64 {
    0.8
}

/// When dormant slots are brought back into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpareTrigger {
    /// Every step the fleet sits below the scenario's density threshold or
    /// spare trigger ratio, one spare is inserted.
    #[default]
    Density,
    /// Replace lost agents only: never on the step of a loss, never more
    /// spares than losses seen, and at most `max_spares` over the run.
    AfterLoss { max_spares: usize },
    /// Dormant slots stay dormant.
    Disabled,
}

/// How an inserted spare enters the formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpareEntry {
    /// Three-phase JOINING law from 0.6 of nominal speed.
    #[default]
    Joining,
    /// Hold nominal speed for `steps` steps, the insertion step included,
    /// then NORMAL.
    Hold { steps: u64 },
}

/// Where agents are placed at step 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Slot `i` at `i * nominal_spacing`.
    #[default]
    NominalSpacing,
    /// Slot `i` at `i * perimeter / capacity`.
    EvenPerimeter,
}

/// Run-level settings shared by every scenario of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of simulated steps per scenario
    #[serde(default = "default_steps")]
    pub steps: u64,
    /// Step length (s)
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Stochastic failures are only injected after this step
    #[serde(default = "default_warmup_steps")]
    pub warmup_steps: u64,
    /// Metrics are sampled every N steps
    #[serde(default = "default_sample_interval")]
    pub sample_interval: u64,
    /// Realized velocity changes by at most `max_accel * dt` per step;
    /// `None` applies commands directly
    #[serde(default = "default_max_accel")]
    pub max_accel: Option<f64>,
    #[serde(default)]
    pub gap_strategy: GapStrategy,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub spare_trigger: SpareTrigger,
    #[serde(default)]
    pub spare_entry: SpareEntry,
    /// Steps that must pass after the last loss before a spare may be inserted
    #[serde(default)]
    pub min_spare_delay_steps: u64,
    #[serde(default)]
    pub join: JoinTiming,
    #[serde(default)]
    pub symmetric: SymmetricGains,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            dt: default_dt(),
            warmup_steps: default_warmup_steps(),
            sample_interval: default_sample_interval(),
            max_accel: default_max_accel(),
            gap_strategy: GapStrategy::default(),
            layout: Layout::default(),
            spare_trigger: SpareTrigger::default(),
            spare_entry: SpareEntry::default(),
            min_spare_delay_steps: 0,
            join: JoinTiming::default(),
            symmetric: SymmetricGains::default(),
        }
    }
}

fn default_steps() -> u64 {
    5000
}
fn default_dt() -> f64 {
    0.1
}
fn default_warmup_steps() -> u64 {
    100
}
fn default_sample_interval() -> u64 {
    10
}
fn default_max_accel() -> Option<f64> {
    Some(0.5)
}

impl RunConfig {
    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_gap_strategy(mut self, strategy: GapStrategy) -> Self {
        self.gap_strategy = strategy;
        self
    }

    /// Reject settings the step loop cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.dt > 0.0) {
            return Err(crate::FleetError::InvalidScenario(format!(
                "dt must be positive, got {}",
                self.dt
            )));
        }
        if self.sample_interval == 0 {
            return Err(crate::FleetError::InvalidScenario(
                "sample_interval must be at least 1".into(),
            ));
        }
        if let Some(max_accel) = self.max_accel {
            if !(max_accel >= 0.0) {
                return Err(crate::FleetError::InvalidScenario(format!(
                    "max_accel must be non-negative, got {max_accel}"
                )));
            }
        }
        Ok(())
    }
}
