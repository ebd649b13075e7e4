//! Scenario definitions and the flat-record data contract.

use crate::control::ControlPolicy;
use crate::failure::FailureDistribution;
use crate::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Number of leading fields every flat record must carry.
pub const REQUIRED_FIELDS: usize = 12;

/// Total number of fields understood in a flat record.
pub const RECORD_FIELDS: usize = 19;

/// Added per scenario index when deriving a time-based seed, so scenarios
/// of the same batch never share a stream.
const SEED_STRIDE: u64 = 7919;

/// Immutable parameters of one simulated fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub perimeter: f64,
    /// Total slots, spares included
    pub capacity: usize,
    pub v_nominal: f64,
    pub v_max: f64,
    pub sensing_radius: f64,
    pub nominal_spacing: f64,
    pub policy: ControlPolicy,
    /// Density-triggered spares are inserted while living/capacity is below this
    pub density_threshold: f64,
    pub speed_threshold: f64,
    pub adaptation_window: f64,
    /// Per-step probability of a failure once past warm-up
    pub failure_rate: f64,
    /// Total failure budget
    pub failure_count: usize,
    pub failure_distribution: FailureDistribution,
    pub initial_active: usize,
    /// Density-triggered spares are also inserted while living < ratio * initial_active
    pub spare_trigger_ratio: f64,
    /// Capacity is raised to at least initial_active * factor
    pub spare_target_factor: f64,
    /// Extra scaling of back-pressure terms
    pub neighbor_balance_factor: f64,
    /// When positive, overrides failure_count as a fraction of initial_active
    pub strike_fraction: f64,
    /// 0 means "derive from the clock"
    pub seed: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            perimeter: 100.0,
            capacity: 10,
            v_nominal: 1.0,
            v_max: 2.0,
            sensing_radius: 20.0,
            nominal_spacing: 10.0,
            policy: ControlPolicy::PredecessorOnly,
            density_threshold: 0.9,
            speed_threshold: 1.5,
            adaptation_window: 5.0,
            failure_rate: 0.0,
            failure_count: 0,
            failure_distribution: FailureDistribution::Random,
            initial_active: 10,
            spare_trigger_ratio: 0.9,
            spare_target_factor: 1.0,
            neighbor_balance_factor: 1.0,
            strike_fraction: 0.0,
            seed: 0,
        }
    }
}

fn parse_field<T: FromStr>(fields: &[&str], index: usize, name: &str, line: usize) -> Result<Option<T>> {
    match fields.get(index).map(|f| f.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| FleetError::Parse {
            line,
            message: format!("field `{name}` has invalid value `{raw}`"),
        }),
    }
}

fn require<T>(value: Option<T>, name: &str, line: usize) -> Result<T> {
    value.ok_or_else(|| FleetError::Parse {
        line,
        message: format!("missing required field `{name}`"),
    })
}

impl Scenario {
    /// Build a scenario from one flat record.
    ///
    /// The first [`REQUIRED_FIELDS`] fields are mandatory; trailing fields
    /// fall back to their documented defaults. The result is normalized.
    pub fn from_record(fields: &[&str], line: usize) -> Result<Self> {
        if fields.len() < REQUIRED_FIELDS {
            return Err(FleetError::Parse {
                line,
                message: format!(
                    "expected at least {REQUIRED_FIELDS} fields, found {}",
                    fields.len()
                ),
            });
        }
        if fields.len() > RECORD_FIELDS {
            return Err(FleetError::Parse {
                line,
                message: format!("expected at most {RECORD_FIELDS} fields, found {}", fields.len()),
            });
        }

        let capacity: usize = require(parse_field(fields, 1, "capacity", line)?, "capacity", line)?;
        let policy_id: u32 = require(parse_field(fields, 6, "policy", line)?, "policy", line)?;
        let distribution: u32 = parse_field(fields, 12, "failure_distribution", line)?.unwrap_or(0);

        let mut scenario = Scenario {
            perimeter: require(parse_field(fields, 0, "perimeter", line)?, "perimeter", line)?,
            capacity,
            v_nominal: require(parse_field(fields, 2, "v_nominal", line)?, "v_nominal", line)?,
            v_max: require(parse_field(fields, 3, "v_max", line)?, "v_max", line)?,
            sensing_radius: require(
                parse_field(fields, 4, "sensing_radius", line)?,
                "sensing_radius",
                line,
            )?,
            nominal_spacing: require(
                parse_field(fields, 5, "nominal_spacing", line)?,
                "nominal_spacing",
                line,
            )?,
            policy: ControlPolicy::from(policy_id),
            density_threshold: require(
                parse_field(fields, 7, "density_threshold", line)?,
                "density_threshold",
                line,
            )?,
            speed_threshold: require(
                parse_field(fields, 8, "speed_threshold", line)?,
                "speed_threshold",
                line,
            )?,
            adaptation_window: require(
                parse_field(fields, 9, "adaptation_window", line)?,
                "adaptation_window",
                line,
            )?,
            failure_rate: require(parse_field(fields, 10, "failure_rate", line)?, "failure_rate", line)?,
            failure_count: require(
                parse_field(fields, 11, "failure_count", line)?,
                "failure_count",
                line,
            )?,
            failure_distribution: FailureDistribution::from(distribution),
            initial_active: parse_field(fields, 13, "initial_active", line)?.unwrap_or(capacity),
            spare_trigger_ratio: parse_field(fields, 14, "spare_trigger_ratio", line)?.unwrap_or(0.9),
            spare_target_factor: parse_field(fields, 15, "spare_target_factor", line)?.unwrap_or(1.0),
            neighbor_balance_factor: parse_field(fields, 16, "neighbor_balance_factor", line)?
                .unwrap_or(1.0),
            strike_fraction: parse_field(fields, 17, "strike_fraction", line)?.unwrap_or(0.0),
            seed: parse_field(fields, 18, "seed", line)?.unwrap_or(0),
        };

        if let ControlPolicy::Reference(id) = scenario.policy {
            warn!(line, policy = id, "Unknown policy id, using the reference law");
        }
        if distribution > 2 {
            warn!(line, distribution, "Unknown failure distribution, using random");
        }

        scenario.validate().map_err(|e| FleetError::Parse {
            line,
            message: e.to_string(),
        })?;
        scenario.normalize();
        Ok(scenario)
    }

    /// Apply the load-time corrections: capacity covers the spare target,
    /// initial_active fits in capacity and strike_fraction drives the
    /// failure budget.
    pub fn normalize(&mut self) {
        let required = self.required_capacity();
        if self.capacity < required {
            warn!(
                capacity = self.capacity,
                required, "Capacity below spare target, raising it"
            );
            self.capacity = required;
        }
        if self.initial_active > self.capacity {
            warn!(
                initial_active = self.initial_active,
                capacity = self.capacity,
                "More initial agents than slots, clamping"
            );
            self.initial_active = self.capacity;
        }
        if self.strike_fraction > 0.0 {
            self.failure_count = (self.strike_fraction * self.initial_active as f64).round() as usize;
        }
    }

    /// `ceil(initial_active * spare_target_factor)`
    pub fn required_capacity(&self) -> usize {
        (self.initial_active as f64 * self.spare_target_factor).ceil().max(0.0) as usize
    }

    /// Reject values the engine cannot simulate.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("perimeter", self.perimeter),
            ("nominal_spacing", self.nominal_spacing),
            ("v_nominal", self.v_nominal),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(FleetError::InvalidScenario(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !self.v_max.is_finite() || self.v_max < 0.0 {
            return Err(FleetError::InvalidScenario(format!(
                "v_max must be non-negative, got {}",
                self.v_max
            )));
        }
        if self.capacity == 0 {
            return Err(FleetError::InvalidScenario("capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(FleetError::InvalidScenario(format!(
                "failure_rate must lie in [0, 1], got {}",
                self.failure_rate
            )));
        }
        if self.spare_target_factor < 0.0 || self.strike_fraction < 0.0 {
            return Err(FleetError::InvalidScenario(
                "spare_target_factor and strike_fraction must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Replace a zero seed with a clock-derived one. Returns the seed in use.
    pub fn resolve_seed(&mut self, index: usize, clock_secs: u64) -> u64 {
        if self.seed == 0 {
            let derived = clock_secs.wrapping_add(index as u64 * SEED_STRIDE);
            self.seed = derived.max(1);
        }
        self.seed
    }

    pub fn is_reproducible(&self) -> bool {
        self.seed != 0
    }
}
