//! Spacing-control policies for NORMAL agents.
//!
//! Predecessor-following policies (0-3 and the reference law for any other
//! id) share one formula and differ only in their row of the gain table:
//!
//! `cmd = v_nom + k_front * schedule(e) * e - back_pressure`
//!
//! where `e = gap_front - d*`. The numeric constants below are the
//! experiment's calibrated values and must stay as they are.

use crate::agent::AgentMode;
use crate::config::SymmetricGains;
use serde::{Deserialize, Serialize};

/// Recovery when the front gap opens beyond this multiple of d*.
pub const RECOVERY_FRONT_RATIO: f64 = 1.2;
/// Recovery when the follower closes within this multiple of d*.
pub const RECOVERY_BACK_RATIO: f64 = 0.8;

/// Balancing policy. Scenario tables select one by numeric id; the
/// symmetric law has no id and is only chosen by parameter-file runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPolicy {
    /// 0: predecessor-only, weak recovery, no gain nonlinearity
    PredecessorOnly,
    /// 1: predecessor-only with amplified recovery and nonlinearity
    Aggressive,
    /// 2: fixed back-pressure, suppressed toward a JOINING successor
    Bidirectional,
    /// 3: VP-C, recovery-scaled back-pressure, zero toward a JOINING successor
    StateAware,
    /// Symmetric front/back gap law with safety cap and repulsion
    Symmetric,
    /// Any other id: the reference predecessor-following law
    Reference(u32),
}

impl From<u32> for ControlPolicy {
    fn from(id: u32) -> Self {
        match id {
            0 => ControlPolicy::PredecessorOnly,
            1 => ControlPolicy::Aggressive,
            2 => ControlPolicy::Bidirectional,
            3 => ControlPolicy::StateAware,
            other => ControlPolicy::Reference(other),
        }
    }
}

impl ControlPolicy {
    /// Table id; `None` for the symmetric law.
    pub fn id(&self) -> Option<u32> {
        match self {
            ControlPolicy::PredecessorOnly => Some(0),
            ControlPolicy::Aggressive => Some(1),
            ControlPolicy::Bidirectional => Some(2),
            ControlPolicy::StateAware => Some(3),
            ControlPolicy::Symmetric => None,
            ControlPolicy::Reference(id) => Some(*id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlPolicy::PredecessorOnly => "predecessor_only",
            ControlPolicy::Aggressive => "aggressive",
            ControlPolicy::Bidirectional => "bidirectional",
            ControlPolicy::StateAware => "state_aware",
            ControlPolicy::Symmetric => "symmetric",
            ControlPolicy::Reference(_) => "reference",
        }
    }

    /// Row of the predecessor-following gain table; `None` for the
    /// symmetric law, which has its own formula.
    pub fn follow_gains(&self) -> Option<FollowGains> {
        let gains = match self {
            ControlPolicy::PredecessorOnly => FollowGains {
                k_front: 0.3,
                k_front_recovery: 0.3 + 0.7,
                schedule: GainSchedule::Flat,
                back_pressure: BackPressure::None,
            },
            ControlPolicy::Aggressive => FollowGains {
                k_front: 0.7,
                k_front_recovery: 0.7 + 1.5,
                schedule: GainSchedule::Linear { slope: 0.8 },
                back_pressure: BackPressure::None,
            },
            ControlPolicy::Bidirectional => FollowGains {
                k_front: 0.5,
                k_front_recovery: 0.5 + 0.8,
                schedule: GainSchedule::Linear { slope: 0.4 },
                back_pressure: BackPressure::Fixed { gain: 0.3 },
            },
            ControlPolicy::StateAware => FollowGains {
                k_front: 0.5,
                k_front_recovery: 0.5 + 0.8,
                schedule: GainSchedule::Linear { slope: 0.4 },
                back_pressure: BackPressure::RecoveryScaled {
                    normal: 0.5,
                    recovery: 2.0,
                },
            },
            ControlPolicy::Reference(_) => FollowGains {
                k_front: 0.5,
                k_front_recovery: 2.0,
                schedule: GainSchedule::Deadband {
                    slope: 0.5,
                    deadband: 0.1,
                },
                back_pressure: BackPressure::None,
            },
            ControlPolicy::Symmetric => return None,
        };
        Some(gains)
    }
}

/// Nonlinear correction applied to the front gain for large gap errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainSchedule {
    Flat,
    /// `1 + slope * |e| / d*`
    Linear { slope: f64 },
    /// Linear, but only once `|e|` exceeds the deadband
    Deadband { slope: f64, deadband: f64 },
}

impl GainSchedule {
    pub fn factor(&self, gap_error: f64, nominal_spacing: f64) -> f64 {
        match *self {
            GainSchedule::Flat => 1.0,
            GainSchedule::Linear { slope } => 1.0 + slope * (gap_error.abs() / nominal_spacing),
            GainSchedule::Deadband { slope, deadband } => {
                if gap_error.abs() > deadband {
                    1.0 + slope * (gap_error.abs() / nominal_spacing)
                } else {
                    1.0
                }
            }
        }
    }
}

/// Correction a NORMAL agent applies from its successor's gap error.
/// Every variant is suppressed while the successor is JOINING.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackPressure {
    None,
    Fixed { gain: f64 },
    RecoveryScaled { normal: f64, recovery: f64 },
}

impl BackPressure {
    fn gain(&self, recovery: bool) -> f64 {
        match *self {
            BackPressure::None => 0.0,
            BackPressure::Fixed { gain } => gain,
            BackPressure::RecoveryScaled { normal, recovery: boosted } => {
                if recovery {
                    boosted
                } else {
                    normal
                }
            }
        }
    }
}

/// What a living agent sees of its neighborhood in one control pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborView {
    pub gap_front: f64,
    /// Equal to the successor's own front gap
    pub gap_back: f64,
    /// Mode of the successor, `None` without one
    pub successor_mode: Option<AgentMode>,
    pub velocity: f64,
}

impl NeighborView {
    pub fn in_recovery(&self, nominal_spacing: f64) -> bool {
        self.gap_front > RECOVERY_FRONT_RATIO * nominal_spacing
            || self.gap_back < RECOVERY_BACK_RATIO * nominal_spacing
    }

    fn successor_is_normal(&self) -> bool {
        matches!(self.successor_mode, Some(AgentMode::Normal))
    }
}

/// One row of the gain table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowGains {
    pub k_front: f64,
    pub k_front_recovery: f64,
    pub schedule: GainSchedule,
    pub back_pressure: BackPressure,
}

impl FollowGains {
    /// Unclamped velocity command.
    pub fn command(
        &self,
        view: &NeighborView,
        v_nominal: f64,
        nominal_spacing: f64,
        neighbor_balance_factor: f64,
    ) -> f64 {
        let gap_error = view.gap_front - nominal_spacing;
        let recovery = view.in_recovery(nominal_spacing);
        let k_front = if recovery {
            self.k_front_recovery
        } else {
            self.k_front
        };
        let schedule = self.schedule.factor(gap_error, nominal_spacing);

        let back_pressure = if view.successor_is_normal() {
            let successor_error = view.gap_back - nominal_spacing;
            self.back_pressure.gain(recovery) * successor_error * neighbor_balance_factor
        } else {
            0.0
        };

        v_nominal + k_front * schedule * gap_error - back_pressure
    }
}

/// Symmetric front/back law. Output is already clamped to `[0, v_max]`.
pub fn symmetric_command(
    gains: &SymmetricGains,
    view: &NeighborView,
    v_nominal: f64,
    v_max: f64,
    nominal_spacing: f64,
) -> f64 {
    let recovery = view.gap_front > gains.alpha * nominal_spacing
        || view.gap_back < gains.beta * nominal_spacing;
    let k = if recovery && gains.k_sym_rec > 0.0 {
        gains.k_sym_rec
    } else {
        gains.k_sym
    };

    let mut v = v_nominal + k * (view.gap_front - view.gap_back);
    if view.gap_front < gains.d_safe {
        v = v.min(v_nominal * (view.gap_front / gains.d_safe));
    }
    if view.gap_back < gains.d_safe {
        v += gains.k_rep * (gains.d_safe - view.gap_back);
    }
    if recovery && v > gains.v_cap {
        v = gains.v_cap;
    }
    v.clamp(0.0, v_max)
}
