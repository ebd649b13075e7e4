//! Three-phase JOINING law for freshly inserted spares.
//!
//! SOFT_ENTRY ramps the spare up from its entry speed while only the
//! follower gap may trim the ramp. POSITIONING centers it with a
//! distance-weighted bidirectional law that deliberately under-weights the
//! predecessor. STABILIZING runs plain symmetric control until the merge
//! criteria hold.

use super::policy::NeighborView;
use crate::agent::{AgentMode, JoinPhase};
use crate::config::JoinTiming;

/// Spares enter the ring at this fraction of nominal speed.
pub const ENTRY_SPEED_RATIO: f64 = 0.6;

const SOFT_ENTRY_BACK_GAIN: f64 = 0.3;
const POSITIONING_FRONT_GAIN: f64 = 0.2;
const POSITIONING_BACK_GAIN: f64 = 0.5;
const STABILIZING_GAIN: f64 = 0.5;

/// |gap_front - gap_back| must be below this fraction of d* to count as centered
const CENTERING_TOLERANCE: f64 = 0.2;
/// Gap errors must be below this fraction of d* to merge
const GAP_TOLERANCE: f64 = 0.1;
/// Speed must be within this fraction of nominal for the phase-based merge
const VELOCITY_TOLERANCE: f64 = 0.05;

/// Outcome of one JOINING control evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinDecision {
    /// Next mode: JOINING with the current phase, or NORMAL on merge
    pub mode: AgentMode,
    /// Unclamped velocity command
    pub command: f64,
}

/// Evaluate the JOINING law. `elapsed` already includes the current step.
pub fn joining_command(
    view: &NeighborView,
    elapsed: f64,
    v_nominal: f64,
    nominal_spacing: f64,
    timing: &JoinTiming,
) -> JoinDecision {
    let d = nominal_spacing;
    let front_error = view.gap_front - d;
    let back_error = view.gap_back - d;

    let centered = (view.gap_front - view.gap_back).abs() < CENTERING_TOLERANCE * d
        && back_error.abs() < GAP_TOLERANCE * d;
    let velocity_close = (view.velocity - v_nominal).abs() < VELOCITY_TOLERANCE * v_nominal;

    if elapsed > timing.min_transition_time && centered && velocity_close {
        return JoinDecision {
            mode: AgentMode::Normal,
            command: v_nominal,
        };
    }

    let (phase, command) = if elapsed < timing.ramp_time {
        let entry = ENTRY_SPEED_RATIO * v_nominal;
        let target = entry + (v_nominal - entry) * (elapsed / timing.ramp_time);
        let command = (target - SOFT_ENTRY_BACK_GAIN * back_error).min(target);
        (JoinPhase::SoftEntry, command)
    } else if elapsed < timing.position_time {
        let weight = d / (d + (view.gap_front - view.gap_back).abs() / 2.0);
        let command = v_nominal + POSITIONING_FRONT_GAIN * weight * front_error
            - POSITIONING_BACK_GAIN * weight * back_error;
        (JoinPhase::Positioning, command)
    } else {
        let command = v_nominal + STABILIZING_GAIN * front_error - STABILIZING_GAIN * back_error;
        (JoinPhase::Stabilizing, command)
    };

    JoinDecision {
        mode: AgentMode::Joining { phase, elapsed },
        command,
    }
}

/// Gap-based merge check of the mode-transition pass.
pub fn merge_ready(view: &NeighborView, elapsed: f64, nominal_spacing: f64, timing: &JoinTiming) -> bool {
    let d = nominal_spacing;
    elapsed > timing.min_transition_time
        && (view.gap_front - d).abs() < GAP_TOLERANCE * d
        && (view.gap_back - d).abs() < GAP_TOLERANCE * d
}
