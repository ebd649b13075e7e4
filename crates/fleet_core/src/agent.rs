//! Agent records held in the ring arena.

use serde::{Deserialize, Serialize};

/// Sub-phase of the JOINING law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPhase {
    /// Speed ramps from the entry speed up to nominal.
    SoftEntry,
    /// Distance-weighted bidirectional centering.
    Positioning,
    /// Symmetric front/back control while still flagged JOINING.
    Stabilizing,
}

/// Control mode of a living agent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum AgentMode {
    #[default]
    Normal,
    /// Freshly inserted spare converging into the formation.
    Joining {
        phase: JoinPhase,
        /// Simulated seconds spent in JOINING.
        elapsed: f64,
    },
    /// Spare holding nominal speed for a fixed number of velocity passes.
    Incoming { remaining: u64 },
}

impl AgentMode {
    /// Mode of a spare at the moment it is inserted.
    pub fn joining() -> Self {
        AgentMode::Joining {
            phase: JoinPhase::SoftEntry,
            elapsed: 0.0,
        }
    }

    pub fn is_joining(&self) -> bool {
        matches!(self, AgentMode::Joining { .. })
    }

    /// Mode of a spare entering with a nominal-speed hold. A zero-step hold
    /// is plain NORMAL.
    pub fn incoming(hold_steps: u64) -> Self {
        if hold_steps == 0 {
            AgentMode::Normal
        } else {
            AgentMode::Incoming {
                remaining: hold_steps,
            }
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, AgentMode::Normal)
    }

    /// Short label used in traces.
    pub fn label(&self) -> &'static str {
        match self {
            AgentMode::Normal => "normal",
            AgentMode::Joining {
                phase: JoinPhase::SoftEntry,
                ..
            } => "soft_entry",
            AgentMode::Joining {
                phase: JoinPhase::Positioning,
                ..
            } => "positioning",
            AgentMode::Joining {
                phase: JoinPhase::Stabilizing,
                ..
            } => "stabilizing",
            AgentMode::Incoming { .. } => "incoming",
        }
    }
}

/// One slot of the fleet.
///
/// `alive == false` is a tombstone: every other field is stale until
/// [`Agent::reactivate`] overwrites the whole slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Curvilinear position in `[0, perimeter)`
    pub position: f64,
    pub velocity: f64,
    pub nominal_velocity: f64,
    /// Arc length to the living neighbor ahead (the predecessor)
    pub gap_front: f64,
    /// Arc length to the living neighbor behind (the successor)
    pub gap_back: f64,
    /// Slot of the predecessor found in the last gap pass
    pub ahead: Option<usize>,
    /// Slot of the successor found in the last gap pass
    pub behind: Option<usize>,
    pub alive: bool,
    pub mode: AgentMode,
}

impl Agent {
    pub fn new(position: f64, nominal_velocity: f64, alive: bool) -> Self {
        Self {
            position,
            velocity: nominal_velocity,
            nominal_velocity,
            gap_front: 0.0,
            gap_back: 0.0,
            ahead: None,
            behind: None,
            alive,
            mode: AgentMode::Normal,
        }
    }

    /// Bring a dormant slot back as a spare in `mode`.
    pub fn reactivate(
        &mut self,
        position: f64,
        velocity: f64,
        nominal_velocity: f64,
        mode: AgentMode,
    ) {
        *self = Self {
            velocity,
            mode,
            ..Self::new(position, nominal_velocity, true)
        };
    }

    /// Mark the slot dormant.
    pub fn fail(&mut self) {
        self.alive = false;
        self.mode = AgentMode::Normal;
        self.clear_links();
    }

    pub(crate) fn clear_links(&mut self) {
        self.gap_front = 0.0;
        self.gap_back = 0.0;
        self.ahead = None;
        self.behind = None;
    }

    /// Living and in NORMAL mode; the only agents the failure injector targets.
    pub fn is_failable(&self) -> bool {
        self.alive && self.mode.is_normal()
    }
}
