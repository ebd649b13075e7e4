//! Agent Ring Model
//!
//! A fixed-capacity arena of [`Agent`] slots on a closed perimeter. Slots are
//! never deallocated: a failed agent keeps its slot with `alive = false`, so
//! spare insertion is an O(1) reactivation.
//!
//! Gap convention: agents travel toward increasing position. The
//! *predecessor* of an agent is the nearest living agent ahead of it and
//! `gap_front` is the arc length to it; the *successor* is the nearest living
//! agent behind and `gap_back` equals the successor's `gap_front`.

use crate::agent::Agent;
use crate::config::{GapStrategy, Layout};
use crate::scenario::Scenario;

/// Wrap a position into `[0, perimeter)`.
#[inline]
pub fn wrap_position(position: f64, perimeter: f64) -> f64 {
    let wrapped = position.rem_euclid(perimeter);
    // rem_euclid can round up to `perimeter` for tiny negative inputs
    if wrapped >= perimeter {
        0.0
    } else {
        wrapped
    }
}

/// A stretch of perimeter between two consecutive living agents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapSpan {
    /// Slot whose front gap this is; `None` when no agent is alive
    pub from: Option<usize>,
    /// Position where the span starts
    pub start: f64,
    pub length: f64,
}

impl GapSpan {
    pub fn midpoint(&self, perimeter: f64) -> f64 {
        wrap_position(self.start + self.length / 2.0, perimeter)
    }
}

#[derive(Debug, Clone)]
pub struct Ring {
    perimeter: f64,
    agents: Vec<Agent>,
    /// Scratch buffer of living slots, reused across gap passes
    order: Vec<usize>,
}

impl Ring {
    pub fn new(perimeter: f64, agents: Vec<Agent>) -> Self {
        let capacity = agents.len();
        Self {
            perimeter,
            agents,
            order: Vec::with_capacity(capacity),
        }
    }

    /// Lay out `capacity` slots at `i * nominal_spacing` (mod perimeter);
    /// the first `initial_active` start alive.
    pub fn from_scenario(scenario: &Scenario) -> Self {
        Self::with_layout(scenario, Layout::NominalSpacing)
    }

    /// Lay out `capacity` slots with the given initial spacing.
    pub fn with_layout(scenario: &Scenario, layout: Layout) -> Self {
        let spacing = match layout {
            Layout::NominalSpacing => scenario.nominal_spacing,
            Layout::EvenPerimeter => scenario.perimeter / scenario.capacity.max(1) as f64,
        };
        let agents = (0..scenario.capacity)
            .map(|i| {
                Agent::new(
                    wrap_position(i as f64 * spacing, scenario.perimeter),
                    scenario.v_nominal,
                    i < scenario.initial_active,
                )
            })
            .collect();
        Self::new(scenario.perimeter, agents)
    }

    pub fn perimeter(&self) -> f64 {
        self.perimeter
    }

    pub fn capacity(&self) -> usize {
        self.agents.len()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    pub fn agent(&self, slot: usize) -> &Agent {
        &self.agents[slot]
    }

    pub fn agent_mut(&mut self, slot: usize) -> &mut Agent {
        &mut self.agents[slot]
    }

    /// Living agents with their slot index.
    pub fn living(&self) -> impl Iterator<Item = (usize, &Agent)> + Clone {
        self.agents.iter().enumerate().filter(|(_, a)| a.alive)
    }

    pub fn living_count(&self) -> usize {
        self.agents.iter().filter(|a| a.alive).count()
    }

    /// living / capacity
    pub fn density(&self) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        self.living_count() as f64 / self.agents.len() as f64
    }

    /// Lowest-index dormant slot.
    pub fn first_dormant(&self) -> Option<usize> {
        self.agents.iter().position(|a| !a.alive)
    }

    /// Deactivate a slot. Returns false if it was already dormant.
    pub fn fail(&mut self, slot: usize) -> bool {
        match self.agents.get_mut(slot) {
            Some(agent) if agent.alive => {
                agent.fail();
                true
            }
            _ => false,
        }
    }

    /// Recompute every living agent's front/back gaps and neighbor links.
    ///
    /// With fewer than two living agents all gaps are zero and links empty.
    pub fn compute_gaps(&mut self, strategy: GapStrategy) {
        for agent in &mut self.agents {
            agent.clear_links();
        }

        self.order.clear();
        self.order
            .extend(self.agents.iter().enumerate().filter(|(_, a)| a.alive).map(|(i, _)| i));
        if self.order.len() < 2 {
            return;
        }

        if strategy == GapStrategy::PositionSorted {
            let agents = &self.agents;
            self.order.sort_by(|&a, &b| {
                agents[a]
                    .position
                    .total_cmp(&agents[b].position)
                    .then(a.cmp(&b))
            });
        }

        let m = self.order.len();
        for k in 0..m {
            let current = self.order[k];
            let next = self.order[(k + 1) % m];
            let gap = match strategy {
                GapStrategy::IndexRing => (self.agents[next].position - self.agents[current].position)
                    .rem_euclid(self.perimeter),
                GapStrategy::PositionSorted if k + 1 < m => {
                    self.agents[next].position - self.agents[current].position
                }
                GapStrategy::PositionSorted => {
                    self.perimeter - self.agents[current].position + self.agents[next].position
                }
            };

            let follower = &mut self.agents[current];
            follower.gap_front = gap;
            follower.ahead = Some(next);

            let leader = &mut self.agents[next];
            leader.gap_back = gap;
            leader.behind = Some(current);
        }
    }

    /// Sum of front gaps over living agents. Equals the perimeter whenever
    /// at least two agents are alive and the gap pass was consistent.
    pub fn gap_sum(&self) -> f64 {
        self.living().map(|(_, a)| a.gap_front).sum()
    }

    /// Largest front gap, first slot wins ties.
    ///
    /// A lone agent owns the whole perimeter; an empty ring reports one
    /// span starting at 0.
    pub fn largest_gap(&self) -> GapSpan {
        let mut living = self.living();
        let Some((first_slot, first)) = living.next() else {
            return GapSpan {
                from: None,
                start: 0.0,
                length: self.perimeter,
            };
        };
        if first.ahead.is_none() {
            return GapSpan {
                from: Some(first_slot),
                start: first.position,
                length: self.perimeter,
            };
        }

        let mut best = GapSpan {
            from: Some(first_slot),
            start: first.position,
            length: first.gap_front,
        };
        for (slot, agent) in living {
            if agent.gap_front > best.length {
                best = GapSpan {
                    from: Some(slot),
                    start: agent.position,
                    length: agent.gap_front,
                };
            }
        }
        best
    }

    /// Move every living agent by `velocity * dt` around the ring.
    pub fn advance(&mut self, dt: f64) {
        let perimeter = self.perimeter;
        for agent in self.agents.iter_mut().filter(|a| a.alive) {
            agent.position = wrap_position(agent.position + agent.velocity * dt, perimeter);
        }
    }
}
