//! Spare Insertion Controller
//!
//! Reactivates dormant slots into the largest gap. Two triggers exist:
//!
//! - [`SpareTrigger::Density`] inserts one spare per step while the fleet is
//!   below the density threshold or the living-count trigger ratio. Losses
//!   only matter through `min_spare_delay_steps`.
//! - [`SpareTrigger::AfterLoss`] replaces lost agents one per step, never on
//!   the step of a loss, and never more than were lost or than `max_spares`.

use crate::agent::AgentMode;
use crate::config::{RunConfig, SpareEntry, SpareTrigger};
use crate::control::ENTRY_SPEED_RATIO;
use crate::ring::Ring;
use crate::scenario::Scenario;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct SpareController {
    inserted: usize,
    /// Largest number of dormant slots seen since the first loss
    losses_seen: usize,
    last_loss_step: Option<u64>,
}

impl SpareController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    /// Note a loss; insertions wait `min_spare_delay_steps` from here.
    pub fn record_loss(&mut self, step: u64) {
        self.last_loss_step = Some(step);
    }

    fn delay_elapsed(&self, step: u64, config: &RunConfig) -> bool {
        match self.last_loss_step {
            Some(last) => step >= last.saturating_add(config.min_spare_delay_steps),
            None => true,
        }
    }

    fn below_target(ring: &Ring, scenario: &Scenario) -> bool {
        let living = ring.living_count() as f64;
        ring.density() < scenario.density_threshold
            || living < scenario.spare_trigger_ratio * scenario.initial_active as f64
    }

    fn eligible(
        &mut self,
        ring: &Ring,
        scenario: &Scenario,
        config: &RunConfig,
        step: u64,
    ) -> bool {
        match config.spare_trigger {
            SpareTrigger::Disabled => false,
            SpareTrigger::Density => {
                self.delay_elapsed(step, config) && Self::below_target(ring, scenario)
            }
            SpareTrigger::AfterLoss { max_spares } => {
                let Some(last) = self.last_loss_step else {
                    return false;
                };
                self.losses_seen = self.losses_seen.max(ring.capacity() - ring.living_count());
                last != step
                    && self.delay_elapsed(step, config)
                    && self.inserted < self.losses_seen
                    && self.inserted < max_spares
            }
        }
    }

    /// Insert at most one spare. Gaps must be current.
    ///
    /// The lowest-index dormant slot is placed at the midpoint of the
    /// largest front gap, entering as `config.spare_entry` says.
    pub fn try_insert(
        &mut self,
        ring: &mut Ring,
        scenario: &Scenario,
        config: &RunConfig,
        step: u64,
    ) -> Option<usize> {
        if !self.eligible(ring, scenario, config, step) {
            return None;
        }
        let slot = ring.first_dormant()?;

        let (velocity, mode) = match config.spare_entry {
            SpareEntry::Joining => (ENTRY_SPEED_RATIO * scenario.v_nominal, AgentMode::joining()),
            // The insertion step is the first held step
            SpareEntry::Hold { steps } => {
                (scenario.v_nominal, AgentMode::incoming(steps.saturating_sub(1)))
            }
        };
        let span = ring.largest_gap();
        let position = span.midpoint(ring.perimeter());
        ring.agent_mut(slot)
            .reactivate(position, velocity, scenario.v_nominal, mode);
        self.inserted += 1;
        if self.inserted == 1 {
            info!(
                step,
                living = ring.living_count(),
                density = ring.density(),
                "First spare inserted"
            );
        }
        debug!(
            slot,
            step,
            position,
            gap = span.length,
            mode = mode.label(),
            "Inserted spare into largest gap"
        );
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::JoinPhase;
    use crate::config::GapStrategy;

    fn setup() -> (Ring, Scenario, RunConfig) {
        let scenario = Scenario {
            capacity: 10,
            initial_active: 10,
            ..Default::default()
        };
        let mut ring = Ring::from_scenario(&scenario);
        ring.compute_gaps(GapStrategy::PositionSorted);
        (ring, scenario, RunConfig::default())
    }

    fn after_loss(max_spares: usize) -> RunConfig {
        RunConfig {
            spare_trigger: SpareTrigger::AfterLoss { max_spares },
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_under_populated_start_fills_without_loss() {
        let scenario = Scenario {
            capacity: 10,
            initial_active: 8,
            ..Default::default()
        };
        let config = RunConfig::default();
        let mut ring = Ring::from_scenario(&scenario);
        ring.compute_gaps(GapStrategy::PositionSorted);

        let mut spares = SpareController::new();
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 0), Some(8));
        ring.compute_gaps(GapStrategy::PositionSorted);
        // 0.9 is not below the 0.9 threshold
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 1), None);
        assert_eq!(spares.inserted(), 1);
        assert_eq!(ring.density(), 0.9);
    }

    #[test]
    fn test_insert_at_largest_gap_midpoint() {
        let (mut ring, scenario, config) = setup();
        ring.fail(3);
        ring.fail(4);
        ring.compute_gaps(GapStrategy::PositionSorted);

        let mut spares = SpareController::new();
        spares.record_loss(150);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 150), Some(3));

        // Largest gap runs from slot 2 at 20 to slot 5 at 50
        let agent = ring.agent(3);
        assert!(agent.alive);
        assert_eq!(agent.position, 35.0);
        assert!((agent.velocity - 0.6).abs() < 1e-12);
        assert_eq!(
            agent.mode,
            AgentMode::Joining {
                phase: JoinPhase::SoftEntry,
                elapsed: 0.0
            }
        );
    }

    #[test]
    fn test_density_trigger_stops_at_threshold() {
        let (mut ring, scenario, config) = setup();
        let mut spares = SpareController::new();

        ring.fail(7);
        spares.record_loss(120);
        ring.compute_gaps(GapStrategy::PositionSorted);
        // 0.9 density is not below the 0.9 threshold and 9 < 0.9 * 10 is false
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 121), None);

        ring.fail(8);
        spares.record_loss(121);
        ring.compute_gaps(GapStrategy::PositionSorted);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 122), Some(7));
        ring.compute_gaps(GapStrategy::PositionSorted);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 123), None);
        assert_eq!(spares.inserted(), 1);
        assert_eq!(ring.density(), 0.9);
    }

    #[test]
    fn test_delay_after_loss() {
        let (mut ring, scenario, mut config) = setup();
        config.min_spare_delay_steps = 50;
        ring.fail(1);
        ring.fail(2);
        ring.compute_gaps(GapStrategy::PositionSorted);

        let mut spares = SpareController::new();
        spares.record_loss(200);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 249), None);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 250), Some(1));
    }

    #[test]
    fn test_after_loss_skips_the_loss_step() {
        let (mut ring, scenario, _) = setup();
        let config = after_loss(5);
        let mut spares = SpareController::new();
        ring.compute_gaps(GapStrategy::PositionSorted);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 10), None);

        ring.fail(4);
        spares.record_loss(40);
        ring.compute_gaps(GapStrategy::PositionSorted);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 40), None);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 41), Some(4));
    }

    #[test]
    fn test_after_loss_replaces_only_what_was_lost() {
        let (mut ring, scenario, _) = setup();
        let config = after_loss(5);
        let mut spares = SpareController::new();

        ring.fail(2);
        ring.fail(6);
        spares.record_loss(30);
        ring.compute_gaps(GapStrategy::PositionSorted);
        assert!(spares.try_insert(&mut ring, &scenario, &config, 31).is_some());
        ring.compute_gaps(GapStrategy::PositionSorted);
        assert!(spares.try_insert(&mut ring, &scenario, &config, 32).is_some());
        ring.compute_gaps(GapStrategy::PositionSorted);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 33), None);
        assert_eq!(spares.inserted(), 2);
        assert_eq!(ring.density(), 1.0);
    }

    #[test]
    fn test_after_loss_capped_by_max_spares() {
        let (mut ring, scenario, _) = setup();
        let config = after_loss(1);
        let mut spares = SpareController::new();

        for slot in [1, 5, 8] {
            ring.fail(slot);
        }
        spares.record_loss(60);
        ring.compute_gaps(GapStrategy::PositionSorted);
        for step in 61..70 {
            spares.try_insert(&mut ring, &scenario, &config, step);
            ring.compute_gaps(GapStrategy::PositionSorted);
        }
        assert_eq!(spares.inserted(), 1);
        assert_eq!(ring.living_count(), 8);
    }

    #[test]
    fn test_hold_entry_at_nominal_speed() {
        let (mut ring, scenario, _) = setup();
        let config = RunConfig {
            spare_entry: SpareEntry::Hold { steps: 5 },
            ..after_loss(2)
        };
        let mut spares = SpareController::new();
        ring.fail(3);
        spares.record_loss(10);
        ring.compute_gaps(GapStrategy::PositionSorted);

        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 11), Some(3));
        assert_eq!(ring.agent(3).velocity, scenario.v_nominal);
        assert_eq!(ring.agent(3).mode, AgentMode::Incoming { remaining: 4 });
    }

    #[test]
    fn test_disabled_never_inserts() {
        let (mut ring, scenario, _) = setup();
        let config = RunConfig {
            spare_trigger: SpareTrigger::Disabled,
            ..RunConfig::default()
        };
        ring.fail(0);
        ring.fail(1);
        ring.compute_gaps(GapStrategy::PositionSorted);
        let mut spares = SpareController::new();
        spares.record_loss(5);
        assert_eq!(spares.try_insert(&mut ring, &scenario, &config, 500), None);
    }
}
