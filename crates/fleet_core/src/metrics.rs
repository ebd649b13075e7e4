//! Metrics Aggregator
//!
//! Samples the ring every `sample_interval` steps and once more after the
//! last step. Instantaneous statistics come from the latest sample; the
//! recovery latch, peak gap and oscillation accumulators span the whole run.
//! Degenerate populations produce defined values, never NaN.

use crate::ring::Ring;
use crate::scenario::Scenario;
use serde::{Deserialize, Serialize};

/// Density above which the fleet counts as recovered.
pub const RECOVERED_DENSITY: f64 = 0.95;

/// Baseline subtracted from density in the recovery slope.
const SLOPE_BASELINE: f64 = 0.5;

/// Per-scenario result record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// living / capacity
    pub density: f64,
    /// density * 100
    pub coverage: f64,
    pub mean_speed: f64,
    pub speed_stddev: f64,
    pub max_gap: f64,
    pub mean_gap: f64,
    /// Largest front gap seen in any sample
    pub peak_gap: f64,
    pub active_count: usize,
    /// `1 / (1 + |mean_gap - d*| / d*)`, in (0, 1]
    pub formation_stability: f64,
    /// mean speed / nominal speed
    pub energy: f64,
    /// Steps from the first failure until density first exceeded 0.95
    pub time_to_recover: Option<u64>,
    /// `(density - 0.5) / recovery duration`, fixed when recovery latches
    pub recovery_slope: f64,
    /// Sum of speed stddev over all samples
    pub oscillation_integral: f64,
    pub oscillation_samples: u64,
    /// oscillation_integral / oscillation_samples
    pub oscillation_metric: f64,
    pub failures: usize,
    pub spares_inserted: usize,
}

#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    v_nominal: f64,
    nominal_spacing: f64,
    first_failure: Option<u64>,
    current: Metrics,
}

impl MetricsAggregator {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            v_nominal: scenario.v_nominal,
            nominal_spacing: scenario.nominal_spacing,
            first_failure: None,
            current: Metrics {
                mean_speed: scenario.v_nominal,
                ..Default::default()
            },
        }
    }

    /// Remember the step of the first loss; later calls are ignored.
    pub fn record_failure(&mut self, step: u64) {
        self.first_failure.get_or_insert(step);
    }

    pub fn first_failure(&self) -> Option<u64> {
        self.first_failure
    }

    pub fn current(&self) -> &Metrics {
        &self.current
    }

    /// Take one sample of the ring. Gaps must be current.
    pub fn sample(&mut self, ring: &Ring, step: u64) {
        let m = &mut self.current;
        let capacity = ring.capacity();

        let mut living = 0usize;
        let mut speed_sum = 0.0;
        let mut gap_sum = 0.0;
        let mut gap_count = 0usize;
        let mut max_gap: f64 = 0.0;
        for (_, agent) in ring.living() {
            living += 1;
            speed_sum += agent.velocity;
            if agent.gap_front > 0.0 {
                gap_sum += agent.gap_front;
                gap_count += 1;
                max_gap = max_gap.max(agent.gap_front);
            }
        }

        m.active_count = living;
        m.density = if capacity == 0 {
            0.0
        } else {
            living as f64 / capacity as f64
        };
        m.coverage = m.density * 100.0;

        if living > 0 {
            let mean = speed_sum / living as f64;
            let variance = ring
                .living()
                .map(|(_, a)| (a.velocity - mean).powi(2))
                .sum::<f64>()
                / living as f64;
            m.mean_speed = mean;
            m.speed_stddev = variance.max(0.0).sqrt();
        } else {
            m.mean_speed = self.v_nominal;
            m.speed_stddev = 0.0;
        }

        m.max_gap = max_gap;
        m.mean_gap = if gap_count > 0 {
            gap_sum / gap_count as f64
        } else {
            0.0
        };
        m.peak_gap = m.peak_gap.max(max_gap);
        m.formation_stability =
            1.0 / (1.0 + (m.mean_gap - self.nominal_spacing).abs() / self.nominal_spacing);
        m.energy = m.mean_speed / self.v_nominal;

        if let Some(failed_at) = self.first_failure {
            if m.time_to_recover.is_none() && m.density > RECOVERED_DENSITY {
                let duration = step.saturating_sub(failed_at);
                m.time_to_recover = Some(duration);
                m.recovery_slope = if duration > 0 {
                    (m.density - SLOPE_BASELINE) / duration as f64
                } else {
                    0.0
                };
            }
        }

        m.oscillation_integral += m.speed_stddev;
        m.oscillation_samples += 1;
        m.oscillation_metric = m.oscillation_integral / m.oscillation_samples as f64;
    }

    /// Close the run with the engine's counters.
    pub fn finish(mut self, failures: usize, spares_inserted: usize) -> Metrics {
        self.current.failures = failures;
        self.current.spares_inserted = spares_inserted;
        self.current
    }
}

/// Per-step fleet summary, one row of the summary table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step: u64,
    pub alive: usize,
    pub mean_v: f64,
    pub min_v: f64,
    pub max_v: f64,
    pub std_v: f64,
    pub min_gap: f64,
    pub max_gap: f64,
    pub mean_gap: f64,
    pub std_gap: f64,
}

/// (mean, min, max, population stddev); all zero for an empty input.
fn describe(values: impl Iterator<Item = f64> + Clone) -> (f64, f64, f64, f64) {
    let (count, sum, min, max) = values.clone().fold(
        (0usize, 0.0, f64::INFINITY, f64::NEG_INFINITY),
        |(n, s, lo, hi), v| (n + 1, s + v, lo.min(v), hi.max(v)),
    );
    if count == 0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    (mean, min, max, variance.sqrt())
}

impl StepSummary {
    /// Summarize the living agents. Gap columns stay zero below two agents.
    pub fn from_ring(ring: &Ring, step: u64) -> Self {
        let alive = ring.living_count();
        let (mean_v, min_v, max_v, std_v) = describe(ring.living().map(|(_, a)| a.velocity));
        let (mean_gap, min_gap, max_gap, std_gap) = if alive >= 2 {
            describe(ring.living().map(|(_, a)| a.gap_front))
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };
        Self {
            step,
            alive,
            mean_v,
            min_v,
            max_v,
            std_v,
            min_gap,
            max_gap,
            mean_gap,
            std_gap,
        }
    }
}
