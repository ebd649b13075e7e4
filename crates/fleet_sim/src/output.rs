//! Result tables and per-step recorders.

use crate::batch::BatchResult;
use anyhow::{Context, Result};
use fleet_core::{Ring, StepObserver, StepSummary};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One row of the results table: scenario parameters (with the resolved
/// seed) followed by the metrics.
#[derive(Debug, Serialize)]
pub struct ResultRow {
    pub perimeter: f64,
    pub capacity: usize,
    pub v_nominal: f64,
    pub v_max: f64,
    pub sensing_radius: f64,
    pub nominal_spacing: f64,
    /// Blank for the symmetric law
    pub policy: Option<u32>,
    pub density_threshold: f64,
    pub speed_threshold: f64,
    pub adaptation_window: f64,
    pub failure_rate: f64,
    pub failure_count: usize,
    pub failure_distribution: u32,
    pub initial_active: usize,
    pub spare_trigger_ratio: f64,
    pub spare_target_factor: f64,
    pub neighbor_balance_factor: f64,
    pub strike_fraction: f64,
    pub seed: u64,
    pub density: f64,
    pub coverage: f64,
    pub mean_speed: f64,
    pub speed_stddev: f64,
    pub max_gap: f64,
    pub mean_gap: f64,
    pub peak_gap: f64,
    pub active_count: usize,
    pub formation_stability: f64,
    pub energy: f64,
    pub time_to_recover: Option<u64>,
    pub recovery_slope: f64,
    pub oscillation_metric: f64,
    pub failures: usize,
    pub spares_inserted: usize,
}

impl From<&BatchResult> for ResultRow {
    fn from(result: &BatchResult) -> Self {
        let s = &result.scenario;
        let m = &result.metrics;
        Self {
            perimeter: s.perimeter,
            capacity: s.capacity,
            v_nominal: s.v_nominal,
            v_max: s.v_max,
            sensing_radius: s.sensing_radius,
            nominal_spacing: s.nominal_spacing,
            policy: s.policy.id(),
            density_threshold: s.density_threshold,
            speed_threshold: s.speed_threshold,
            adaptation_window: s.adaptation_window,
            failure_rate: s.failure_rate,
            failure_count: s.failure_count,
            failure_distribution: s.failure_distribution.into(),
            initial_active: s.initial_active,
            spare_trigger_ratio: s.spare_trigger_ratio,
            spare_target_factor: s.spare_target_factor,
            neighbor_balance_factor: s.neighbor_balance_factor,
            strike_fraction: s.strike_fraction,
            seed: s.seed,
            density: m.density,
            coverage: m.coverage,
            mean_speed: m.mean_speed,
            speed_stddev: m.speed_stddev,
            max_gap: m.max_gap,
            mean_gap: m.mean_gap,
            peak_gap: m.peak_gap,
            active_count: m.active_count,
            formation_stability: m.formation_stability,
            energy: m.energy,
            time_to_recover: m.time_to_recover,
            recovery_slope: m.recovery_slope,
            oscillation_metric: m.oscillation_metric,
            failures: m.failures,
            spares_inserted: m.spares_inserted,
        }
    }
}

pub fn write_results<W: Write>(writer: W, results: &[BatchResult]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for result in results {
        csv.serialize(ResultRow::from(result))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_results_file(path: &Path, results: &[BatchResult]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create results file {}", path.display()))?;
    write_results(file, results)
}

fn semicolon_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b';').from_writer(writer)
}

/// Per-step aggregate table.
pub struct SummaryWriter<W: Write> {
    csv: csv::Writer<W>,
    error: Option<csv::Error>,
}

impl<W: Write> SummaryWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            csv: semicolon_writer(writer),
            error: None,
        }
    }

    /// Flush and report the first write error, if any.
    pub fn finish(mut self) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e).context("Failed to write step summary");
        }
        self.csv.flush()?;
        Ok(())
    }
}

impl<W: Write> StepObserver for SummaryWriter<W> {
    fn after_velocity_update(&mut self, step: u64, ring: &Ring) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.csv.serialize(StepSummary::from_ring(ring, step)) {
            self.error = Some(e);
        }
    }
}

#[derive(Debug, Serialize)]
struct TraceRow {
    step: u64,
    idx: usize,
    alive: u8,
    mode: &'static str,
    s: f64,
    v: f64,
    gap_f: Option<f64>,
    gap_b: Option<f64>,
}

/// Per-agent trace; dormant agents get blank gap columns.
pub struct TraceWriter<W: Write> {
    csv: csv::Writer<W>,
    error: Option<csv::Error>,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            csv: semicolon_writer(writer),
            error: None,
        }
    }

    pub fn finish(mut self) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e).context("Failed to write agent trace");
        }
        self.csv.flush()?;
        Ok(())
    }
}

impl<W: Write> StepObserver for TraceWriter<W> {
    fn after_velocity_update(&mut self, step: u64, ring: &Ring) {
        if self.error.is_some() {
            return;
        }
        for (idx, agent) in ring.agents().iter().enumerate() {
            let (gap_f, gap_b) = if agent.alive {
                (Some(agent.gap_front), Some(agent.gap_back))
            } else {
                (None, None)
            };
            let row = TraceRow {
                step,
                idx,
                alive: u8::from(agent.alive),
                mode: agent.mode.label(),
                s: agent.position,
                v: agent.velocity,
                gap_f,
                gap_b,
            };
            if let Err(e) = self.csv.serialize(row) {
                self.error = Some(e);
                return;
            }
        }
    }
}

/// Optional summary and trace recorders of a single run.
pub struct RunRecorder {
    pub summary: Option<SummaryWriter<File>>,
    pub trace: Option<TraceWriter<File>>,
}

impl RunRecorder {
    pub fn create(summary: Option<&Path>, trace: Option<&Path>) -> Result<Self> {
        let open = |path: &Path| {
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))
        };
        Ok(Self {
            summary: summary.map(open).transpose()?.map(SummaryWriter::new),
            trace: trace.map(open).transpose()?.map(TraceWriter::new),
        })
    }

    pub fn finish(self) -> Result<()> {
        if let Some(summary) = self.summary {
            summary.finish()?;
        }
        if let Some(trace) = self.trace {
            trace.finish()?;
        }
        Ok(())
    }
}

impl StepObserver for RunRecorder {
    fn after_velocity_update(&mut self, step: u64, ring: &Ring) {
        if let Some(summary) = self.summary.as_mut() {
            summary.after_velocity_update(step, ring);
        }
        if let Some(trace) = self.trace.as_mut() {
            trace.after_velocity_update(step, ring);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{GapStrategy, Metrics, Scenario};

    #[test]
    fn test_results_header_and_row() {
        let result = BatchResult {
            scenario: Scenario {
                seed: 5,
                ..Default::default()
            },
            metrics: Metrics {
                density: 0.9,
                ..Default::default()
            },
        };
        let mut out = Vec::new();
        write_results(&mut out, &[result]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("perimeter,capacity,v_nominal"));
        assert!(header.ends_with("failures,spares_inserted"));
        let row = lines.next().unwrap();
        assert_eq!(row.split(',').count(), header.split(',').count());
        assert!(row.contains(",5,0.9,"));
    }

    #[test]
    fn test_trace_blanks_dormant_gaps() {
        let mut ring = Ring::from_scenario(&Scenario {
            capacity: 3,
            initial_active: 2,
            perimeter: 30.0,
            ..Default::default()
        });
        ring.compute_gaps(GapStrategy::PositionSorted);

        let mut trace = TraceWriter::new(Vec::new());
        trace.after_velocity_update(7, &ring);
        assert!(trace.error.is_none());
        let bytes = trace.csv.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "step;idx;alive;mode;s;v;gap_f;gap_b");
        assert_eq!(lines[1], "7;0;1;normal;0.0;1.0;10.0;20.0");
        assert_eq!(lines[3], "7;2;0;normal;20.0;1.0;;");
    }

    #[test]
    fn test_summary_header() {
        let ring = Ring::from_scenario(&Scenario::default());
        let mut summary = SummaryWriter::new(Vec::new());
        summary.after_velocity_update(0, &ring);
        let text = String::from_utf8(summary.csv.into_inner().unwrap()).unwrap();
        assert!(text.starts_with("step;alive;mean_v;min_v;max_v;std_v;min_gap;max_gap;mean_gap;std_gap\n"));
    }
}
