//! Window statistics over per-step summary tables.
//!
//! For every run the means of `mean_v`, `std_v`, `mean_gap` and `std_gap`
//! are reported over three windows: before the first loss, after it, and
//! the last 20% of the run.

use anyhow::{Context, Result};
use fleet_core::StepSummary;
use serde::Serialize;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Start of the end window as a fraction of the run length.
const END_WINDOW_START: f64 = 0.8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub mean_v: Option<f64>,
    pub std_v: Option<f64>,
    pub mean_gap: Option<f64>,
    pub std_gap: Option<f64>,
    pub samples: usize,
}

impl WindowStats {
    pub fn over(rows: &[StepSummary], steps: Range<u64>) -> Self {
        let selected: Vec<&StepSummary> = rows.iter().filter(|r| steps.contains(&r.step)).collect();
        let mean = |f: fn(&StepSummary) -> f64| {
            if selected.is_empty() {
                None
            } else {
                Some(selected.iter().map(|r| f(r)).sum::<f64>() / selected.len() as f64)
            }
        };
        Self {
            mean_v: mean(|r| r.mean_v),
            std_v: mean(|r| r.std_v),
            mean_gap: mean(|r| r.mean_gap),
            std_gap: mean(|r| r.std_gap),
            samples: selected.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run: String,
    pub path: PathBuf,
    pub first_loss_step: u64,
    pub pre: WindowStats,
    pub post: WindowStats,
    pub end: WindowStats,
}

impl RunSummary {
    /// `None` for an empty table.
    pub fn compute(run: String, path: PathBuf, rows: &[StepSummary], first_loss_step: u64) -> Option<Self> {
        let last = rows.last()?.step + 1;
        let end_start = (last as f64 * END_WINDOW_START) as u64;
        Some(Self {
            run,
            path,
            first_loss_step,
            pre: WindowStats::over(rows, 0..first_loss_step),
            post: WindowStats::over(rows, first_loss_step + 1..last),
            end: WindowStats::over(rows, end_start..last),
        })
    }
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    run: &'a str,
    summary_path: String,
    first_loss_step: u64,
    pre_mean_v: Option<f64>,
    pre_std_v: Option<f64>,
    pre_mean_gap: Option<f64>,
    pre_std_gap: Option<f64>,
    post_mean_v: Option<f64>,
    post_std_v: Option<f64>,
    post_mean_gap: Option<f64>,
    post_std_gap: Option<f64>,
    end_mean_v: Option<f64>,
    end_std_v: Option<f64>,
    end_mean_gap: Option<f64>,
    end_std_gap: Option<f64>,
}

impl<'a> From<&'a RunSummary> for SummaryRow<'a> {
    fn from(s: &'a RunSummary) -> Self {
        Self {
            run: &s.run,
            summary_path: s.path.display().to_string(),
            first_loss_step: s.first_loss_step,
            pre_mean_v: s.pre.mean_v,
            pre_std_v: s.pre.std_v,
            pre_mean_gap: s.pre.mean_gap,
            pre_std_gap: s.pre.std_gap,
            post_mean_v: s.post.mean_v,
            post_std_v: s.post.std_v,
            post_mean_gap: s.post.mean_gap,
            post_std_gap: s.post.std_gap,
            end_mean_v: s.end.mean_v,
            end_std_v: s.end.std_v,
            end_mean_gap: s.end.mean_gap,
            end_std_gap: s.end.std_gap,
        }
    }
}

/// Read a `;`-separated step summary table.
pub fn read_summary<R: Read>(reader: R) -> Result<Vec<StepSummary>> {
    let mut csv = csv::ReaderBuilder::new().delimiter(b';').from_reader(reader);
    csv.deserialize()
        .map(|row| row.context("Malformed summary row"))
        .collect()
}

pub fn write_summaries<W: Write>(writer: W, summaries: &[RunSummary]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for summary in summaries {
        csv.serialize(SummaryRow::from(summary))?;
    }
    csv.flush()?;
    Ok(())
}

/// Summarize several summary files against one loss schedule. Runs are
/// named after the directory holding their table.
pub fn summarize_files(paths: &[PathBuf], first_loss_step: u64) -> Result<Vec<RunSummary>> {
    let mut summaries = Vec::with_capacity(paths.len());
    for path in paths {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open summary {}", path.display()))?;
        let rows = read_summary(file).with_context(|| format!("In {}", path.display()))?;
        let run = run_name(path);
        if let Some(summary) = RunSummary::compute(run, path.clone(), &rows, first_loss_step) {
            summaries.push(summary);
        }
    }
    Ok(summaries)
}

fn run_name(path: &Path) -> String {
    path.parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
