//! Loss schedule files: `step,idx` per line, `,` or `;` separated, with an
//! optional header.

use anyhow::{Context, Result};
use fleet_core::{Loss, LossSchedule};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Row layout of a written loss file.
#[derive(Debug, Serialize, Deserialize)]
struct LossRow {
    step: u64,
    idx: usize,
}

fn parse_row(record: &csv::StringRecord) -> Option<Loss> {
    let step = record.get(0)?.trim().parse().ok()?;
    let slot = record.get(1)?.trim().parse().ok()?;
    Some(Loss { step, slot })
}

/// Parse a loss table. Rows that do not hold two non-negative integers are
/// skipped, so a header line is simply ignored.
pub fn parse_losses(text: &str) -> Result<Vec<Loss>> {
    let delimiter = if text.contains(';') { b';' } else { b',' };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut losses = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.context("Failed to read loss record")?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        match parse_row(&record) {
            Some(loss) => losses.push(loss),
            None if row == 0 => {}
            None => warn!(line = row + 1, "Skipping malformed loss entry"),
        }
    }
    Ok(losses)
}

pub fn write_losses(path: &Path, losses: &[Loss]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to create loss file {}", path.display()))?;
    for loss in losses {
        writer.serialize(LossRow {
            step: loss.step,
            idx: loss.slot,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Load the schedule for a run.
///
/// When the file is missing or holds no losses and `num_losses > 0`, a
/// schedule is generated from `seed` and written back to `path`.
pub fn load_or_generate(
    path: &Path,
    num_losses: usize,
    seed: u64,
    steps: u64,
    capacity: usize,
) -> Result<LossSchedule> {
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => parse_losses(&text)
            .with_context(|| format!("Invalid loss file {}", path.display()))?,
        Err(_) => Vec::new(),
    };
    if !existing.is_empty() {
        return Ok(LossSchedule::new(existing));
    }

    if num_losses == 0 {
        anyhow::bail!(
            "Could not read losses from {} and num_losses is not set",
            path.display()
        );
    }
    let schedule = LossSchedule::generate(seed, num_losses, steps, capacity);
    write_losses(path, schedule.losses())?;
    info!(
        path = %path.display(),
        count = num_losses,
        seed,
        "Generated loss schedule"
    );
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_header_and_semicolons() {
        let losses = parse_losses("step;idx\n150;3\n40;7\n").unwrap();
        assert_eq!(
            losses,
            vec![Loss { step: 150, slot: 3 }, Loss { step: 40, slot: 7 }]
        );
    }

    #[test]
    fn test_parse_without_header() {
        let losses = parse_losses("10,1\n\n20,-4\n30,2\n").unwrap();
        assert_eq!(
            losses,
            vec![Loss { step: 10, slot: 1 }, Loss { step: 30, slot: 2 }]
        );
    }

    #[test]
    fn test_generate_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("losses.csv");
        let schedule = load_or_generate(&path, 4, 9, 500, 20).unwrap();
        assert_eq!(schedule.losses().len(), 4);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("step;idx\n"));
        // Reloading gives the same schedule without regenerating
        let reloaded = load_or_generate(&path, 0, 0, 500, 20).unwrap();
        assert_eq!(reloaded.losses(), schedule.losses());
    }

    #[test]
    fn test_missing_without_count_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_or_generate(&dir.path().join("none.csv"), 0, 1, 100, 10).is_err());
    }
}
