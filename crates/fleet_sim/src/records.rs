//! Flat scenario records: one scenario per CSV row, header skipped.

use anyhow::{Context, Result};
use fleet_core::Scenario;
use std::io::Read;
use std::path::Path;

/// Parse every record of a scenario table.
pub fn read_scenarios<R: Read>(reader: R) -> Result<Vec<Scenario>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut scenarios = Vec::new();
    for record in csv.records() {
        let record = record.context("Failed to read scenario record")?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        let line = record.position().map_or(0, |p| p.line() as usize);
        let fields: Vec<&str> = record.iter().collect();
        scenarios.push(Scenario::from_record(&fields, line)?);
    }
    Ok(scenarios)
}

pub fn read_scenarios_file(path: &Path) -> Result<Vec<Scenario>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open scenario file {}", path.display()))?;
    read_scenarios(file).with_context(|| format!("Invalid scenario file {}", path.display()))
}
