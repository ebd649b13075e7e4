//! Scenario I/O, the parallel batch driver and run helpers behind the
//! `fleet-sim` binary.

pub mod batch;
pub mod losses;
pub mod output;
pub mod params;
pub mod records;
pub mod summarize;

pub use batch::{run_batch, unix_seconds, BatchResult};
pub use params::ParamFile;
pub use records::{read_scenarios, read_scenarios_file};
