use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_core::{FailureSource, GapStrategy, Metrics, RunConfig, Simulation};
use fleet_sim::output::{write_results_file, RunRecorder};
use fleet_sim::summarize::{summarize_files, write_summaries};
use fleet_sim::{losses, read_scenarios_file, run_batch, unix_seconds, ParamFile};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fleet-sim")]
#[command(about = "Ring-fleet station-keeping simulator")]
struct Cli {
    /// Log engine events at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every scenario of a CSV table and write the results table
    Batch {
        /// Scenario table
        input: PathBuf,
        /// Results table
        output: PathBuf,
        /// Steps per scenario
        #[arg(long, default_value = "5000")]
        steps: u64,
        /// Neighbor lookup used for gaps
        #[arg(long, value_enum, default_value = "position-sorted")]
        gap_strategy: GapStrategy,
        /// No stochastic failures before this step
        #[arg(long, default_value = "100")]
        warmup: u64,
        /// Metrics sampling interval in steps
        #[arg(long, default_value = "10")]
        sample_interval: u64,
        /// Steps to wait after a loss before inserting spares
        #[arg(long, default_value = "0")]
        min_spare_delay: u64,
    },
    /// Run one parameter file against a loss schedule
    Run {
        /// key=value parameter file
        params: PathBuf,
        /// Loss schedule, generated here when missing and num_losses is set
        losses: PathBuf,
        /// Per-step summary table
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Per-agent trace table
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Print the metrics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pre-loss, post-loss and end-window means of step summary tables
    Summarize {
        /// Loss schedule giving the first loss step
        #[arg(long)]
        losses: Option<PathBuf>,
        /// Output table
        #[arg(long)]
        out: PathBuf,
        /// Step summary tables
        #[arg(required = true)]
        summaries: Vec<PathBuf>,
    },
}

fn batch(input: &Path, output: &Path, config: RunConfig) -> Result<()> {
    let scenarios = read_scenarios_file(input)?;
    if scenarios.is_empty() {
        anyhow::bail!("No scenarios loaded from {}", input.display());
    }
    info!(count = scenarios.len(), input = %input.display(), "Loaded scenarios");

    let results = run_batch(scenarios, &config, unix_seconds())?;
    write_results_file(output, &results)?;
    info!(output = %output.display(), "Results written");
    Ok(())
}

fn run_single(
    params: &Path,
    loss_path: &Path,
    summary: Option<&Path>,
    trace: Option<&Path>,
    json: bool,
) -> Result<()> {
    let params = ParamFile::load(params)?;
    let scenario = params.scenario();
    let config = params.run_config();
    let schedule = losses::load_or_generate(
        loss_path,
        params.num_losses,
        params.seed,
        params.steps,
        params.n,
    )?;
    info!(losses = schedule.losses().len(), steps = config.steps, "Starting run");

    let simulation = Simulation::new(scenario, config, FailureSource::Scheduled(schedule))
        .context("Parameter file does not describe a runnable scenario")?;
    let mut recorder = RunRecorder::create(summary, trace)?;
    let metrics = simulation.run_with(&mut recorder);
    recorder.finish()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print_metrics(&metrics);
    }
    Ok(())
}

fn print_metrics(metrics: &Metrics) {
    println!("density={:.4}", metrics.density);
    println!("avg_speed={:.4}", metrics.mean_speed);
    println!("speed_std={:.4}", metrics.speed_stddev);
    println!("max_gap={:.4}", metrics.max_gap);
    println!("avg_gap={:.4}", metrics.mean_gap);
    println!("stability={:.4}", metrics.formation_stability);
}

fn summarize(loss_path: Option<&Path>, out: &Path, summaries: &[PathBuf]) -> Result<()> {
    let first_loss_step = match loss_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read loss file {}", path.display()))?;
            losses::parse_losses(&text)?
                .iter()
                .map(|loss| loss.step)
                .min()
                .unwrap_or(0)
        }
        None => 0,
    };

    let runs = summarize_files(summaries, first_loss_step)?;
    let file =
        File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    write_summaries(file, &runs)?;
    info!(runs = runs.len(), output = %out.display(), "Summaries written");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    let result = match cli.command {
        Commands::Batch {
            input,
            output,
            steps,
            gap_strategy,
            warmup,
            sample_interval,
            min_spare_delay,
        } => {
            let config = RunConfig {
                warmup_steps: warmup,
                sample_interval,
                min_spare_delay_steps: min_spare_delay,
                ..RunConfig::default()
            }
            .with_steps(steps)
            .with_gap_strategy(gap_strategy);
            batch(&input, &output, config)
        }
        Commands::Run {
            params,
            losses,
            summary,
            trace,
            json,
        } => run_single(
            &params,
            &losses,
            summary.as_deref(),
            trace.as_deref(),
            json,
        ),
        Commands::Summarize {
            losses,
            out,
            summaries,
        } => summarize(losses.as_deref(), &out, &summaries),
    };

    if let Err(e) = result {
        error!(error = %format!("{e:#}"), "Fatal Error");
        std::process::exit(1);
    }
}
