//! tsp_daq command-line front end
//!
//! Runs OFET characterisation sweeps on a Keithley 2636 and writes one
//! tab-separated file per sweep step.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tsp_daq::actors::SweepScheduler;
use tsp_daq::config::Settings;
use tsp_daq::data::TsvWriter;
use tsp_daq::data::ColumnTable;
use tsp_daq::instrument::{BufferChannel, BufferField, ScriptDescriptor, Session, Smu, TransportKind};
use tsp_daq::measurement::{CancelToken, MeasurementKind};
use tsp_daq::messages::SweepEvent;

/// Sweep automation for TSP source-measure units
#[derive(Parser)]
#[command(name = "tsp_daq")]
#[command(about = "Run OFET sweeps on a Keithley 2636", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = tsp_daq::config::settings::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overriding the configuration
    #[arg(long)]
    port: Option<String>,

    /// Use the simulated instrument
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open and close the instrument connection
    Check,

    /// Measure a sample
    Measure {
        /// Sample name used in output file names
        #[arg(long)]
        sample: String,

        /// Measurements to run, in order
        #[arg(value_enum, default_values_t = [Selection::All])]
        measurements: Vec<Selection>,

        /// Output directory, overriding the configuration
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Upload any TSP script, run it and print its buffers as a table
    RunScript {
        /// Script file
        path: PathBuf,

        /// Buffer to read back, as `smua:readings` or `Label=smub:sourcevalues`.
        /// Defaults to the readings then source values of smua.
        #[arg(long = "channel")]
        channels: Vec<BufferChannel>,

        /// Accept a script that leaves every buffer empty
        #[arg(long)]
        allow_empty: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Selection {
    Iv,
    Output,
    Transfer,
    Inverter,
    /// I-V, output and transfer
    All,
}

impl Selection {
    fn kinds(self) -> &'static [MeasurementKind] {
        match self {
            Selection::Iv => &[MeasurementKind::IvSweep],
            Selection::Output => &[MeasurementKind::Output],
            Selection::Transfer => &[MeasurementKind::Transfer],
            Selection::Inverter => &[MeasurementKind::Inverter],
            Selection::All => &MeasurementKind::OFET_SEQUENCE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;
    if let Some(port) = &cli.port {
        settings.instrument.address = port.clone();
    }
    if cli.mock {
        settings.instrument.transport = TransportKind::Mock;
    }

    init_logging(&settings.application.log_level);
    info!("Starting {}", settings.application.name);

    match cli.command {
        Commands::Check => check(&settings).await,
        Commands::Measure {
            sample,
            measurements,
            output,
        } => {
            let kinds: Vec<MeasurementKind> = measurements
                .iter()
                .flat_map(|s| s.kinds().iter().copied())
                .collect();
            let output_dir = output.unwrap_or_else(|| settings.application.output_dir.clone());
            measure(&settings, &sample, &kinds, output_dir).await
        }
        Commands::RunScript {
            path,
            channels,
            allow_empty,
        } => {
            let channels = if channels.is_empty() {
                vec![
                    BufferChannel::new("smua readings", Smu::A, BufferField::Readings),
                    BufferChannel::new("smua sourcevalues", Smu::A, BufferField::SourceValues),
                ]
            } else {
                channels
            };
            let descriptor = ScriptDescriptor::from_file(path, channels);
            run_script(&settings, &descriptor, allow_empty || settings.sweep.allow_empty).await
        }
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn check(settings: &Settings) -> Result<()> {
    let mut session = Session::open(settings.session_config())
        .await
        .with_context(|| format!("Instrument at '{}' is not reachable", settings.instrument.address))?;

    match session.identity() {
        Some(idn) => println!("Connected to {} ({})", settings.instrument.address, idn),
        None => println!("Connected to {}", settings.instrument.address),
    }
    session.close().await;
    Ok(())
}

async fn measure(
    settings: &Settings,
    sample: &str,
    kinds: &[MeasurementKind],
    output_dir: PathBuf,
) -> Result<()> {
    let session = Session::open(settings.session_config())
        .await
        .context("Failed to connect to instrument")?;

    let scheduler = SweepScheduler::start(session, settings.sweep_runner());
    let logger = tokio::spawn(log_events(scheduler.subscribe()));

    let tasks: Vec<_> = kinds
        .iter()
        .map(|kind| {
            let request = tsp_daq::measurement::SweepRequest::new(*kind, sample)
                .allow_empty(settings.sweep.allow_empty);
            scheduler.submit_request(request)
        })
        .collect();

    let writer = TsvWriter::new(output_dir);
    let mut summaries = Vec::with_capacity(tasks.len());
    let mut failures = 0usize;

    for task in &tasks {
        match task.wait().await {
            Ok(result) => {
                let files = writer
                    .write_result(&result)
                    .with_context(|| format!("Failed to save {} results", result.kind))?;
                summaries.push(serde_json::json!({
                    "task": task.id(),
                    "kind": result.kind,
                    "sample": result.sample_id,
                    "steps": result.steps.iter().map(|s| &s.label).collect::<Vec<_>>(),
                    "rows": result.total_rows(),
                    "elapsed_min": result.elapsed().as_secs_f64() / 60.0,
                    "files": files,
                }));
            }
            Err(e) => {
                failures += 1;
                error!("{} sweep failed: {}", task.request().kind, e);
                summaries.push(serde_json::json!({
                    "task": task.id(),
                    "kind": task.request().kind,
                    "sample": sample,
                    "status": task.status(),
                    "error": e.to_string(),
                }));
            }
        }
    }

    if let Some(mut session) = scheduler.shutdown().await {
        session.close().await;
    }
    // Ends on RecvError::Closed once the scheduler's senders are gone
    if let Err(e) = logger.await {
        warn!("Event logger stopped abnormally: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&summaries)?);

    if failures > 0 {
        bail!("{} of {} sweeps failed", failures, tasks.len());
    }
    Ok(())
}

async fn run_script(settings: &Settings, descriptor: &ScriptDescriptor, allow_empty: bool) -> Result<()> {
    let mut session = Session::open(settings.session_config())
        .await
        .context("Failed to connect to instrument")?;

    let outcome = settings
        .sweep_runner()
        .run_descriptor(&mut session, descriptor, allow_empty, &CancelToken::new(), |p| {
            info!("{}: {}", p.step_label, p.stage)
        })
        .await;
    session.close().await;

    let step = outcome.with_context(|| format!("Script '{}' failed", descriptor.name))?;
    print!("{}", render_tsv(&step.table));
    Ok(())
}

fn render_tsv(table: &ColumnTable) -> String {
    let mut out = table.names().join("\t");
    out.push('\n');
    for row in table.rows() {
        let cells: Vec<String> = row.iter().map(|v| format!("{:e}", v)).collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

async fn log_events(mut events: broadcast::Receiver<SweepEvent>) {
    loop {
        match events.recv().await {
            Ok(SweepEvent::Queued {
                task_id,
                kind,
                sample_id,
            }) => info!("Queued {} for '{}' ({})", kind, sample_id, task_id),
            Ok(SweepEvent::Stage { progress, .. }) => info!(
                "[{}/{}] {}: {}",
                progress.step_index + 1,
                progress.step_count,
                progress.step_label,
                progress.stage
            ),
            Ok(event) if event.is_terminal() => info!("Task {} finished", event.task_id()),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} progress events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
