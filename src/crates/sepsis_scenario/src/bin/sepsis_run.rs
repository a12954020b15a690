//! Run sepsis scenarios against a physiology engine binary.
//!
//! Usage: `sepsis-run --engine <path> <name> <severity> <mic> <apply_at_m> <interval_m> <duration_hr>`
//! or `sepsis-run --engine <path> --sweep runs.json`.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sepsis_scenario::{
    launch_scenario, load_sweep, run_sweep, EngineConfig, ScenarioParameters, ScenarioPlan,
    Severity,
};

#[derive(Parser, Debug)]
#[command(name = "sepsis-run")]
#[command(about = "Run a sepsis infection and antibiotic schedule through a physiology engine")]
#[command(version)]
struct Args {
    /// Path to the engine binary
    #[arg(long)]
    engine: PathBuf,

    /// Baseline patient state, relative to the engine working directory
    #[arg(long, default_value = "states/StandardMale@0s.xml")]
    state: PathBuf,

    /// Working directory for the engine process
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Extra argument passed through to the engine (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Simulated seconds between telemetry samples
    #[arg(long, default_value_t = 300.0)]
    sample_period: f64,

    /// Seconds to wait for the engine to exit before killing it
    #[arg(long, default_value_t = 2)]
    shutdown_timeout: u64,

    /// JSON array of scenario parameters to run instead of a single scenario
    #[arg(
        long,
        conflicts_with_all = ["name", "severity", "mic", "apply_at", "interval", "duration"]
    )]
    sweep: Option<PathBuf>,

    /// Base name for the engine log and results file
    #[arg(required_unless_present = "sweep")]
    name: Option<String>,

    /// Infection severity: 0 = Mild, 1 = Moderate, 2 = Severe
    #[arg(required_unless_present = "sweep", allow_negative_numbers = true)]
    severity: Option<i64>,

    /// Minimum inhibitory concentration (g/L)
    #[arg(required_unless_present = "sweep")]
    mic: Option<f64>,

    /// Minutes after infection before the first antibiotic bag
    #[arg(required_unless_present = "sweep")]
    apply_at: Option<f64>,

    /// Minutes between antibiotic bags
    #[arg(required_unless_present = "sweep")]
    interval: Option<f64>,

    /// Scenario length (hours)
    #[arg(required_unless_present = "sweep")]
    duration: Option<f64>,
}

impl Args {
    fn single_run(&self) -> Option<ScenarioParameters> {
        Some(
            ScenarioParameters::new(self.name.clone()?, Severity::from_ordinal(self.severity?))
                .with_mic(self.mic?)
                .with_apply_at(self.apply_at?)
                .with_application_interval(self.interval?)
                .with_duration(self.duration?),
        )
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    init_logging();
    let args = Args::parse();

    let mut config = EngineConfig::new(&args.engine)
        .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout));
    for arg in &args.engine_args {
        config = config.with_arg(arg);
    }
    if let Some(dir) = &args.working_dir {
        config = config.with_working_directory(dir);
    }
    let plan = ScenarioPlan::default()
        .with_baseline_state(&args.state)
        .with_samples_per_second(1.0 / args.sample_period);

    let runs = match (&args.sweep, args.single_run()) {
        (Some(path), _) => match load_sweep(path) {
            Ok(runs) => runs,
            Err(e) => {
                error!("Failed to load sweep '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        (None, Some(params)) => vec![params],
        (None, None) => {
            error!("either --sweep or all scenario parameters are required");
            process::exit(2);
        }
    };

    let failures = if runs.len() == 1 {
        match launch_scenario(&config, &runs[0], &plan) {
            Ok(report) => {
                info!(
                    "{} finished: {} events dispatched",
                    report.run_name,
                    report.dispatches.len()
                );
                0
            }
            Err(e) => {
                error!("{} failed: {}", runs[0].run_name(), e);
                1
            }
        }
    } else {
        let outcomes = run_sweep(&config, &runs, &plan);
        for (name, outcome) in &outcomes {
            if let Ok(report) = outcome {
                info!("{name} finished: {} events dispatched", report.dispatches.len());
            }
        }
        outcomes.iter().filter(|(_, outcome)| outcome.is_err()).count()
    };

    if failures > 0 {
        error!("{failures} of {} scenario(s) failed", runs.len());
        process::exit(1);
    }
}
