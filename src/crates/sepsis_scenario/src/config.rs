use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::actions::{AntibioticBag, Nutrition};
use crate::error::{DriverError, DriverResult};
use crate::telemetry::DEFAULT_SAMPLES_PER_SECOND;

/// Process-level configuration for launching the engine binary.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the engine binary to spawn.
    pub binary_path: PathBuf,
    /// Additional CLI arguments passed through to the engine.
    pub extra_args: Vec<String>,
    /// Optional engine log file (passed via `--log-file`).
    pub log_file: Option<PathBuf>,
    /// Extra environment variables applied to the child process.
    pub env: BTreeMap<String, String>,
    /// Optional working directory override for the child process.
    pub working_directory: Option<PathBuf>,
    /// Upper bound on how long to wait for the engine to announce its listen address.
    pub startup_timeout: Duration,
    /// How long a graceful shutdown may take before the process is killed.
    pub shutdown_timeout: Duration,
}

impl EngineConfig {
    /// Create a new config targeting a specific engine binary.
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            extra_args: Vec::new(),
            log_file: None,
            env: BTreeMap::new(),
            working_directory: None,
            startup_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    /// Add a passthrough CLI argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Direct the engine's own log to a file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Add an environment variable override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Override the working directory for the spawned process.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Override the startup timeout used while waiting for the listen address.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Override how long a graceful shutdown may take before the engine is killed.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Fixed treatment setup shared by every run: baseline patient, antibiotic
/// bag, meal and telemetry rate.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    /// Persisted baseline state, relative to the engine's working directory.
    pub baseline_state: PathBuf,
    /// Anatomical site of the infection.
    pub infection_location: String,
    pub antibiotic: AntibioticBag,
    pub meal: Nutrition,
    pub samples_per_second: f64,
}

impl Default for ScenarioPlan {
    fn default() -> Self {
        Self {
            baseline_state: PathBuf::from("states/StandardMale@0s.xml"),
            infection_location: "Gut".to_string(),
            antibiotic: AntibioticBag::default(),
            meal: Nutrition::default(),
            samples_per_second: DEFAULT_SAMPLES_PER_SECOND,
        }
    }
}

impl ScenarioPlan {
    pub fn with_baseline_state(mut self, path: impl Into<PathBuf>) -> Self {
        self.baseline_state = path.into();
        self
    }

    pub fn with_antibiotic(mut self, bag: AntibioticBag) -> Self {
        self.antibiotic = bag;
        self
    }

    pub fn with_samples_per_second(mut self, rate: f64) -> Self {
        self.samples_per_second = rate;
        self
    }

    /// A bag must hold something and drain at a positive rate, or the
    /// infusion cycle cannot make progress.
    pub fn validate(&self) -> DriverResult<()> {
        let bag = &self.antibiotic;
        if !(bag.volume_ml.is_finite() && bag.volume_ml > 0.0) {
            return Err(DriverError::invalid(format!(
                "antibiotic bag volume must be positive, got {} mL",
                bag.volume_ml
            )));
        }
        if !(bag.rate_ml_per_min.is_finite() && bag.rate_ml_per_min > 0.0) {
            return Err(DriverError::invalid(format!(
                "antibiotic rate must be positive, got {} mL/min",
                bag.rate_ml_per_min
            )));
        }
        if !(self.samples_per_second.is_finite() && self.samples_per_second > 0.0) {
            return Err(DriverError::invalid("telemetry sample rate must be positive"));
        }
        Ok(())
    }
}
