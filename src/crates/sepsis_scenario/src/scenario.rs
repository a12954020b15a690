use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::error::{DriverError, DriverResult};
use crate::units::hours;

/// Discrete infection severity understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    Eliminated,
}

impl Severity {
    /// Map a command-line ordinal onto a severity.
    ///
    /// `0 → Mild`, `1 → Moderate`, `2 → Severe`. Every other value falls back
    /// to `Mild`; the fallback is traced at `warn` level but not rejected.
    pub fn from_ordinal(ordinal: i64) -> Self {
        match ordinal {
            0 => Severity::Mild,
            1 => Severity::Moderate,
            2 => Severity::Severe,
            other => {
                warn!(ordinal = other, "unmapped severity ordinal, using Mild");
                Severity::Mild
            }
        }
    }

    /// Label used in run names and logs.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Mild => "Mild",
            Severity::Moderate => "Moderate",
            Severity::Severe => "Severe",
            Severity::Eliminated => "Eliminated",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable inputs for a single scenario run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioParameters {
    /// Base name for the engine log and the results file.
    pub name: String,
    /// Infection severity; sweep files carry it as an ordinal.
    #[serde(deserialize_with = "severity_from_ordinal")]
    pub severity: Severity,
    /// Minimum inhibitory concentration of the infection, in g/L.
    pub mic_g_per_l: f64,
    /// Minutes after infection before the first antibiotic bag is hung.
    pub apply_at_min: f64,
    /// Minutes between the end of one bag and the start of the next.
    pub application_interval_min: f64,
    /// Total scenario length, in hours.
    pub duration_hr: f64,
}

impl ScenarioParameters {
    pub fn new(name: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            severity,
            mic_g_per_l: 0.0,
            apply_at_min: 0.0,
            application_interval_min: 0.0,
            duration_hr: 0.0,
        }
    }

    pub fn with_mic(mut self, mic_g_per_l: f64) -> Self {
        self.mic_g_per_l = mic_g_per_l;
        self
    }

    pub fn with_apply_at(mut self, apply_at_min: f64) -> Self {
        self.apply_at_min = apply_at_min;
        self
    }

    pub fn with_application_interval(mut self, interval_min: f64) -> Self {
        self.application_interval_min = interval_min;
        self
    }

    pub fn with_duration(mut self, duration_hr: f64) -> Self {
        self.duration_hr = duration_hr;
        self
    }

    /// Scenario length in minutes.
    pub fn duration_min(&self) -> f64 {
        hours(self.duration_hr)
    }

    /// Name shared by the results file and the run's log lines.
    ///
    /// Pattern: `<name>-<severity>-<mic>g_Per_l-<apply_at>m-<interval>m-<duration>hr`.
    pub fn run_name(&self) -> String {
        format!(
            "{}-{}-{:.6}g_Per_l-{:.6}m-{:.6}m-{:.6}hr",
            self.name,
            self.severity,
            self.mic_g_per_l,
            self.apply_at_min,
            self.application_interval_min,
            self.duration_hr
        )
    }

    /// Reject negative or non-finite times before the engine is touched.
    pub fn validate(&self) -> DriverResult<()> {
        if self.name.is_empty() {
            return Err(DriverError::invalid("name must not be empty"));
        }
        let fields = [
            ("mic_g_per_l", self.mic_g_per_l),
            ("apply_at_min", self.apply_at_min),
            ("application_interval_min", self.application_interval_min),
            ("duration_hr", self.duration_hr),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(DriverError::invalid(format!(
                    "{field} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Read a JSON array of scenario parameters.
pub fn load_sweep(path: &Path) -> DriverResult<Vec<ScenarioParameters>> {
    let file = File::open(path)?;
    let runs: Vec<ScenarioParameters> = serde_json::from_reader(BufReader::new(file))?;
    for run in &runs {
        run.validate()?;
    }
    Ok(runs)
}

fn severity_from_ordinal<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    i64::deserialize(deserializer).map(Severity::from_ordinal)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn ordinal_table_matches_labels() {
        let table = [
            (0, Severity::Mild, "Mild"),
            (1, Severity::Moderate, "Moderate"),
            (2, Severity::Severe, "Severe"),
        ];
        for (ordinal, severity, label) in table {
            assert_eq!(Severity::from_ordinal(ordinal), severity);
            assert_eq!(Severity::from_ordinal(ordinal).label(), label);
        }
    }

    #[test]
    fn unmapped_ordinals_fall_back_to_mild() {
        for ordinal in [-1, 3, 4, 99, i64::MAX] {
            assert_eq!(Severity::from_ordinal(ordinal), Severity::Mild);
        }
    }

    #[test]
    fn run_name_follows_results_pattern() {
        let params = ScenarioParameters::new("Sepsis", Severity::Moderate)
            .with_mic(0.01)
            .with_apply_at(60.0)
            .with_application_interval(360.0)
            .with_duration(24.0);

        assert_eq!(
            params.run_name(),
            "Sepsis-Moderate-0.010000g_Per_l-60.000000m-360.000000m-24.000000hr"
        );
    }

    #[test]
    fn validate_rejects_negative_and_nan() {
        let base = ScenarioParameters::new("s", Severity::Mild).with_duration(1.0);
        assert!(base.validate().is_ok());
        assert!(base.clone().with_duration(-1.0).validate().is_err());
        assert!(base.clone().with_apply_at(f64::NAN).validate().is_err());
        assert!(base.clone().with_application_interval(-0.5).validate().is_err());
        assert!(ScenarioParameters::new("", Severity::Mild).validate().is_err());
    }

    #[test]
    fn sweep_files_use_severity_ordinals() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[
                {{"name": "a", "severity": 2, "mic_g_per_l": 0.5, "apply_at_min": 30,
                  "application_interval_min": 480, "duration_hr": 12}},
                {{"name": "b", "severity": 7, "mic_g_per_l": 0.1, "apply_at_min": 0,
                  "application_interval_min": 60, "duration_hr": 1}}
            ]"#
        )
        .expect("write sweep");

        let runs = load_sweep(file.path()).expect("sweep should parse");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].severity, Severity::Severe);
        assert_eq!(runs[1].severity, Severity::Mild);
        assert_eq!(runs[0].duration_min(), 720.0);
    }
}
