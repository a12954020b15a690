use serde::{Deserialize, Serialize};

/// One channel the engine samples into the results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataRequest {
    Physiology {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Substance {
        substance: String,
        property: String,
        unit: String,
    },
}

impl DataRequest {
    pub fn physiology(name: &str, unit: Option<&str>) -> Self {
        DataRequest::Physiology {
            name: name.to_string(),
            unit: unit.map(str::to_string),
        }
    }

    pub fn substance(substance: &str, property: &str, unit: &str) -> Self {
        DataRequest::Substance {
            substance: substance.to_string(),
            property: property.to_string(),
            unit: unit.to_string(),
        }
    }

    /// Column header in the results file, e.g. `HeartRate(1/min)` or
    /// `Lactate-BloodConcentration(mg/dL)`.
    pub fn header(&self) -> String {
        match self {
            DataRequest::Physiology { name, unit: Some(unit) } => format!("{name}({unit})"),
            DataRequest::Physiology { name, unit: None } => name.clone(),
            DataRequest::Substance {
                substance,
                property,
                unit,
            } => format!("{substance}-{property}({unit})"),
        }
    }
}

/// Channels, sample rate and destination registered before the loop starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequestSet {
    pub requests: Vec<DataRequest>,
    pub results_filename: String,
    pub samples_per_second: f64,
}

const PHYSIOLOGY_CHANNELS: &[(&str, Option<&str>)] = &[
    ("HeartRate", Some("1/min")),
    ("MeanArterialPressure", Some("mmHg")),
    ("SystolicArterialPressure", Some("mmHg")),
    ("DiastolicArterialPressure", Some("mmHg")),
    ("CardiacOutput", Some("L/min")),
    ("HemoglobinContent", Some("g")),
    ("CentralVenousPressure", Some("mmHg")),
    ("Hematocrit", None),
    ("ArterialBloodPH", None),
    ("UrinationRate", Some("mL/hr")),
    ("WhiteBloodCellCount", Some("ct/uL")),
    ("UrineProductionRate", Some("mL/min")),
    ("RespirationRate", Some("1/min")),
    ("OxygenSaturation", None),
    ("CarbonDioxideSaturation", None),
    ("CoreTemperature", Some("degC")),
    ("SkinTemperature", Some("degC")),
];

const BLOOD_CONCENTRATION_SUBSTANCES: &[&str] = &[
    "Bicarbonate",
    "Creatinine",
    "Lactate",
    "Piperacillin",
    "Tazobactam",
];

/// One sample every five simulated minutes.
pub const DEFAULT_SAMPLES_PER_SECOND: f64 = 1.0 / (5.0 * 60.0);

impl DataRequestSet {
    /// The fixed sepsis channel set written to `<run_name>.csv`.
    pub fn sepsis(run_name: &str, samples_per_second: f64) -> Self {
        let mut requests: Vec<DataRequest> = PHYSIOLOGY_CHANNELS
            .iter()
            .map(|(name, unit)| DataRequest::physiology(name, *unit))
            .collect();
        requests.extend(
            BLOOD_CONCENTRATION_SUBSTANCES
                .iter()
                .map(|substance| DataRequest::substance(substance, "BloodConcentration", "mg/dL")),
        );

        Self {
            requests,
            results_filename: format!("{run_name}.csv"),
            samples_per_second,
        }
    }

    /// Header row for the results file; the first column is simulated time.
    pub fn csv_header(&self) -> String {
        std::iter::once("Time(s)".to_string())
            .chain(self.requests.iter().map(DataRequest::header))
            .collect::<Vec<_>>()
            .join(",")
    }
}
