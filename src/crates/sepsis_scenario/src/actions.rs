use serde::{Deserialize, Serialize};

use crate::scenario::Severity;

/// Clinical action submitted to the engine at its current simulated time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Infection(Infection),
    ConsumeNutrients(Nutrition),
    SubstanceCompoundInfusion(CompoundInfusion),
}

impl Action {
    /// Short name used in logs and error reports.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Infection(_) => "infection",
            Action::ConsumeNutrients(_) => "meal",
            Action::SubstanceCompoundInfusion(infusion) if infusion.rate_ml_per_min > 0.0 => {
                "infusion start"
            }
            Action::SubstanceCompoundInfusion(_) => "infusion stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infection {
    pub severity: Severity,
    pub mic_g_per_l: f64,
    pub location: String,
}

/// Meal composition, in grams unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nutrition {
    pub carbohydrate_g: f64,
    pub fat_g: f64,
    pub protein_g: f64,
    pub calcium_g: f64,
    pub sodium_g: f64,
    pub water_ml: f64,
}

impl Default for Nutrition {
    fn default() -> Self {
        Self {
            carbohydrate_g: 50.0,
            fat_g: 10.0,
            protein_g: 20.0,
            calcium_g: 100.0,
            sodium_g: 2.0,
            water_ml: 480.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundInfusion {
    pub compound: String,
    pub bag_volume_ml: f64,
    pub rate_ml_per_min: f64,
}

/// Finite-volume antibiotic reservoir delivered at a fixed rate.
///
/// The engine switches an infusion off when it receives the same compound
/// at a zero rate, so a bag is dispatched as either [`AntibioticBag::full`]
/// or [`AntibioticBag::empty`].
#[derive(Debug, Clone, PartialEq)]
pub struct AntibioticBag {
    pub compound: String,
    pub volume_ml: f64,
    pub rate_ml_per_min: f64,
}

impl Default for AntibioticBag {
    fn default() -> Self {
        Self {
            compound: "PiperacillinTazobactam".to_string(),
            volume_ml: 20.0,
            rate_ml_per_min: 0.667,
        }
    }
}

impl AntibioticBag {
    pub fn full(&self) -> Action {
        Action::SubstanceCompoundInfusion(CompoundInfusion {
            compound: self.compound.clone(),
            bag_volume_ml: self.volume_ml,
            rate_ml_per_min: self.rate_ml_per_min,
        })
    }

    pub fn empty(&self) -> Action {
        Action::SubstanceCompoundInfusion(CompoundInfusion {
            compound: self.compound.clone(),
            bag_volume_ml: self.volume_ml,
            rate_ml_per_min: 0.0,
        })
    }

    /// Minutes needed to drain the bag from full.
    pub fn drain_minutes(&self) -> f64 {
        self.volume_ml / self.rate_ml_per_min
    }
}
