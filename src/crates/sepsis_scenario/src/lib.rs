//! Drives a sepsis treatment timeline through an external physiology engine.
//!
//! The engine runs as a separate process; [`EngineHarness`] spawns it and
//! speaks a small length-prefixed JSON protocol. The scheduler decides when
//! to infect, feed and hang or stop antibiotic bags, and how far to advance
//! simulated time between those events.
//!
//! Typical usage:
//! ```no_run
//! use sepsis_scenario::{launch_scenario, EngineConfig, ScenarioParameters, ScenarioPlan, Severity};
//!
//! let config = EngineConfig::new("/path/to/physiology-engine").with_working_directory("runtime");
//! let params = ScenarioParameters::new("Sepsis", Severity::from_ordinal(1))
//!     .with_mic(0.01)
//!     .with_apply_at(60.0)
//!     .with_application_interval(480.0)
//!     .with_duration(24.0);
//!
//! let report = launch_scenario(&config, &params, &ScenarioPlan::default()).expect("scenario should run");
//! println!("{} finished after {} advances", report.run_name, report.advances);
//! ```

pub mod actions;
mod config;
mod engine;
mod error;
mod harness;
pub mod protocol;
mod runner;
mod scenario;
mod scheduler;
pub mod telemetry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod units;

pub use actions::{Action, AntibioticBag, CompoundInfusion, Infection, Nutrition};
pub use config::{EngineConfig, ScenarioPlan};
pub use engine::PhysiologyEngine;
pub use error::{DriverError, DriverResult};
pub use harness::{EngineHarness, LogLine, LogStream};
pub use runner::{launch_scenario, run_scenario, run_sweep};
pub use scenario::{load_sweep, ScenarioParameters, Severity};
pub use scheduler::{
    remaining_minutes, DispatchRecord, ScenarioEvent, ScenarioReport, Scheduler, TimeBudget,
    TreatmentState, FEEDING_INTERVAL_MIN, STEP_MIN,
};
pub use telemetry::{DataRequest, DataRequestSet};
