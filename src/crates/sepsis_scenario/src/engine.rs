use std::path::Path;

use crate::actions::Action;
use crate::error::DriverResult;
use crate::telemetry::DataRequestSet;

/// Boundary to the physiology engine. Every call blocks until the engine
/// has finished with it.
///
/// Times are simulated minutes.
pub trait PhysiologyEngine {
    /// Load a persisted baseline patient state.
    fn load_state(&mut self, path: &Path) -> DriverResult<()>;

    /// Register the channels to sample and where to write them.
    fn register_data_requests(&mut self, requests: &DataRequestSet) -> DriverResult<()>;

    /// Apply an action at the current simulated time.
    fn process_action(&mut self, action: &Action) -> DriverResult<()>;

    /// Integrate forward by `minutes`.
    fn advance_time(&mut self, minutes: f64) -> DriverResult<()>;

    /// Current simulated time.
    fn simulation_time(&mut self) -> DriverResult<f64>;
}
