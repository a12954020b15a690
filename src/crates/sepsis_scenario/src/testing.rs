//! In-process engine double that keeps a clock and records every call.

use std::path::{Path, PathBuf};

use crate::actions::Action;
use crate::engine::PhysiologyEngine;
use crate::error::{DriverError, DriverResult};
use crate::telemetry::DataRequestSet;

/// A call observed by [`RecordingEngine`], stamped with the simulated minute
/// at which it arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    LoadState(PathBuf),
    RegisterDataRequests(DataRequestSet),
    ProcessAction { at_min: f64, action: Action },
    AdvanceTime { at_min: f64, minutes: f64 },
}

#[derive(Debug, Default)]
pub struct RecordingEngine {
    clock_min: f64,
    calls: Vec<EngineCall>,
    fail_load: bool,
    fail_action_at: Option<usize>,
    fail_advance_at: Option<usize>,
    actions_seen: usize,
    advances_seen: usize,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at a non-zero simulated time, as a restored state would.
    pub fn starting_at(minutes: f64) -> Self {
        Self {
            clock_min: minutes,
            ..Self::default()
        }
    }

    /// Make `load_state` fail as a missing or malformed state would.
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Reject the `n`-th processed action (zero-based).
    pub fn failing_action(mut self, n: usize) -> Self {
        self.fail_action_at = Some(n);
        self
    }

    /// Reject the `n`-th time advance (zero-based).
    pub fn failing_advance(mut self, n: usize) -> Self {
        self.fail_advance_at = Some(n);
        self
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    pub fn clock_min(&self) -> f64 {
        self.clock_min
    }

    /// Actions in dispatch order with their simulated timestamps.
    pub fn actions(&self) -> Vec<(f64, &Action)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::ProcessAction { at_min, action } => Some((*at_min, action)),
                _ => None,
            })
            .collect()
    }

    /// Step sizes of every advance, in order.
    pub fn advances(&self) -> Vec<f64> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::AdvanceTime { minutes, .. } => Some(*minutes),
                _ => None,
            })
            .collect()
    }
}

impl PhysiologyEngine for RecordingEngine {
    fn load_state(&mut self, path: &Path) -> DriverResult<()> {
        self.calls.push(EngineCall::LoadState(path.to_path_buf()));
        if self.fail_load {
            return Err(DriverError::StateLoad {
                path: path.to_path_buf(),
                message: "state file not found".to_string(),
            });
        }
        Ok(())
    }

    fn register_data_requests(&mut self, requests: &DataRequestSet) -> DriverResult<()> {
        self.calls.push(EngineCall::RegisterDataRequests(requests.clone()));
        Ok(())
    }

    fn process_action(&mut self, action: &Action) -> DriverResult<()> {
        let index = self.actions_seen;
        self.actions_seen += 1;
        if self.fail_action_at == Some(index) {
            return Err(DriverError::rejected("process_action", "scripted failure"));
        }
        self.calls.push(EngineCall::ProcessAction {
            at_min: self.clock_min,
            action: action.clone(),
        });
        Ok(())
    }

    fn advance_time(&mut self, minutes: f64) -> DriverResult<()> {
        let index = self.advances_seen;
        self.advances_seen += 1;
        if self.fail_advance_at == Some(index) {
            return Err(DriverError::rejected("advance_time", "scripted failure"));
        }
        if minutes < 0.0 {
            return Err(DriverError::rejected(
                "advance_time",
                format!("negative step {minutes}"),
            ));
        }
        self.calls.push(EngineCall::AdvanceTime {
            at_min: self.clock_min,
            minutes,
        });
        self.clock_min += minutes;
        Ok(())
    }

    fn simulation_time(&mut self) -> DriverResult<f64> {
        Ok(self.clock_min)
    }
}
