use tracing::{error, info};

use crate::config::{EngineConfig, ScenarioPlan};
use crate::engine::PhysiologyEngine;
use crate::error::DriverResult;
use crate::harness::EngineHarness;
use crate::scenario::ScenarioParameters;
use crate::scheduler::{ScenarioReport, Scheduler};
use crate::telemetry::DataRequestSet;

/// Load the baseline patient, register telemetry and run the scheduler.
///
/// A baseline that fails to load aborts the run before any action is
/// dispatched.
pub fn run_scenario<E: PhysiologyEngine>(
    engine: &mut E,
    params: &ScenarioParameters,
    plan: &ScenarioPlan,
) -> DriverResult<ScenarioReport> {
    params.validate()?;
    plan.validate()?;
    let run_name = params.run_name();
    info!(run = %run_name, "starting scenario");

    if let Err(err) = engine.load_state(&plan.baseline_state) {
        error!(run = %run_name, %err, "could not load state");
        return Err(err);
    }

    let requests = DataRequestSet::sepsis(&run_name, plan.samples_per_second);
    engine.register_data_requests(&requests)?;

    let report = Scheduler::new(engine, params, plan)?.run()?;
    info!(
        run = %run_name,
        dispatches = report.dispatches.len(),
        advances = report.advances,
        elapsed_min = report.elapsed_min,
        "scenario complete"
    );
    Ok(report)
}

/// Spawn an engine process for one scenario, run it and shut the engine down.
///
/// The engine log goes to `<name>.log` unless `config` already names a file.
pub fn launch_scenario(
    config: &EngineConfig,
    params: &ScenarioParameters,
    plan: &ScenarioPlan,
) -> DriverResult<ScenarioReport> {
    params.validate()?;
    let mut config = config.clone();
    if config.log_file.is_none() {
        config.log_file = Some(format!("{}.log", params.name).into());
    }

    let mut harness = EngineHarness::spawn(config)?;
    let outcome = run_scenario(&mut harness, params, plan);
    let shutdown = harness.shutdown();
    let report = outcome?;
    shutdown?;
    Ok(report)
}

/// Run each scenario in turn, each against its own engine process.
pub fn run_sweep(
    config: &EngineConfig,
    runs: &[ScenarioParameters],
    plan: &ScenarioPlan,
) -> Vec<(String, DriverResult<ScenarioReport>)> {
    runs.iter()
        .map(|params| {
            let outcome = launch_scenario(config, params, plan);
            if let Err(err) = &outcome {
                error!(run = %params.run_name(), %err, "scenario failed");
            }
            (params.run_name(), outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tracing_test::traced_test;

    use super::*;
    use crate::error::DriverError;
    use crate::scenario::Severity;
    use crate::scheduler::ScenarioEvent;
    use crate::testing::{EngineCall, RecordingEngine};

    fn params() -> ScenarioParameters {
        ScenarioParameters::new("Sepsis", Severity::Severe)
            .with_mic(0.05)
            .with_apply_at(60.0)
            .with_application_interval(240.0)
            .with_duration(6.0)
    }

    #[test]
    fn lifecycle_runs_in_order() {
        let mut engine = RecordingEngine::new();
        let report = run_scenario(&mut engine, &params(), &ScenarioPlan::default())
            .expect("scenario should run");

        let calls = engine.calls();
        assert_eq!(
            calls[0],
            EngineCall::LoadState(PathBuf::from("states/StandardMale@0s.xml"))
        );
        let EngineCall::RegisterDataRequests(requests) = &calls[1] else {
            panic!("telemetry should be registered before any action");
        };
        assert_eq!(
            requests.results_filename,
            "Sepsis-Severe-0.050000g_Per_l-60.000000m-240.000000m-6.000000hr.csv"
        );
        assert!(matches!(calls[2], EngineCall::ProcessAction { at_min, .. } if at_min == 0.0));
        assert_eq!(report.count(ScenarioEvent::Infection), 1);
        assert_eq!(report.run_name, params().run_name());
    }

    #[test]
    #[traced_test]
    fn failed_load_dispatches_nothing() {
        let mut engine = RecordingEngine::new().failing_load();
        let err = run_scenario(&mut engine, &params(), &ScenarioPlan::default())
            .expect_err("load failure is fatal");

        assert!(matches!(err, DriverError::StateLoad { .. }));
        assert_eq!(engine.calls().len(), 1);
        assert!(engine.actions().is_empty());
        assert!(logs_contain("could not load state"));
    }

    #[test]
    fn invalid_parameters_never_touch_the_engine() {
        let mut engine = RecordingEngine::new();
        let bad = params().with_duration(-2.0);
        let err = run_scenario(&mut engine, &bad, &ScenarioPlan::default())
            .expect_err("negative duration is invalid");

        assert!(matches!(err, DriverError::InvalidParameters(_)));
        assert!(engine.calls().is_empty());
    }
}
