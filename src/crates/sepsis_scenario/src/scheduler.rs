//! Time-phased event scheduling.
//!
//! The scheduler walks simulated time from zero to the scenario duration.
//! At each step boundary it decides whether a meal, the first antibiotic
//! dose, an empty bag or a fresh bag is due, then asks the engine to advance
//! exactly to the next boundary. It never models physiology itself.

use std::fmt;

use tracing::{debug, trace};

use crate::actions::{Action, Infection};
use crate::config::ScenarioPlan;
use crate::engine::PhysiologyEngine;
use crate::error::{DriverError, DriverResult};
use crate::scenario::ScenarioParameters;
use crate::units::{hours, TIME_TOLERANCE_MIN};

/// Largest single advance outside of the final partial hour.
pub const STEP_MIN: f64 = hours(1.0);

/// Accumulated non-feeding time after which a meal is served.
pub const FEEDING_INTERVAL_MIN: f64 = hours(8.0);

/// Antibiotic treatment phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentState {
    /// `apply_at` has not been reached yet.
    NoTreatmentYet,
    /// A bag is hung and draining.
    Infusing,
    /// The last bag ran dry; waiting out the application interval.
    Idle,
}

/// Counters the scheduler keeps between engine calls, in minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeBudget {
    pub remaining_min: f64,
    pub since_feeding_min: f64,
    pub since_dose_min: f64,
    pub applying_min: f64,
}

/// Event dispatched to the engine by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioEvent {
    Infection,
    Meal,
    FirstDose,
    BagEmptied,
    BagRearmed,
}

impl ScenarioEvent {
    pub fn label(self) -> &'static str {
        match self {
            ScenarioEvent::Infection => "infection",
            ScenarioEvent::Meal => "meal",
            ScenarioEvent::FirstDose => "first antibiotic dose",
            ScenarioEvent::BagEmptied => "empty antibiotic bag",
            ScenarioEvent::BagRearmed => "antibiotic bag re-arm",
        }
    }
}

impl fmt::Display for ScenarioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An event and the scenario minute it was dispatched at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchRecord {
    pub at_min: f64,
    pub event: ScenarioEvent,
}

/// Outcome of a completed scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub run_name: String,
    pub dispatches: Vec<DispatchRecord>,
    pub advances: usize,
    pub elapsed_min: f64,
    pub final_state: TreatmentState,
}

impl ScenarioReport {
    pub fn count(&self, event: ScenarioEvent) -> usize {
        self.dispatches
            .iter()
            .filter(|record| record.event == event)
            .count()
    }

    /// Scenario minutes at which `event` was dispatched.
    pub fn times_of(&self, event: ScenarioEvent) -> Vec<f64> {
        self.dispatches
            .iter()
            .filter(|record| record.event == event)
            .map(|record| record.at_min)
            .collect()
    }
}

/// Time remaining in the scenario, derived from the engine clock rather than
/// from the sum of requested steps.
pub fn remaining_minutes(duration_min: f64, start_min: f64, now_min: f64) -> f64 {
    duration_min - (now_min - start_min)
}

/// Drives one scenario against a loaded engine.
pub struct Scheduler<'a, E: PhysiologyEngine> {
    engine: &'a mut E,
    params: &'a ScenarioParameters,
    plan: &'a ScenarioPlan,
    start_min: f64,
    budget: TimeBudget,
    state: TreatmentState,
    dispatches: Vec<DispatchRecord>,
    advances: usize,
}

impl<'a, E: PhysiologyEngine> Scheduler<'a, E> {
    /// Bind to an engine whose baseline state is already loaded. Scenario
    /// time zero is the engine's current simulated time.
    pub fn new(
        engine: &'a mut E,
        params: &'a ScenarioParameters,
        plan: &'a ScenarioPlan,
    ) -> DriverResult<Self> {
        params.validate()?;
        plan.validate()?;
        let start_min = engine.simulation_time()?;
        Ok(Self {
            engine,
            params,
            plan,
            start_min,
            budget: TimeBudget {
                remaining_min: params.duration_min(),
                ..TimeBudget::default()
            },
            state: TreatmentState::NoTreatmentYet,
            dispatches: Vec::new(),
            advances: 0,
        })
    }

    /// Infect the patient and run the loop until the duration has elapsed.
    pub fn run(mut self) -> DriverResult<ScenarioReport> {
        let infection = Action::Infection(Infection {
            severity: self.params.severity,
            mic_g_per_l: self.params.mic_g_per_l,
            location: self.plan.infection_location.clone(),
        });
        self.dispatch(ScenarioEvent::Infection, &infection, 0.0)?;

        let duration_min = self.params.duration_min();
        let mut elapsed = 0.0;
        self.budget.remaining_min = duration_min;

        while self.budget.remaining_min > TIME_TOLERANCE_MIN {
            self.check_feeding(elapsed)?;
            self.check_first_dose(elapsed)?;

            if self.budget.remaining_min < STEP_MIN {
                let step = self.budget.remaining_min;
                self.advance(step, elapsed)?;
            } else {
                match self.state {
                    TreatmentState::NoTreatmentYet => self.step_before_treatment(elapsed)?,
                    TreatmentState::Infusing => self.step_infusing(elapsed)?,
                    TreatmentState::Idle => self.step_idle(elapsed)?,
                }
            }

            let now = self.engine.simulation_time()?;
            self.budget.remaining_min = remaining_minutes(duration_min, self.start_min, now);
            elapsed = now - self.start_min;
        }

        Ok(ScenarioReport {
            run_name: self.params.run_name(),
            dispatches: self.dispatches,
            advances: self.advances,
            elapsed_min: elapsed,
            final_state: self.state,
        })
    }

    fn check_feeding(&mut self, elapsed: f64) -> DriverResult<()> {
        if self.budget.since_feeding_min + TIME_TOLERANCE_MIN >= FEEDING_INTERVAL_MIN {
            self.budget.since_feeding_min -= FEEDING_INTERVAL_MIN;
            let meal = Action::ConsumeNutrients(self.plan.meal.clone());
            self.dispatch(ScenarioEvent::Meal, &meal, elapsed)?;
        }
        Ok(())
    }

    fn check_first_dose(&mut self, elapsed: f64) -> DriverResult<()> {
        if self.state == TreatmentState::NoTreatmentYet
            && elapsed + TIME_TOLERANCE_MIN >= self.params.apply_at_min
        {
            let bag = self.plan.antibiotic.full();
            self.dispatch(ScenarioEvent::FirstDose, &bag, elapsed)?;
            self.budget.applying_min = 0.0;
            self.budget.since_dose_min = 0.0;
            self.state = TreatmentState::Infusing;
        }
        Ok(())
    }

    /// Longest step that does not run past the next meal.
    fn step_limit(&self) -> f64 {
        let until_meal = FEEDING_INTERVAL_MIN - self.budget.since_feeding_min;
        if until_meal > TIME_TOLERANCE_MIN {
            until_meal.min(STEP_MIN)
        } else {
            STEP_MIN
        }
    }

    fn step_before_treatment(&mut self, elapsed: f64) -> DriverResult<()> {
        let until_dose = self.params.apply_at_min - elapsed;
        let limit = self.step_limit();
        let step = if until_dose > 0.0 {
            until_dose.min(limit)
        } else {
            limit
        };
        self.advance(step, elapsed)
    }

    fn step_infusing(&mut self, elapsed: f64) -> DriverResult<()> {
        let plan = self.plan;
        let bag = &plan.antibiotic;
        let volume_applied = bag.rate_ml_per_min * self.budget.applying_min;
        let until_empty = (bag.volume_ml - volume_applied).max(0.0) / bag.rate_ml_per_min;
        let limit = self.step_limit();

        if until_empty > limit + TIME_TOLERANCE_MIN {
            self.advance(limit, elapsed)?;
            self.budget.applying_min += limit;
            self.budget.since_dose_min = 0.0;
            return Ok(());
        }

        // Bag runs dry within this step: stop exactly when it does.
        let empty = bag.empty();
        self.advance(until_empty, elapsed)?;
        self.dispatch(ScenarioEvent::BagEmptied, &empty, elapsed + until_empty)?;
        self.budget.applying_min = 0.0;
        self.budget.since_dose_min = 0.0;
        self.state = TreatmentState::Idle;
        Ok(())
    }

    fn step_idle(&mut self, elapsed: f64) -> DriverResult<()> {
        let until_rearm =
            (self.params.application_interval_min - self.budget.since_dose_min).max(0.0);
        let limit = self.step_limit();
        if until_rearm > limit + TIME_TOLERANCE_MIN {
            self.advance(limit, elapsed)?;
            self.budget.since_dose_min += limit;
            return Ok(());
        }

        self.advance(until_rearm, elapsed)?;
        let bag = self.plan.antibiotic.full();
        self.dispatch(ScenarioEvent::BagRearmed, &bag, elapsed + until_rearm)?;
        self.budget.since_dose_min = 0.0;
        self.budget.applying_min = 0.0;
        self.state = TreatmentState::Infusing;
        Ok(())
    }

    fn advance(&mut self, step_min: f64, at_min: f64) -> DriverResult<()> {
        if step_min > 0.0 {
            trace!(step_min, at_min, state = ?self.state, "advancing engine");
            self.engine
                .advance_time(step_min)
                .map_err(|source| DriverError::Advance {
                    step_min,
                    at_min,
                    source: Box::new(source),
                })?;
            self.advances += 1;
        }
        self.budget.since_feeding_min += step_min;
        Ok(())
    }

    fn dispatch(&mut self, event: ScenarioEvent, action: &Action, at_min: f64) -> DriverResult<()> {
        debug!(event = event.label(), at_min, action = action.name(), "dispatching");
        self.engine
            .process_action(action)
            .map_err(|source| DriverError::Dispatch {
                event: event.label(),
                at_min,
                source: Box::new(source),
            })?;
        self.dispatches.push(DispatchRecord { at_min, event });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::AntibioticBag;
    use crate::scenario::Severity;
    use crate::testing::{EngineCall, RecordingEngine};

    const EPS: f64 = 1e-9;

    fn params(apply_at: f64, interval: f64, duration_hr: f64) -> ScenarioParameters {
        ScenarioParameters::new("Sepsis", Severity::Moderate)
            .with_mic(0.01)
            .with_apply_at(apply_at)
            .with_application_interval(interval)
            .with_duration(duration_hr)
    }

    fn run(
        engine: &mut RecordingEngine,
        params: &ScenarioParameters,
        plan: &ScenarioPlan,
    ) -> ScenarioReport {
        Scheduler::new(engine, params, plan)
            .expect("scheduler should bind")
            .run()
            .expect("scenario should complete")
    }

    #[test]
    fn zero_duration_only_infects() {
        let mut engine = RecordingEngine::new();
        let report = run(&mut engine, &params(0.0, 60.0, 0.0), &ScenarioPlan::default());

        assert_eq!(report.dispatches.len(), 1);
        assert_eq!(report.dispatches[0].event, ScenarioEvent::Infection);
        assert_eq!(report.advances, 0);
        assert!(engine.advances().is_empty());
        assert_eq!(report.count(ScenarioEvent::FirstDose), 0);
        assert_eq!(report.count(ScenarioEvent::Meal), 0);
    }

    #[test]
    fn infection_carries_severity_mic_and_site() {
        let mut engine = RecordingEngine::new();
        run(&mut engine, &params(0.0, 60.0, 0.0), &ScenarioPlan::default());

        let actions = engine.actions();
        let (at, Action::Infection(infection)) = actions[0] else {
            panic!("first action should be the infection");
        };
        assert_eq!(at, 0.0);
        assert_eq!(infection.severity, Severity::Moderate);
        assert_eq!(infection.mic_g_per_l, 0.01);
        assert_eq!(infection.location, "Gut");
    }

    #[test]
    fn elapsed_time_matches_duration_exactly() {
        let cases = [
            (30.0, 120.0, 6.0),
            (0.0, 0.0, 3.25),
            (45.5, 37.0, 11.7),
            (600.0, 480.0, 48.0),
            (10.0, 1000.0, 0.4),
        ];
        for (apply_at, interval, duration_hr) in cases {
            let params = params(apply_at, interval, duration_hr);
            let mut engine = RecordingEngine::new();
            let report = run(&mut engine, &params, &ScenarioPlan::default());

            let duration = params.duration_min();
            assert!(
                (report.elapsed_min - duration).abs() < 1e-6,
                "elapsed {} != duration {duration}",
                report.elapsed_min
            );
            assert!(engine.clock_min() <= duration + 1e-6);
            assert!(engine.advances().iter().all(|step| *step >= 0.0 && *step <= STEP_MIN));
        }
    }

    #[test]
    fn start_time_of_restored_state_is_scenario_zero() {
        let mut engine = RecordingEngine::starting_at(100.0);
        let report = run(&mut engine, &params(90.0, 120.0, 4.0), &ScenarioPlan::default());

        assert!((engine.clock_min() - 340.0).abs() < 1e-6);
        assert_eq!(report.times_of(ScenarioEvent::FirstDose), vec![90.0]);
        let first_dose_clock = engine
            .actions()
            .iter()
            .find(|(_, action)| matches!(action, Action::SubstanceCompoundInfusion(_)))
            .map(|(at, _)| *at);
        assert_eq!(first_dose_clock, Some(190.0));
    }

    #[test]
    fn first_dose_fires_once_at_apply_at() {
        for apply_at in [0.0, 30.0, 59.0, 60.0, 90.5, 125.0, 479.0] {
            let mut engine = RecordingEngine::new();
            let report = run(&mut engine, &params(apply_at, 240.0, 24.0), &ScenarioPlan::default());

            assert_eq!(report.count(ScenarioEvent::FirstDose), 1, "apply_at {apply_at}");
            let at = report.times_of(ScenarioEvent::FirstDose)[0];
            assert!((at - apply_at).abs() < 1e-6, "dose at {at}, expected {apply_at}");
        }
    }

    #[test]
    fn steps_align_with_first_dose_boundary() {
        let mut engine = RecordingEngine::new();
        run(&mut engine, &params(90.0, 240.0, 3.0), &ScenarioPlan::default());

        let advances = engine.advances();
        assert_eq!(advances[0], 60.0);
        assert_eq!(advances[1], 30.0);
    }

    #[test]
    fn bag_empties_exactly_when_volume_runs_out() {
        let plan = ScenarioPlan::default().with_antibiotic(AntibioticBag {
            compound: "PiperacillinTazobactam".to_string(),
            volume_ml: 100.0,
            rate_ml_per_min: 0.5,
        });
        let mut engine = RecordingEngine::new();
        let report = run(&mut engine, &params(0.0, 600.0, 12.0), &plan);

        // 200 minutes of bag: three full hours, then a 20 minute remainder.
        assert_eq!(&engine.advances()[..4], &[60.0, 60.0, 60.0, 20.0]);
        assert_eq!(report.times_of(ScenarioEvent::BagEmptied), vec![200.0]);
    }

    #[test]
    fn default_bag_drains_inside_the_first_hour() {
        let plan = ScenarioPlan::default();
        let drain = plan.antibiotic.drain_minutes();
        let mut engine = RecordingEngine::new();
        let report = run(&mut engine, &params(30.0, 120.0, 6.0), &plan);

        assert_eq!(
            report
                .dispatches
                .iter()
                .map(|record| record.event)
                .collect::<Vec<_>>(),
            vec![
                ScenarioEvent::Infection,
                ScenarioEvent::FirstDose,
                ScenarioEvent::BagEmptied,
                ScenarioEvent::BagRearmed,
                ScenarioEvent::BagEmptied,
                ScenarioEvent::BagRearmed,
            ]
        );
        let emptied = report.times_of(ScenarioEvent::BagEmptied);
        assert!((emptied[0] - (30.0 + drain)).abs() < EPS);
        assert!(drain > 0.0);
        assert_eq!(report.final_state, TreatmentState::Infusing);
    }

    #[test]
    fn bag_is_rearmed_no_later_than_the_interval() {
        for interval in [0.0, 45.0, 60.0, 120.0, 150.0, 333.3] {
            let mut engine = RecordingEngine::new();
            let report = run(&mut engine, &params(15.0, interval, 24.0), &ScenarioPlan::default());

            let emptied = report.times_of(ScenarioEvent::BagEmptied);
            let rearmed = report.times_of(ScenarioEvent::BagRearmed);
            assert!(!rearmed.is_empty(), "interval {interval} should re-arm");
            for (empty_at, rearm_at) in emptied.iter().zip(rearmed.iter()) {
                let idle = rearm_at - empty_at;
                assert!(idle >= -EPS, "re-armed before emptying");
                assert!(idle <= interval + 1e-6, "idle {idle} exceeded interval {interval}");
                assert!((idle - interval).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn rearmed_bags_start_full() {
        let mut engine = RecordingEngine::new();
        run(&mut engine, &params(0.0, 60.0, 8.0), &ScenarioPlan::default());

        let rates: Vec<f64> = engine
            .actions()
            .iter()
            .filter_map(|(_, action)| match action {
                Action::SubstanceCompoundInfusion(infusion) => Some(infusion.rate_ml_per_min),
                _ => None,
            })
            .collect();
        assert!(rates.len() >= 4);
        for pair in rates.chunks(2) {
            assert_eq!(pair[0], 0.667);
            if let Some(stop) = pair.get(1) {
                assert_eq!(*stop, 0.0);
            }
        }
    }

    #[test]
    fn meals_fire_on_eight_hour_boundaries() {
        let mut engine = RecordingEngine::new();
        let report = run(&mut engine, &params(10_000.0, 60.0, 24.0), &ScenarioPlan::default());

        // The run ends at 1440 before a third meal is checked.
        assert_eq!(report.times_of(ScenarioEvent::Meal), vec![480.0, 960.0]);
    }

    #[test]
    fn meals_stay_aligned_while_bags_cycle() {
        let mut engine = RecordingEngine::new();
        let report = run(&mut engine, &params(30.0, 90.0, 24.0), &ScenarioPlan::default());

        let meals = report.times_of(ScenarioEvent::Meal);
        assert_eq!(meals.len(), 2);
        for (meal, expected) in meals.iter().zip([480.0, 960.0]) {
            assert!((meal - expected).abs() < 1e-6, "meal at {meal}, expected {expected}");
        }
        assert!(report.count(ScenarioEvent::BagRearmed) >= 10);
        assert!(engine.advances().iter().all(|step| *step <= STEP_MIN));
    }

    #[test]
    fn feeding_overshoot_carries_over() {
        let mut engine = RecordingEngine::new();
        let plan = ScenarioPlan::default();
        let params = params(10_000.0, 60.0, 10.0);
        let mut scheduler =
            Scheduler::new(&mut engine, &params, &plan).expect("scheduler should bind");
        scheduler.budget.since_feeding_min = FEEDING_INTERVAL_MIN + 60.0;

        scheduler.check_feeding(0.0).expect("meal dispatch");
        assert!((scheduler.budget.since_feeding_min - 60.0).abs() < EPS);
        assert_eq!(scheduler.dispatches.len(), 1);
        assert_eq!(scheduler.dispatches[0].event, ScenarioEvent::Meal);
    }

    #[test]
    fn late_apply_at_never_leaves_no_treatment() {
        let mut engine = RecordingEngine::new();
        let params = params(hours(5.0) + 1.0, 60.0, 5.0);
        let report = run(&mut engine, &params, &ScenarioPlan::default());

        assert_eq!(report.final_state, TreatmentState::NoTreatmentYet);
        assert_eq!(report.count(ScenarioEvent::FirstDose), 0);
        let infusions = engine.calls().iter().filter(|call| {
            matches!(
                call,
                EngineCall::ProcessAction {
                    action: Action::SubstanceCompoundInfusion(_),
                    ..
                }
            )
        });
        assert_eq!(infusions.count(), 0);
    }

    #[test]
    fn final_partial_hour_is_one_advance() {
        let mut engine = RecordingEngine::new();
        run(&mut engine, &params(10_000.0, 60.0, 2.5), &ScenarioPlan::default());

        assert_eq!(engine.advances(), vec![60.0, 60.0, 30.0]);
    }

    #[test]
    fn failed_dispatch_names_the_event() {
        // Action 0 is the infection, action 1 the first dose.
        let mut engine = RecordingEngine::new().failing_action(1);
        let plan = ScenarioPlan::default();
        let params = params(30.0, 60.0, 4.0);
        let err = Scheduler::new(&mut engine, &params, &plan)
            .expect("scheduler should bind")
            .run()
            .expect_err("dispatch failure should abort");

        match err {
            DriverError::Dispatch { event, at_min, .. } => {
                assert_eq!(event, "first antibiotic dose");
                assert!((at_min - 30.0).abs() < EPS);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn failed_advance_aborts_the_run() {
        let mut engine = RecordingEngine::new().failing_advance(2);
        let plan = ScenarioPlan::default();
        let params = params(10_000.0, 60.0, 4.0);
        let err = Scheduler::new(&mut engine, &params, &plan)
            .expect("scheduler should bind")
            .run()
            .expect_err("advance failure should abort");

        assert!(matches!(err, DriverError::Advance { at_min, .. } if (at_min - 120.0).abs() < EPS));
        assert_eq!(engine.advances().len(), 2);
    }

    #[test]
    fn remaining_is_derived_from_the_clock() {
        assert_eq!(remaining_minutes(120.0, 0.0, 60.0), 60.0);
        assert_eq!(remaining_minutes(120.0, 30.0, 150.0), 0.0);
        assert!(remaining_minutes(120.0, 0.0, 121.0) < 0.0);
    }
}
