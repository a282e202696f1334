use std::path::Path;

use bevy_app::App;
use bevy_ecs::prelude::*;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{EngineError, SessionEngine};
use crate::error::SessionError;
use crate::session::action::{ActionLog, ScheduledActions};
use crate::session::event::Event;
use crate::session::observation::{ObservationLog, ObservationSchema, ObservationSchemaRes};
use crate::session::step::{RunPhase, StepIndex};
use crate::session::SessionDefaultPlugins;

/// The engine module driven by this session.
#[derive(Resource)]
pub struct EngineRes(pub Box<dyn SessionEngine>);

/// First engine fault recorded during an update cycle.
///
/// Systems stay infallible and park the fault here; the step iterator takes
/// it and surfaces it as a [`SessionError`]. Subsequent systems in the same
/// cycle are skipped through the [`session_healthy`] run condition.
#[derive(Resource, Default)]
pub struct SessionHealth {
    error: Option<EngineError>,
}

impl SessionHealth {
    pub fn record(&mut self, err: EngineError) {
        if self.error.is_none() {
            self.error = Some(err);
        } else {
            warn!(error = %err, "engine fault after run already failed");
        }
    }

    pub fn take(&mut self) -> Option<EngineError> {
        self.error.take()
    }
}

/// Run condition: no engine fault recorded in this cycle.
pub fn session_healthy(health: Res<SessionHealth>) -> bool {
    health.error.is_none()
}

/// Session-level knobs.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Restart the step counter at zero on each `start_dynamics`.
    ///
    /// Off by default: the reference behavior keeps one monotonic counter
    /// across chained scenarios, so schedules for a second scenario are
    /// expressed on the continuing count.
    pub reset_step_counter: bool,
    /// Print one `<step> <observation_vector>` line per step to stdout.
    pub echo_observations: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            reset_step_counter: false,
            echo_observations: true,
        }
    }
}

/// One scenario session: an engine module plus the ECS world sequencing it.
///
/// Owns the `App` the way the engine module owns its numerics: `configure`
/// builds the world, `solve_power_flow` and `start_dynamics` mirror the
/// engine's two-phase initialization, and `steps` drives the dynamic run,
/// one `App::update()` per step. Dropping the session releases the module;
/// the `Environment` it references outlives it by `Arc` ownership.
pub struct ScenarioSession {
    data_storage: App,
}

impl ScenarioSession {
    /// Builds a session around an engine module.
    pub fn configure(engine: Box<dyn SessionEngine>) -> Self {
        Self::configure_with(engine, SessionConfig::default())
    }

    pub fn configure_with(engine: Box<dyn SessionEngine>, config: SessionConfig) -> Self {
        let mut app = App::new();
        app.add_plugins(SessionDefaultPlugins);
        app.insert_resource(EngineRes(engine));
        app.insert_resource(SessionHealth::default());
        app.insert_resource(config);
        ScenarioSession { data_storage: app }
    }

    pub fn app(&self) -> &App {
        &self.data_storage
    }

    pub fn app_mut(&mut self) -> &mut App {
        &mut self.data_storage
    }

    pub fn world(&self) -> &World {
        self.app().world()
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.app_mut().world_mut()
    }

    fn phase(&self) -> RunPhase {
        *self.world().resource::<RunPhase>()
    }

    fn set_phase(&mut self, phase: RunPhase) {
        *self.world_mut().resource_mut::<RunPhase>() = phase;
    }

    /// Solves the power flow for `path` and transfers the solution into the
    /// dynamic context.
    ///
    /// Fatal on a rejected descriptor or a non-converging case; physical
    /// solve failure is not transient and is never retried.
    pub fn solve_power_flow(&mut self, path: &Path) -> Result<(), SessionError> {
        if self.phase() == RunPhase::Stepping {
            return Err(SessionError::Phase("solve_power_flow during dynamic run"));
        }
        let mut engine = self.world_mut().resource_mut::<EngineRes>();
        engine.0.solve_power_flow(path)?;
        engine.0.transfer_state()?;
        self.set_phase(RunPhase::Configured);
        info!(case = %path.display(), "power flow solved and transferred");
        Ok(())
    }

    /// Re-copies the held power-flow solution into the dynamic context.
    ///
    /// Required before `start_dynamics` when a second scenario reuses the
    /// same solve; the engine does not reset state on its own.
    pub fn transfer_state(&mut self) -> Result<(), SessionError> {
        match self.phase() {
            RunPhase::Created => return Err(SessionError::Phase("transfer_state before power flow")),
            RunPhase::Stepping => return Err(SessionError::Phase("transfer_state during dynamic run")),
            _ => {}
        }
        self.world_mut()
            .resource_mut::<EngineRes>()
            .0
            .transfer_state()?;
        self.set_phase(RunPhase::Configured);
        Ok(())
    }

    /// Submits the fault events and starts the dynamic phase.
    ///
    /// `pre_step` of -1 keeps the engine's default starting step. May be
    /// called again on the same session once a scenario has completed; the
    /// step counter keeps counting unless
    /// [`SessionConfig::reset_step_counter`] is set.
    pub fn start_dynamics(&mut self, events: &[Event], pre_step: i32) -> Result<(), SessionError> {
        match self.phase() {
            RunPhase::Created => return Err(SessionError::Phase("start_dynamics before power flow")),
            RunPhase::Stepping => return Err(SessionError::Phase("start_dynamics during dynamic run")),
            _ => {}
        }
        self.world_mut()
            .resource_mut::<EngineRes>()
            .0
            .init_dynamics(events, pre_step)?;
        if self.world().resource::<SessionConfig>().reset_step_counter {
            self.world_mut().resource_mut::<StepIndex>().0 = 0;
        }
        // Channel identity may change with the new run configuration.
        self.world_mut().remove_resource::<ObservationSchemaRes>();
        self.set_phase(RunPhase::Stepping);
        info!(events = events.len(), pre_step, "dynamic phase initialized");
        Ok(())
    }

    /// Registers a schedule of control actions for this session.
    pub fn register_actions(&mut self, schedule: ScheduledActions) {
        self.world_mut().spawn(schedule);
    }

    /// Arms or suppresses every registered schedule without removing entries.
    pub fn arm_actions(&mut self, armed: bool) {
        let world = self.world_mut();
        let mut query = world.query::<&mut ScheduledActions>();
        for mut sched in query.iter_mut(world) {
            sched.armed = armed;
        }
    }

    /// The observation schema for the current run configuration.
    ///
    /// Queried from the engine once and cached; repeated calls return the
    /// cached parallel lists.
    pub fn observation_schema(&mut self) -> Result<ObservationSchema, SessionError> {
        if let Some(cached) = self.world().get_resource::<ObservationSchemaRes>() {
            return Ok(cached.0.clone());
        }
        let schema = self
            .world_mut()
            .resource_mut::<EngineRes>()
            .0
            .observation_schema()?;
        self.world_mut()
            .insert_resource(ObservationSchemaRes(schema.clone()));
        Ok(schema)
    }

    /// Lazy per-step sequence for the running scenario.
    ///
    /// Each item is the `(step_index, observation_vector)` pair of one
    /// completed step; the sequence ends when the engine reports the run
    /// done. Exhausted sequences cannot be resumed; a new scenario requires
    /// a fresh `start_dynamics`.
    pub fn steps(&mut self) -> Result<ScenarioSteps<'_>, SessionError> {
        if self.phase() != RunPhase::Stepping {
            return Err(SessionError::Phase("step loop before start_dynamics"));
        }
        Ok(ScenarioSteps { session: self })
    }

    /// Runs the current scenario to completion, draining the step sequence.
    pub fn run_to_completion(&mut self) -> Result<usize, SessionError> {
        let mut count = 0usize;
        for step in self.steps()? {
            step?;
            count += 1;
        }
        Ok(count)
    }

    pub fn step_index(&self) -> u64 {
        self.world().resource::<StepIndex>().0
    }

    pub fn action_log(&self) -> &ActionLog {
        self.world().resource::<ActionLog>()
    }

    pub fn observation_log(&self) -> &ObservationLog {
        self.world().resource::<ObservationLog>()
    }

    /// Releases the engine module.
    ///
    /// The module drops before the `Environment` it references; the shared
    /// runtime context is released when its last holder goes away.
    pub fn teardown(self) {
        info!("session torn down");
    }
}

/// Iterator over the remaining steps of the running scenario.
pub struct ScenarioSteps<'a> {
    session: &'a mut ScenarioSession,
}

impl std::fmt::Debug for ScenarioSteps<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioSteps").finish_non_exhaustive()
    }
}

impl Iterator for ScenarioSteps<'_> {
    type Item = Result<(u64, DVector<f64>), SessionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let session = &mut *self.session;
        if session.phase() != RunPhase::Stepping {
            return None;
        }
        if session.world().resource::<EngineRes>().0.is_done() {
            session.set_phase(RunPhase::Finished);
            return None;
        }
        session.app_mut().update();
        if let Some(err) = session.world_mut().resource_mut::<SessionHealth>().take() {
            // Mid-run failure invalidates the run; only a full
            // reconfiguration may retry.
            session.set_phase(RunPhase::Finished);
            return Some(Err(err.into()));
        }
        let log = session.world().resource::<ObservationLog>();
        let (step, vals) = log
            .last()
            .expect("healthy update records one observation");
        Some(Ok((step, vals.clone())))
    }
}

#[cfg(test)]
#[cfg(feature = "scripted")]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::scripted::{ScriptedEngine, SharedRecord};
    use crate::engine::{test_env_lock, Environment};
    use crate::io::case::demo_case_path;
    use crate::session::action::{Action, ScheduledAction};

    fn demo_session(config: SessionConfig) -> (ScenarioSession, SharedRecord, Arc<Environment>) {
        let env = Environment::acquire().unwrap();
        let engine = ScriptedEngine::create(env.clone());
        let record = engine.recorder();
        let session = ScenarioSession::configure_with(Box::new(engine), config);
        (session, record, env)
    }

    fn quiet() -> SessionConfig {
        SessionConfig {
            reset_step_counter: false,
            echo_observations: false,
        }
    }

    #[test]
    fn test_step_sequence_is_gapless() {
        let _guard = test_env_lock();
        let (mut session, _record, _env) = demo_session(quiet());
        session.solve_power_flow(&demo_case_path()).unwrap();
        session.start_dynamics(&[], -1).unwrap();

        let steps: Vec<_> = session
            .steps()
            .unwrap()
            .map(|s| s.unwrap())
            .collect();
        assert!(!steps.is_empty());
        for (i, (step, vals)) in steps.iter().enumerate() {
            assert_eq!(*step, i as u64);
            assert_eq!(vals.len(), 6);
        }
        // Exhausted sequences stay exhausted.
        assert!(matches!(session.steps(), Err(SessionError::Phase(_))));
    }

    #[test]
    fn test_actions_fire_exactly_on_trigger_steps() {
        let _guard = test_env_lock();
        let (mut session, record, _env) = demo_session(quiet());
        session.solve_power_flow(&demo_case_path()).unwrap();
        session.start_dynamics(&[], -1).unwrap();
        session.register_actions(ScheduledActions::new(vec![
            ScheduledAction {
                trigger_step: 2,
                action: Action::load_shed(5, "1", -0.2),
            },
            ScheduledAction {
                trigger_step: 2,
                action: Action::load_shed(7, "1", -0.2),
            },
            ScheduledAction {
                trigger_step: 5,
                action: Action::load_shed(5, "1", -0.2),
            },
        ]));

        session.run_to_completion().unwrap();

        let applied = &session.action_log().applied;
        assert_eq!(applied.len(), 3);
        assert_eq!(applied[0].trigger_step, 2);
        assert_eq!(applied[0].action.target_bus, 5);
        assert_eq!(applied[1].action.target_bus, 7);
        assert_eq!(applied[2].trigger_step, 5);

        let record = record.lock().unwrap();
        assert_eq!(record.actions.len(), 3);
        assert_eq!(record.actions[0], Action::load_shed(5, "1", -0.2));
    }

    #[test]
    fn test_disarmed_schedule_fires_nothing() {
        let _guard = test_env_lock();
        let (mut session, record, _env) = demo_session(quiet());
        session.solve_power_flow(&demo_case_path()).unwrap();
        session.start_dynamics(&[], -1).unwrap();
        session.register_actions(ScheduledActions::new(vec![ScheduledAction {
            trigger_step: 2,
            action: Action::load_shed(5, "1", -0.2),
        }]));
        session.arm_actions(false);

        session.run_to_completion().unwrap();

        assert!(session.action_log().applied.is_empty());
        assert!(record.lock().unwrap().actions.is_empty());
    }

    #[test]
    fn test_schema_query_is_idempotent() {
        let _guard = test_env_lock();
        let (mut session, _record, _env) = demo_session(quiet());
        session.solve_power_flow(&demo_case_path()).unwrap();
        session.start_dynamics(&[], -1).unwrap();

        let first = session.observation_schema().unwrap();
        let second = session.observation_schema().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.gen_buses, vec![1, 2, 3]);
        assert_eq!(first.bus_ids.len(), 9);
    }

    #[test]
    fn test_second_scenario_continues_counter() {
        let _guard = test_env_lock();
        let (mut session, record, _env) = demo_session(quiet());
        session.solve_power_flow(&demo_case_path()).unwrap();
        session.start_dynamics(&[], -1).unwrap();
        let first_run = session.run_to_completion().unwrap();

        let fault = Event::bus_fault(10.0, 10.2, 0.005, 7);
        session.transfer_state().unwrap();
        session
            .start_dynamics(std::slice::from_ref(&fault), -1)
            .unwrap();
        let second_run = session.run_to_completion().unwrap();
        assert_eq!(first_run, second_run);

        // Monotonic counter: the second run picks up where the first ended.
        let log = session.observation_log();
        assert_eq!(log.len(), first_run + second_run);
        assert_eq!(log.steps[first_run], first_run as u64);
        assert_eq!(*log.steps.last().unwrap(), (first_run + second_run - 1) as u64);

        let record = record.lock().unwrap();
        assert_eq!(record.inits.len(), 2);
        assert_eq!(record.inits[1].0, vec![fault]);
        assert_eq!(record.transfers, 2);
    }

    #[test]
    fn test_reset_counter_restarts_second_scenario() {
        let _guard = test_env_lock();
        let config = SessionConfig {
            reset_step_counter: true,
            echo_observations: false,
        };
        let (mut session, _record, _env) = demo_session(config);
        session.solve_power_flow(&demo_case_path()).unwrap();
        session.start_dynamics(&[], -1).unwrap();
        let first_run = session.run_to_completion().unwrap();
        assert!(first_run > 0);

        session.transfer_state().unwrap();
        session.start_dynamics(&[], -1).unwrap();
        let first = session.steps().unwrap().next().unwrap().unwrap();
        assert_eq!(first.0, 0);
    }

    #[test]
    fn test_missing_descriptor_is_config_error() {
        let _guard = test_env_lock();
        let (mut session, _record, _env) = demo_session(quiet());
        let err = session
            .solve_power_flow(std::path::Path::new("cases/nowhere.json"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn test_nonconvergent_case_is_solve_error() {
        let _guard = test_env_lock();
        let (mut session, _record, _env) = demo_session(quiet());
        let dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
        let path = std::path::PathBuf::from(format!("{}/cases/demo/diverging.json", dir));
        let err = session.solve_power_flow(&path).unwrap_err();
        assert!(matches!(err, SessionError::Solve(_)));
    }

    #[test]
    fn test_lifecycle_guards() {
        let _guard = test_env_lock();
        let (mut session, _record, _env) = demo_session(quiet());
        assert!(matches!(
            session.steps().unwrap_err(),
            SessionError::Phase(_)
        ));
        assert!(matches!(
            session.start_dynamics(&[], -1).unwrap_err(),
            SessionError::Phase(_)
        ));
        assert!(matches!(
            session.transfer_state().unwrap_err(),
            SessionError::Phase(_)
        ));
    }

    #[test]
    fn test_module_released_before_environment() {
        let _guard = test_env_lock();
        let (mut session, _record, env) = demo_session(quiet());
        session.solve_power_flow(&demo_case_path()).unwrap();
        session.teardown();
        // The module is gone; the environment is still live through `env`.
        assert_eq!(Arc::strong_count(&env), 1);
        assert!(Environment::is_live());
        drop(env);
        assert!(!Environment::is_live());
    }
}
