use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use nalgebra::DVector;
use tracing::debug;

use super::{EngineError, Environment, SessionEngine};
use crate::io::case::{load_case, ScriptedCase};
use crate::session::action::Action;
use crate::session::event::Event;
use crate::session::observation::ObservationSchema;

/// Everything a scripted module has been asked to do, verbatim.
///
/// Shared with the caller through [`ScriptedEngine::recorder`] so tests can
/// assert that events and actions crossed the boundary unmodified.
#[derive(Debug, Default)]
pub struct ScriptRecord {
    pub solves: Vec<PathBuf>,
    pub transfers: usize,
    pub inits: Vec<(Vec<Event>, i32)>,
    pub actions: Vec<Action>,
}

pub type SharedRecord = Arc<Mutex<ScriptRecord>>;

/// Deterministic playback engine.
///
/// Consumes the input descriptor as a JSON [`ScriptedCase`] and replays its
/// observation frames, one per step. It implements the full module call
/// surface, including the engine-side ordering rules: power flow before
/// state transfer, a fresh state transfer before every dynamics
/// initialization, no stepping before or after a run. It performs no
/// numerical integration.
pub struct ScriptedEngine {
    _env: Arc<Environment>,
    case: Option<ScriptedCase>,
    state_transferred: bool,
    dynamics_ready: bool,
    cursor: usize,
    last_frame: Option<usize>,
    record: SharedRecord,
}

impl ScriptedEngine {
    /// Creates a module bound to the shared runtime context.
    pub fn create(env: Arc<Environment>) -> Self {
        ScriptedEngine {
            _env: env,
            case: None,
            state_transferred: false,
            dynamics_ready: false,
            cursor: 0,
            last_frame: None,
            record: SharedRecord::default(),
        }
    }

    /// Handle on the module's call record.
    pub fn recorder(&self) -> SharedRecord {
        self.record.clone()
    }

    fn case(&self) -> Result<&ScriptedCase, EngineError> {
        self.case
            .as_ref()
            .ok_or_else(|| EngineError::Runtime("no case loaded".to_string()))
    }
}

impl SessionEngine for ScriptedEngine {
    fn solve_power_flow(&mut self, path: &Path) -> Result<(), EngineError> {
        let case = load_case(path).map_err(|e| EngineError::Config(e.to_string()))?;
        case.validate().map_err(EngineError::Config)?;
        if !case.power_flow.converged {
            return Err(EngineError::Solve(format!(
                "case {} marked non-convergent",
                path.display()
            )));
        }
        debug!(iterations = case.power_flow.iterations, "scripted power flow solved");
        self.record.lock().unwrap().solves.push(path.to_path_buf());
        self.case = Some(case);
        self.state_transferred = false;
        self.dynamics_ready = false;
        Ok(())
    }

    fn transfer_state(&mut self) -> Result<(), EngineError> {
        self.case()?;
        self.state_transferred = true;
        self.record.lock().unwrap().transfers += 1;
        Ok(())
    }

    fn init_dynamics(&mut self, events: &[Event], pre_step: i32) -> Result<(), EngineError> {
        let case = self.case()?;
        if !self.state_transferred {
            return Err(EngineError::Runtime(
                "state transfer required before dynamics initialization".to_string(),
            ));
        }
        let start = if pre_step < 0 { 0 } else { pre_step as usize };
        if start >= case.frames.len() {
            return Err(EngineError::Runtime(format!(
                "starting step {} beyond scripted run of {} frames",
                start,
                case.frames.len()
            )));
        }
        self.record
            .lock()
            .unwrap()
            .inits
            .push((events.to_vec(), pre_step));
        self.cursor = start;
        self.last_frame = None;
        self.dynamics_ready = true;
        // Consumed: a second scenario must transfer state again.
        self.state_transferred = false;
        Ok(())
    }

    fn is_done(&self) -> bool {
        match &self.case {
            Some(case) => !self.dynamics_ready || self.cursor >= case.frames.len(),
            None => true,
        }
    }

    fn step(&mut self) -> Result<(), EngineError> {
        if !self.dynamics_ready {
            return Err(EngineError::Runtime(
                "step before dynamics initialization".to_string(),
            ));
        }
        if self.is_done() {
            return Err(EngineError::Runtime(
                "step past end of scripted run".to_string(),
            ));
        }
        self.last_frame = Some(self.cursor);
        self.cursor += 1;
        Ok(())
    }

    fn observations(&mut self) -> Result<DVector<f64>, EngineError> {
        let case = self.case()?;
        let idx = self
            .last_frame
            .ok_or_else(|| EngineError::Runtime("no completed step to observe".to_string()))?;
        Ok(DVector::from_vec(case.frames[idx].clone()))
    }

    fn apply_action(&mut self, action: &Action) -> Result<(), EngineError> {
        if !self.dynamics_ready {
            return Err(EngineError::Runtime(
                "action applied outside a dynamic run".to_string(),
            ));
        }
        self.record.lock().unwrap().actions.push(action.clone());
        Ok(())
    }

    fn observation_schema(&mut self) -> Result<ObservationSchema, EngineError> {
        Ok(self.case()?.schema.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_env_lock;
    use crate::io::case::demo_case_path;

    fn ready_engine() -> (ScriptedEngine, Arc<Environment>) {
        let env = Environment::acquire().unwrap();
        let mut engine = ScriptedEngine::create(env.clone());
        engine.solve_power_flow(&demo_case_path()).unwrap();
        engine.transfer_state().unwrap();
        (engine, env)
    }

    #[test]
    fn test_playback_cycle() {
        let _guard = test_env_lock();
        let (mut engine, _env) = ready_engine();
        engine.init_dynamics(&[], -1).unwrap();

        let mut frames = 0;
        while !engine.is_done() {
            engine.step().unwrap();
            let obs = engine.observations().unwrap();
            assert!(obs.len() > 0);
            frames += 1;
        }
        assert!(frames > 0);
        assert!(engine.step().is_err());
    }

    #[test]
    fn test_init_requires_fresh_transfer() {
        let _guard = test_env_lock();
        let (mut engine, _env) = ready_engine();
        engine.init_dynamics(&[], -1).unwrap();
        while !engine.is_done() {
            engine.step().unwrap();
        }
        // The transfer was consumed by the first initialization.
        assert!(engine.init_dynamics(&[], -1).is_err());
        engine.transfer_state().unwrap();
        engine.init_dynamics(&[], -1).unwrap();
        assert!(!engine.is_done());
    }

    #[test]
    fn test_event_passthrough_exact() {
        let _guard = test_env_lock();
        let (mut engine, _env) = ready_engine();
        let fault = Event::bus_fault(10.0, 10.2, 0.005, 7);
        let record = engine.recorder();
        engine.init_dynamics(std::slice::from_ref(&fault), -1).unwrap();

        let record = record.lock().unwrap();
        assert_eq!(record.inits.len(), 1);
        assert_eq!(record.inits[0].0, vec![fault]);
        assert_eq!(record.inits[0].1, -1);
    }

    #[test]
    fn test_missing_case_is_config_error() {
        let _guard = test_env_lock();
        let env = Environment::acquire().unwrap();
        let mut engine = ScriptedEngine::create(env);
        let err = engine
            .solve_power_flow(Path::new("cases/nowhere.json"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_step_before_init_is_runtime_error() {
        let _guard = test_env_lock();
        let (mut engine, _env) = ready_engine();
        assert!(matches!(engine.step(), Err(EngineError::Runtime(_))));
    }
}
