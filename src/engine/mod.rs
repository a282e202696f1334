use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::DVector;
use thiserror::Error;
use tracing::debug;

use crate::session::event::Event;
use crate::session::{action::Action, observation::ObservationSchema};

#[cfg(feature = "scripted")]
pub mod scripted;
#[cfg(feature = "scripted")]
pub use scripted::*;

#[cfg(feature = "scripted")]
pub type DefaultEngine = ScriptedEngine;

/// Faults surfaced by an engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input descriptor is missing or malformed.
    #[error("input descriptor rejected: {0}")]
    Config(String),
    /// The power-flow solve did not converge.
    #[error("power flow did not converge: {0}")]
    Solve(String),
    /// Any other fault during initialization, stepping or action application.
    #[error("engine runtime fault: {0}")]
    Runtime(String),
    /// The shared runtime context could not be acquired.
    #[error("environment unavailable: {0}")]
    Environment(String),
}

static ENV_LIVE: AtomicBool = AtomicBool::new(false);

/// Shared runtime context an engine module depends on.
///
/// At most one `Environment` is live per process. Modules hold an
/// `Arc<Environment>`, so the environment is released only after the last
/// module referencing it has been dropped. The reverse order is undefined
/// behavior in the native engines this boundary models, which is why the
/// ordering is carried by ownership instead of caller discipline.
#[derive(Debug)]
pub struct Environment {
    _priv: (),
}

impl Environment {
    /// Acquires the process-wide runtime context.
    ///
    /// Fails if another `Environment` is still live.
    pub fn acquire() -> Result<Arc<Environment>, EngineError> {
        if ENV_LIVE.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Environment(
                "an environment is already live in this process".to_string(),
            ));
        }
        debug!("engine environment acquired");
        Ok(Arc::new(Environment { _priv: () }))
    }

    /// Whether a runtime context is currently live.
    pub fn is_live() -> bool {
        ENV_LIVE.load(Ordering::SeqCst)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        ENV_LIVE.store(false, Ordering::SeqCst);
        debug!("engine environment released");
    }
}

/// The narrow call surface of an external dynamic-simulation engine.
///
/// The coordinator sequences these calls and never looks behind them: power
/// flow, time integration and observation extraction are the backend's
/// business. Calls are blocking and strictly sequential; the dynamic state at
/// step *n+1* depends on the completed state at step *n*.
pub trait SessionEngine: Send + Sync {
    /// Solves the steady-state power flow for the case at `path`.
    ///
    /// The descriptor is consumed opaquely by the backend; the coordinator
    /// does not parse it.
    fn solve_power_flow(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Copies the power-flow solution into the dynamic-simulation context.
    ///
    /// Must be repeated before re-initializing dynamics when a second
    /// scenario reuses the same power-flow solution.
    fn transfer_state(&mut self) -> Result<(), EngineError>;

    /// Submits the fault events and initializes the dynamic phase.
    ///
    /// `pre_step` of -1 selects the backend's default starting step.
    fn init_dynamics(&mut self, events: &[Event], pre_step: i32) -> Result<(), EngineError>;

    /// Whether the dynamic run has completed. Idempotent.
    fn is_done(&self) -> bool;

    /// Advances the dynamic simulation by one step.
    fn step(&mut self) -> Result<(), EngineError>;

    /// Observation vector for the just-completed step.
    fn observations(&mut self) -> Result<DVector<f64>, EngineError>;

    /// Applies a discrete control action to the running simulation.
    fn apply_action(&mut self, action: &Action) -> Result<(), EngineError>;

    /// The five parallel identifier lists defining channel identity.
    ///
    /// Invariant for the life of one run configuration.
    fn observation_schema(&mut self) -> Result<ObservationSchema, EngineError>;
}

/// Serializes tests that acquire the process-wide [`Environment`].
#[cfg(test)]
pub(crate) fn test_env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_exclusive() {
        let _guard = test_env_lock();
        let env = Environment::acquire().unwrap();
        assert!(Environment::is_live());
        assert!(Environment::acquire().is_err());

        let second_ref = env.clone();
        drop(env);
        // A module-held reference keeps the context live.
        assert!(Environment::is_live());

        drop(second_ref);
        assert!(!Environment::is_live());
        let env = Environment::acquire().unwrap();
        drop(env);
    }
}
