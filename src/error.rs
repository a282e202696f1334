use thiserror::Error;

use crate::engine::EngineError;

/// Session-level failure taxonomy.
///
/// Every variant is fatal for the current run. There is no retry policy:
/// power-flow non-convergence is a property of the case, not a transient
/// fault, and a mid-run engine fault invalidates the dynamic state.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad or missing command line argument. Exit code 3.
    #[error("usage: {0}")]
    Usage(String),

    /// The engine rejected the input descriptor.
    #[error("input descriptor rejected by engine")]
    Config(#[source] EngineError),

    /// Power flow did not converge.
    #[error("power flow solve failed")]
    Solve(#[source] EngineError),

    /// Engine fault while stepping or applying an action.
    #[error("engine fault during dynamic run")]
    Engine(#[source] EngineError),

    /// Operation invoked out of lifecycle order.
    #[error("operation out of lifecycle order: {0}")]
    Phase(&'static str),
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(_) => SessionError::Config(err),
            EngineError::Solve(_) => SessionError::Solve(err),
            _ => SessionError::Engine(err),
        }
    }
}
