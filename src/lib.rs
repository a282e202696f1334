pub mod engine;
pub mod error;
pub mod io;
pub mod session;

pub mod prelude {
    #[cfg(feature = "scripted")]
    pub use crate::engine::{DefaultEngine, ScriptedEngine};
    pub use crate::engine::{Environment, SessionEngine};
    pub use crate::error::SessionError;
    pub use crate::session::action::{Action, ActionKind, ScheduledAction, ScheduledActions};
    pub use crate::session::coordinator::{ScenarioSession, SessionConfig};
    pub use crate::session::event::Event;
    pub use crate::session::observation::ObservationSchema;
    pub use crate::session::report::SessionReporting;
    pub use crate::session::SessionDefaultPlugins;
}
