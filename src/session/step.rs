use bevy_app::{App, Last, Plugin, Update};
use bevy_ecs::prelude::*;
use derive_more::derive::{Add, From, Into};
use serde::{Deserialize, Serialize};

use crate::session::coordinator::{session_healthy, EngineRes, SessionHealth};

/// Monotonic step counter for the session.
///
/// Starts at zero and, by default, keeps counting across chained scenarios on
/// the same module (the reference behavior); see
/// [`SessionConfig::reset_step_counter`](crate::session::coordinator::SessionConfig).
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, Default, From, Into, Add, Resource, Serialize, Deserialize,
)]
pub struct StepIndex(pub u64);

/// Lifecycle of one engine module.
///
/// Initialization must precede any step call; step calls cease once the
/// engine reports completion.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    #[default]
    Created,
    Configured,
    Stepping,
    Finished,
}

/// Advances the engine by one dynamic step.
pub(crate) fn advance_engine(mut engine: ResMut<EngineRes>, mut health: ResMut<SessionHealth>) {
    if let Err(err) = engine.0.step() {
        health.record(err);
    }
}

pub fn advance(mut step: ResMut<StepIndex>) {
    step.0 += 1;
}

/// Plugin owning the step counter and the engine-step system.
///
/// One `App::update()` is exactly one dynamic step: scheduled actions fire
/// first, the engine advances, observations are recorded, and the counter
/// increments in [`Last`].
#[derive(Default)]
pub struct StepPlugin;

impl Plugin for StepPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<StepIndex>();
        app.init_resource::<RunPhase>();
        app.add_systems(Update, advance_engine.run_if(session_healthy));
        app.add_systems(Last, advance.run_if(session_healthy));
    }
}
