use bevy_app::{App, Plugin, PostUpdate};
use bevy_ecs::prelude::*;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::session::coordinator::{session_healthy, EngineRes, SessionConfig, SessionHealth};
use crate::session::step::StepIndex;

/// The five parallel identifier lists defining observation-channel identity.
///
/// Queried from the engine once per configured run and cached; the schema is
/// invariant for the life of one run configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSchema {
    pub gen_buses: Vec<i64>,
    pub gen_ids: Vec<String>,
    pub load_buses: Vec<i64>,
    pub load_ids: Vec<String>,
    pub bus_ids: Vec<i64>,
}

/// Cached copy of the schema for the current run configuration.
#[derive(Resource, Debug, Clone)]
pub struct ObservationSchemaRes(pub ObservationSchema);

/// Per-step observation history for the whole session.
#[derive(Default, Resource, Serialize, Deserialize)]
pub struct ObservationLog {
    pub steps: Vec<u64>,
    pub data: Vec<DVector<f64>>,
}

impl ObservationLog {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The most recently recorded `(step, vector)` pair.
    pub fn last(&self) -> Option<(u64, &DVector<f64>)> {
        self.steps.last().map(|s| (*s, self.data.last().unwrap()))
    }
}

/// Retrieves the observation vector for the just-completed step.
///
/// Appends to [`ObservationLog`] and, unless muted, prints the
/// `<step_index> <observation_vector>` line the session's consumers read from
/// standard output.
fn record_observations(
    step: Res<StepIndex>,
    cfg: Res<SessionConfig>,
    mut engine: ResMut<EngineRes>,
    mut log: ResMut<ObservationLog>,
    mut health: ResMut<SessionHealth>,
) {
    match engine.0.observations() {
        Ok(vals) => {
            if cfg.echo_observations {
                println!("{} {:?}", step.0, vals.as_slice());
            }
            log.steps.push(step.0);
            log.data.push(vals);
        }
        Err(err) => health.record(err),
    }
}

/// Plugin collecting per-step observations.
#[derive(Default)]
pub struct ObservationPlugin;

impl Plugin for ObservationPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ObservationLog>();
        app.add_systems(PostUpdate, record_observations.run_if(session_healthy));
    }
}
