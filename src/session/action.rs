use bevy_app::App;
use bevy_app::Plugin;
use bevy_app::Update;
use bevy_ecs::prelude::*;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::session::coordinator::EngineRes;
use crate::session::coordinator::{session_healthy, SessionHealth};
use crate::session::step::advance_engine;
use crate::session::step::StepIndex;

/// Kind of a discrete control intervention.
///
/// The discriminants are the integer codes the engine boundary speaks.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ActionKind {
    /// Shed a fraction of a load at a bus.
    LoadShed = 0,
    /// Trip a generating unit at a bus.
    GenerationTrip = 1,
}

/// A discrete control intervention applied at a scheduled simulation step.
///
/// Immutable once constructed; owned by the schedule until applied.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    /// Positive integer bus identifier.
    pub target_bus: i64,
    /// Device identifier at that bus, e.g. load "1".
    pub component_id: String,
    /// Signed fraction, e.g. -0.2 sheds 20 % of the load.
    pub magnitude: f64,
}

impl Action {
    /// A load-shedding action for one load component.
    pub fn load_shed(target_bus: i64, component_id: &str, magnitude: f64) -> Self {
        Action {
            kind: ActionKind::LoadShed,
            target_bus,
            component_id: component_id.to_string(),
            magnitude,
        }
    }
}

/// One scheduled entry: an action armed for an exact trigger step.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ScheduledAction {
    /// Step index at which this action fires. Matched by equality only;
    /// an entry whose step has already passed never fires.
    pub trigger_step: u64,
    pub action: Action,
}

/// ECS component storing a schedule of control actions for the session.
///
/// Entries keep registration order; all entries matching the current step are
/// applied before that step executes. The `armed` flag suppresses the whole
/// schedule without removing the entries.
#[derive(Component, Serialize, Deserialize, Clone)]
pub struct ScheduledActions {
    pub armed: bool,
    pub entries: Vec<ScheduledAction>,
}

impl ScheduledActions {
    pub fn new(entries: Vec<ScheduledAction>) -> Self {
        ScheduledActions {
            armed: true,
            entries,
        }
    }

    /// Entries due at `step`, in registration order.
    pub fn due(&self, step: u64) -> impl Iterator<Item = &ScheduledAction> {
        self.entries.iter().filter(move |e| e.trigger_step == step)
    }
}

/// Resource used to track and log all applied actions.
#[derive(Resource, Default, Serialize, Deserialize, Clone, Debug)]
pub struct ActionLog {
    pub applied: Vec<ScheduledAction>,
}

/// Applies scheduled actions that are due at the current step.
///
/// Runs before the engine-step system so that all actions registered for step
/// *n* take effect before step *n* executes. Applied actions are recorded in
/// [`ActionLog`].
fn apply_due_actions(
    step: Res<StepIndex>,
    mut engine: ResMut<EngineRes>,
    mut log: ResMut<ActionLog>,
    mut health: ResMut<SessionHealth>,
    query: Query<&ScheduledActions>,
) {
    for sched in &query {
        if !sched.armed {
            continue;
        }
        for entry in sched.due(step.0) {
            match engine.0.apply_action(&entry.action) {
                Ok(()) => {
                    info!(
                        step = step.0,
                        bus = entry.action.target_bus,
                        magnitude = entry.action.magnitude,
                        "action applied"
                    );
                    log.applied.push(entry.clone());
                }
                Err(err) => {
                    health.record(err);
                    return;
                }
            }
        }
    }
}

/// Plugin for step-scheduled control actions.
///
/// # Resources:
/// - [`ActionLog`]: applied-action history
///
/// # Systems:
/// - [`apply_due_actions`] runs in [`Update`] before the engine step.
#[derive(Default)]
pub struct ScheduledActionPlugin;

impl Plugin for ScheduledActionPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ActionLog>();
        app.add_systems(
            Update,
            apply_due_actions
                .run_if(session_healthy)
                .before(advance_engine),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_matches_exact_step_only() {
        let shed = Action::load_shed(5, "1", -0.2);
        let sched = ScheduledActions::new(vec![
            ScheduledAction {
                trigger_step: 2500,
                action: shed.clone(),
            },
            ScheduledAction {
                trigger_step: 2500,
                action: Action::load_shed(7, "1", -0.2),
            },
            ScheduledAction {
                trigger_step: 3000,
                action: shed.clone(),
            },
        ]);

        let due: Vec<_> = sched.due(2500).collect();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].action.target_bus, 5);
        assert_eq!(due[1].action.target_bus, 7);

        assert_eq!(sched.due(2499).count(), 0);
        assert_eq!(sched.due(2501).count(), 0);
        // Entries whose step has passed never fire late.
        assert_eq!(sched.due(2600).count(), 0);
    }

    #[test]
    fn test_action_kind_codes() {
        use num_traits::{FromPrimitive, ToPrimitive};
        assert_eq!(ActionKind::LoadShed.to_i64(), Some(0));
        assert_eq!(ActionKind::from_i64(1), Some(ActionKind::GenerationTrip));
        assert_eq!(ActionKind::from_i64(7), None);
    }
}
