pub mod action;
pub mod coordinator;
pub mod event;
pub mod observation;
pub mod report;
pub mod step;

use action::ScheduledActionPlugin;
use bevy_app::plugin_group;
use observation::ObservationPlugin;
use step::StepPlugin;

plugin_group! {
    /// The coordinator's default plugin set: step counter and engine-step
    /// system, scheduled control actions, and per-step observation capture.

    pub struct SessionDefaultPlugins {
     : StepPlugin,
     : ScheduledActionPlugin,
     : ObservationPlugin,
    }

}
