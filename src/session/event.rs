use serde::Deserialize;
use serde::Serialize;

/// A time-bounded fault descriptor submitted at dynamic-phase initialization.
///
/// Field values travel to the engine unmodified; insertion order of a run
/// configuration is irrelevant to the physics and kept only for reproducible
/// logging.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    /// Fault application time, seconds.
    pub start_time: f64,
    /// Fault clearing time, seconds.
    pub end_time: f64,
    /// Integration step used across the fault window, seconds.
    pub time_step: f64,
    /// Bus fault when true, line fault otherwise.
    pub is_bus_fault: bool,
    /// Bus or line identifier the fault targets.
    pub target_index: i64,
}

impl Event {
    /// A three-phase bus fault.
    pub fn bus_fault(start_time: f64, end_time: f64, time_step: f64, bus: i64) -> Self {
        Event {
            start_time,
            end_time,
            time_step,
            is_bus_fault: true,
            target_index: bus,
        }
    }
}
