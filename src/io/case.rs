use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::session::observation::ObservationSchema;

/// This module parses scripted simulation cases for the playback engine.

/// Steady-state solve outcome recorded in a scripted case.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct PowerFlowCase {
    pub converged: bool,
    #[serde(default)]
    pub iterations: usize,
}

/// A scripted simulation case: the power-flow outcome, the observation
/// schema and the per-step observation frames replayed by the playback
/// engine. One dynamic run replays `frames` from the starting step to the
/// end.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ScriptedCase {
    pub power_flow: PowerFlowCase,
    pub schema: ObservationSchema,
    pub frames: Vec<Vec<f64>>,
}

impl ScriptedCase {
    /// Structural checks on a loaded case.
    pub fn validate(&self) -> Result<(), String> {
        if self.frames.is_empty() {
            return Err("scripted case has no observation frames".to_string());
        }
        let width = self.frames[0].len();
        if let Some(bad) = self.frames.iter().position(|f| f.len() != width) {
            return Err(format!(
                "frame {} has {} values, expected {}",
                bad,
                self.frames[bad].len(),
                width
            ));
        }
        if self.schema.gen_buses.len() != self.schema.gen_ids.len() {
            return Err("generator bus and id lists differ in length".to_string());
        }
        if self.schema.load_buses.len() != self.schema.load_ids.len() {
            return Err("load bus and id lists differ in length".to_string());
        }
        Ok(())
    }
}

/// Loads a scripted case from a JSON file.
pub fn load_case(path: &Path) -> Result<ScriptedCase, std::io::Error> {
    let content = fs::read_to_string(path)?;
    let case: ScriptedCase = serde_json::from_str(&content)?;
    Ok(case)
}

/// Path of the bundled demo case.
#[cfg(test)]
pub(crate) fn demo_case_path() -> std::path::PathBuf {
    let dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    std::path::PathBuf::from(format!("{}/cases/demo/scenario.json", dir))
}
