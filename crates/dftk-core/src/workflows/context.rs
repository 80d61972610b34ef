use crate::calculation::DftkCalculation;
use crate::domain::{
    CalcOptions, DftkError, DftkResult, KpointsData, PseudoFamily, Structure,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Caller-supplied inputs of the base workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseWorkflowInputs {
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
    pub structure: Structure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pseudos: Option<PseudoFamily>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpoints: Option<KpointsData>,
    /// Target spacing in 1/Å; exclusive with `kpoints`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpoints_distance: Option<f64>,
    #[serde(default)]
    pub options: CalcOptions,
}

fn empty_parameters() -> Value {
    Value::Object(Map::new())
}

/// State threaded through the retry loop and mutated in place by handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptContext {
    pub parameters: Value,
    pub structure: Structure,
    pub kpoints: Option<KpointsData>,
    pub kpoints_distance: Option<f64>,
    pub pseudos: PseudoFamily,
    pub options: CalcOptions,
    /// Working directory of the attempt the next one resumes from.
    pub restart_source: Option<PathBuf>,
    pub attempt_count: u32,
}

impl AttemptContext {
    pub fn from_inputs(inputs: &BaseWorkflowInputs) -> Self {
        Self {
            parameters: inputs.parameters.clone(),
            structure: inputs.structure.clone(),
            kpoints: inputs.kpoints.clone(),
            kpoints_distance: inputs.kpoints_distance,
            pseudos: inputs.pseudos.clone().unwrap_or_default(),
            options: inputs.options.clone(),
            restart_source: None,
            attempt_count: 0,
        }
    }

    /// Calculation for the next attempt, resuming from `restart_source` when set.
    pub fn calculation(&self) -> DftkResult<DftkCalculation> {
        let kpoints = self.kpoints.clone().ok_or_else(|| {
            DftkError::internal(
                "SYS.KPOINTS_UNRESOLVED",
                "k-points must be resolved before an attempt is prepared",
            )
        })?;
        Ok(DftkCalculation {
            parameters: self.parameters.clone(),
            structure: self.structure.clone(),
            pseudos: self.pseudos.clone(),
            kpoints,
            options: self.options.clone(),
            parent_folder: self.restart_source.clone(),
        })
    }
}
