//! Band-structure workflow: resolves a k-path, then runs the base workflow once
//! with `compute_bands` along it.

use super::base::{AttemptSummary, DftkBaseWorkflow, WorkflowResult};
use super::context::BaseWorkflowInputs;
use crate::common::PluginConfig;
use crate::domain::{
    BANDS_FUNCTION, BandStructure, DftkError, DftkResult, ExitStatus, KpointsData, Structure,
};
use crate::runner::CalculationRunner;
use crate::utils::reciprocal_cell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Spacing (1/Å) between explicit k-points when none is requested.
pub const DEFAULT_KPATH_DISTANCE: f64 = 0.025;
pub const MAX_KPATH_POINTS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandsWorkflowInputs {
    pub base: BaseWorkflowInputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bands_kpoints: Option<KpointsData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bands_kpoints_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpathResult {
    pub explicit_kpoints: Vec<[f64; 3]>,
    pub parameters: Option<Map<String, Value>>,
}

/// High-symmetry path analysis of a structure.
pub trait KpathProvider {
    fn explicit_kpath(
        &self,
        structure: &Structure,
        reference_distance: Option<f64>,
    ) -> DftkResult<KpathResult>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpathVertex {
    pub label: String,
    /// Fractional coordinates in the reciprocal basis.
    pub coords: [f64; 3],
}

/// Piecewise-linear path through fixed vertices, densified to the reference distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentKpath {
    pub vertices: Vec<KpathVertex>,
}

impl KpathProvider for SegmentKpath {
    fn explicit_kpath(
        &self,
        structure: &Structure,
        reference_distance: Option<f64>,
    ) -> DftkResult<KpathResult> {
        if self.vertices.len() < 2 {
            return Err(DftkError::input_validation(
                "INPUT.KPATH_VERTICES",
                "a k-path needs at least two vertices",
            ));
        }
        let distance = reference_distance.unwrap_or(DEFAULT_KPATH_DISTANCE);
        if !distance.is_finite() || distance <= 0.0 {
            return Err(DftkError::input_validation(
                "INPUT.KPATH_DISTANCE",
                format!("k-path distance must be positive, got {distance}"),
            ));
        }
        let reciprocal = reciprocal_cell(&structure.cell).ok_or_else(|| {
            DftkError::input_validation(
                "INPUT.KPATH_CELL",
                "cannot build a k-path for a singular cell",
            )
        })?;

        let mut kpoints = Vec::new();
        let mut labels = Vec::new();
        for pair in self.vertices.windows(2) {
            let (start, end) = (&pair[0], &pair[1]);
            let delta = [0, 1, 2].map(|axis| end.coords[axis] - start.coords[axis]);
            let length = (0..3)
                .map(|col| {
                    (0..3)
                        .map(|row| delta[row] * reciprocal[(row, col)])
                        .sum::<f64>()
                        .powi(2)
                })
                .sum::<f64>()
                .sqrt();
            let steps = (length / distance).ceil();
            if kpoints.len() as f64 + steps > MAX_KPATH_POINTS as f64 {
                return Err(DftkError::computation(
                    "RUN.KPATH_SIZE",
                    format!(
                        "k-path distance {distance} gives more than {MAX_KPATH_POINTS} k-points"
                    ),
                ));
            }
            let steps = (steps as usize).max(1);

            // Shared vertices are emitted once.
            let first = usize::from(!kpoints.is_empty());
            for step in first..steps {
                let fraction = step as f64 / steps as f64;
                kpoints.push([0, 1, 2].map(|axis| start.coords[axis] + fraction * delta[axis]));
                labels.push(if step == 0 { start.label.clone() } else { String::new() });
            }
            kpoints.push(end.coords);
            labels.push(end.label.clone());
        }

        let path = self
            .vertices
            .windows(2)
            .map(|pair| json!([pair[0].label, pair[1].label]))
            .collect::<Vec<_>>();
        let point_coords = self
            .vertices
            .iter()
            .map(|vertex| (vertex.label.clone(), json!(vertex.coords)))
            .collect::<Map<_, _>>();

        let mut parameters = Map::new();
        parameters.insert("path".to_string(), Value::Array(path));
        parameters.insert("point_coords".to_string(), Value::Object(point_coords));
        parameters.insert("reference_distance".to_string(), json!(distance));
        parameters.insert("explicit_kpoints_labels".to_string(), json!(labels));

        Ok(KpathResult {
            explicit_kpoints: kpoints,
            parameters: Some(parameters),
        })
    }
}

/// Updates the `compute_bands` post-SCF task with `kpath`, appending the task if absent.
pub fn set_bands_kpath(parameters: &mut Value, kpath: &[[f64; 3]]) -> DftkResult<()> {
    let parameters = parameters.as_object_mut().ok_or_else(|| {
        DftkError::input_validation(
            "INPUT.PARAMETERS_TYPE",
            "input parameters must be a key-value record",
        )
    })?;
    let postscf = parameters
        .entry("postscf")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| {
            DftkError::input_validation("INPUT.POSTSCF_TYPE", "`postscf` must be a list of tasks")
        })?;

    let kwargs = json!({ "kpath": kpath });
    match postscf
        .iter_mut()
        .find(|task| task.get("$function").and_then(Value::as_str) == Some(BANDS_FUNCTION))
    {
        Some(task) => task["$kwargs"] = kwargs,
        None => postscf.push(json!({ "$function": BANDS_FUNCTION, "$kwargs": kwargs })),
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandsWorkflowResult {
    pub exit_status: ExitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band_parameters: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band_structure: Option<BandStructure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seekpath_parameters: Option<Map<String, Value>>,
    pub attempts: Vec<AttemptSummary>,
    pub report: Vec<String>,
}

impl BandsWorkflowResult {
    pub fn is_success(&self) -> bool {
        self.exit_status.is_success()
    }
}

pub struct DftkBandsWorkflow<'a> {
    inputs: BandsWorkflowInputs,
    config: &'a PluginConfig,
    bands_kpoints: Option<Vec<[f64; 3]>>,
    seekpath_parameters: Option<Map<String, Value>>,
    base_result: Option<WorkflowResult>,
    exit_status: Option<ExitStatus>,
    report: Vec<String>,
}

impl<'a> DftkBandsWorkflow<'a> {
    pub fn new(inputs: BandsWorkflowInputs, config: &'a PluginConfig) -> Self {
        Self {
            inputs,
            config,
            bands_kpoints: None,
            seekpath_parameters: None,
            base_result: None,
            exit_status: None,
            report: Vec::new(),
        }
    }

    pub fn run<R>(
        &mut self,
        runner: &mut R,
        provider: &dyn KpathProvider,
    ) -> DftkResult<BandsWorkflowResult>
    where
        R: CalculationRunner + ?Sized,
    {
        self.setup();
        let resolved = self.validate_kpath().and_then(|()| {
            if self.should_run_seekpath() {
                self.run_seekpath(provider)
            } else {
                Ok(())
            }
        });
        if let Err(status) = resolved {
            self.exit_status = Some(status);
            return Ok(self.results());
        }

        self.run_process(runner)?;
        Ok(self.results())
    }

    pub fn setup(&mut self) {
        self.bands_kpoints = None;
        self.seekpath_parameters = None;
        self.base_result = None;
        self.exit_status = None;
        self.report.clear();
    }

    pub fn validate_kpath(&mut self) -> Result<(), ExitStatus> {
        let explicit = self
            .inputs
            .bands_kpoints
            .as_ref()
            .map(|kpoints| kpoints.points().map(<[_]>::to_vec));
        match (explicit, self.inputs.bands_kpoints_distance) {
            (Some(Some(points)), None) => {
                self.bands_kpoints = Some(points);
                Ok(())
            }
            (Some(None), None) => {
                Err(self.reject("`bands_kpoints` must be an explicit list of k-points"))
            }
            (None, Some(_)) => Ok(()),
            _ => Err(self.reject(
                "exactly one of `bands_kpoints` and `bands_kpoints_distance` must be specified",
            )),
        }
    }

    pub fn should_run_seekpath(&self) -> bool {
        self.inputs.bands_kpoints.is_none()
    }

    pub fn run_seekpath(&mut self, provider: &dyn KpathProvider) -> Result<(), ExitStatus> {
        let result = provider
            .explicit_kpath(
                &self.inputs.base.structure,
                self.inputs.bands_kpoints_distance,
            )
            .map_err(|error| self.reject(error.message()))?;

        tracing::info!(kpoints = result.explicit_kpoints.len(), "resolved band-structure k-path");
        self.bands_kpoints = Some(result.explicit_kpoints);
        if result.parameters.is_none() {
            self.report.push("No seekpath parameters found".to_string());
        }
        self.seekpath_parameters = result.parameters;
        Ok(())
    }

    pub fn run_process<R>(&mut self, runner: &mut R) -> DftkResult<&WorkflowResult>
    where
        R: CalculationRunner + ?Sized,
    {
        let kpath = self.bands_kpoints.as_deref().ok_or_else(|| {
            DftkError::internal("SYS.KPATH_UNRESOLVED", "the k-path has not been resolved")
        })?;
        let mut inputs = self.inputs.base.clone();
        set_bands_kpath(&mut inputs.parameters, kpath)?;

        self.report.push("Launching DftkBaseWorkflow".to_string());
        let result = DftkBaseWorkflow::new(inputs, self.config).run(runner)?;
        Ok(self.base_result.insert(result))
    }

    pub fn results(&mut self) -> BandsWorkflowResult {
        let Some(base) = self.base_result.clone() else {
            return BandsWorkflowResult {
                exit_status: self.exit_status.unwrap_or(ExitStatus::InvalidKpathInput),
                band_parameters: None,
                band_structure: None,
                seekpath_parameters: self.seekpath_parameters.clone(),
                attempts: Vec::new(),
                report: self.report.clone(),
            };
        };

        let mut report = self.report.clone();
        report.extend(base.report);
        let outputs = base.outputs.unwrap_or_default();
        if base.exit_status.is_success() {
            report.push("workflow successfully completed".to_string());
            if outputs.output_parameters.is_none() {
                report.push("No output parameters found in the base workflow outputs".to_string());
            }
            if outputs.output_bands.is_none() {
                report.push("No output bands found in the base workflow outputs".to_string());
            }
        }

        BandsWorkflowResult {
            exit_status: base.exit_status,
            band_parameters: outputs.output_parameters,
            band_structure: outputs.output_bands,
            seekpath_parameters: self.seekpath_parameters.clone(),
            attempts: base.attempts,
            report,
        }
    }

    fn reject(&mut self, message: &str) -> ExitStatus {
        let status = ExitStatus::InvalidKpathInput;
        tracing::error!(exit_status = status.code(), "{message}");
        self.report.push(message.to_string());
        status
    }
}
