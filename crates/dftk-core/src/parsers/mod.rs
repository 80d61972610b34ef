//! Classification of a finished attempt from its retrieved artifacts.

mod decode;
mod retrieved;

pub use decode::{DecodeError, JsonRecordDecoder, RecordDecoder, decode_array};
pub use retrieved::RetrievedArtifacts;

use crate::calculation::artifact_name;
use crate::common::LogMarkers;
use crate::common::constants::{
    ENERGY_UNIT, FORCE_UNIT, LOG_FILENAME, SCFRES_SUMMARY_FILENAME, STRESS_UNIT,
};
use crate::domain::{
    ArrayData, ArtifactKind, AttemptStatus, BandStructure, CalculationOutputs, CrashKind,
    KpointsData, Structure,
};
use crate::runner::Termination;
use serde_json::{Map, Value};
use std::fs;

/// Classification of one attempt plus whatever outputs it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    pub status: AttemptStatus,
    pub outputs: CalculationOutputs,
}

impl AttemptResult {
    fn new(status: AttemptStatus, outputs: CalculationOutputs) -> Self {
        Self { status, outputs }
    }
}

pub fn interpret(
    termination: &Termination,
    retrieved: &RetrievedArtifacts,
    retrieve_list: &[String],
    n_atoms: usize,
    decoder: &dyn RecordDecoder,
    markers: &LogMarkers,
) -> AttemptResult {
    let mut outputs = CalculationOutputs::default();

    if termination.walltime_exceeded {
        // A written SCF summary means the SCF finished before the kill.
        let status = if retrieved.contains(SCFRES_SUMMARY_FILENAME) {
            AttemptStatus::OutOfWalltimeDuringPostProcessing
        } else {
            AttemptStatus::OutOfWalltimeDuringScf
        };
        return AttemptResult::new(status, outputs);
    }

    if let Some(crash) = inspect_run_log(retrieved, markers) {
        return AttemptResult::new(AttemptStatus::ProcessCrashed(crash), outputs);
    }

    let requested = |name: &str| retrieve_list.iter().any(|entry| entry == name);

    if requested(SCFRES_SUMMARY_FILENAME) {
        let record = match decode_artifact(
            retrieved,
            SCFRES_SUMMARY_FILENAME,
            ArtifactKind::ScfSummary,
            decoder,
        ) {
            Ok(record) => record,
            Err(status) => return AttemptResult::new(status, outputs),
        };
        let (parameters, structure) = match transform_scf_summary(record) {
            Ok(transformed) => transformed,
            Err(error) => {
                return invalid_artifact(ArtifactKind::ScfSummary, &error, outputs);
            }
        };
        let converged = parameters
            .get("converged")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        outputs.output_parameters = Some(parameters);
        outputs.output_structure = structure;
        if !converged {
            return AttemptResult::new(AttemptStatus::ScfNotConverged, outputs);
        }
    }

    for (kind, rows) in [(ArtifactKind::Forces, n_atoms), (ArtifactKind::Stresses, 3)] {
        let Some(function) = kind.postscf_function() else {
            continue;
        };
        let name = artifact_name(function);
        if !requested(name.as_str()) {
            continue;
        }
        let record = match decode_artifact(retrieved, &name, kind, decoder) {
            Ok(record) => record,
            Err(status) => return AttemptResult::new(status, outputs),
        };
        let unit = if kind == ArtifactKind::Forces {
            FORCE_UNIT
        } else {
            STRESS_UNIT
        };
        let array = match results_array(&record, [rows, 3], unit) {
            Ok(array) => array,
            Err(error) => return invalid_artifact(kind, &error, outputs),
        };
        if kind == ArtifactKind::Forces {
            outputs.output_forces = Some(array);
        } else {
            outputs.output_stresses = Some(array);
        }
    }

    if let Some(function) = ArtifactKind::Bands.postscf_function() {
        let name = artifact_name(function);
        if requested(name.as_str()) {
            let record = match decode_artifact(retrieved, &name, ArtifactKind::Bands, decoder) {
                Ok(record) => record,
                Err(status) => return AttemptResult::new(status, outputs),
            };
            let bands = match band_structure(&record) {
                Ok(bands) => bands,
                Err(error) => return invalid_artifact(ArtifactKind::Bands, &error, outputs),
            };
            let converged = bands.converged;
            outputs.output_kpoints = Some(KpointsData::list(bands.kpoints.clone()));
            outputs.output_bands = Some(bands);
            if !converged {
                return AttemptResult::new(AttemptStatus::PostProcessingNotConverged, outputs);
            }
        }
    }

    AttemptResult::new(AttemptStatus::Success, outputs)
}

fn inspect_run_log(retrieved: &RetrievedArtifacts, markers: &LogMarkers) -> Option<CrashKind> {
    let Some(path) = retrieved.path(LOG_FILENAME) else {
        tracing::warn!("run log was not retrieved");
        return Some(CrashKind::NoSuccessMarker);
    };
    let log = match fs::read_to_string(&path) {
        Ok(log) => log,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "run log could not be read");
            return Some(CrashKind::NoSuccessMarker);
        }
    };

    if markers
        .setup_failure
        .iter()
        .any(|marker| log.contains(marker.as_str()))
    {
        Some(CrashKind::SetupFailed)
    } else if !log.contains(markers.success.as_str()) {
        Some(CrashKind::NoSuccessMarker)
    } else {
        None
    }
}

fn decode_artifact(
    retrieved: &RetrievedArtifacts,
    name: &str,
    kind: ArtifactKind,
    decoder: &dyn RecordDecoder,
) -> Result<Value, AttemptStatus> {
    let Some(path) = retrieved.path(name) else {
        tracing::warn!(artifact = name, "requested artifact was not retrieved");
        return Err(AttemptStatus::MissingArtifact(kind));
    };
    decoder.decode(&path).map_err(|error| {
        tracing::warn!(artifact = name, %error, "requested artifact could not be decoded");
        AttemptStatus::MissingArtifact(kind)
    })
}

fn invalid_artifact(
    kind: ArtifactKind,
    error: &DecodeError,
    outputs: CalculationOutputs,
) -> AttemptResult {
    tracing::warn!(artifact = %kind, %error, "requested artifact has an invalid layout");
    AttemptResult::new(AttemptStatus::MissingArtifact(kind), outputs)
}

/// Scalar SCF outputs with renamed keys and unit annotations, plus a lifted structure.
pub fn transform_scf_summary(
    record: Value,
) -> Result<(Map<String, Value>, Option<Structure>), DecodeError> {
    let Value::Object(mut parameters) = record else {
        return Err(DecodeError::Layout(
            "SCF summary must be a record".to_string(),
        ));
    };

    parameters.remove("occupation");
    parameters.remove("eigenvalues");

    let norm_delta_rho = parameters.remove("norm_Δρ").unwrap_or(Value::Null);
    parameters.insert("norm_delta_rho".to_string(), norm_delta_rho);
    let fermi_level = parameters.remove("εF").unwrap_or(Value::Null);
    parameters.insert("fermi_level".to_string(), fermi_level);
    parameters.insert(
        "fermi_level_unit".to_string(),
        Value::String(ENERGY_UNIT.to_string()),
    );

    if let Some(Value::Object(energies)) = parameters.get_mut("energies") {
        let terms = energies.keys().cloned().collect::<Vec<_>>();
        for term in terms {
            energies.insert(
                format!("{term}_unit"),
                Value::String(ENERGY_UNIT.to_string()),
            );
        }
    }

    let structure = match parameters.remove("output_structure") {
        None | Some(Value::Null) => None,
        Some(record) => Some(serde_json::from_value(record).map_err(|error| {
            DecodeError::Layout(format!("invalid output structure: {error}"))
        })?),
    };

    Ok((parameters, structure))
}

fn results_array(record: &Value, shape: [usize; 2], unit: &str) -> Result<ArrayData, DecodeError> {
    let results = record
        .get("results")
        .ok_or_else(|| DecodeError::Layout("missing `results` dataset".to_string()))?;
    let (found, values) = decode_array(results)?;
    if found != shape {
        return Err(DecodeError::Layout(format!(
            "expected shape {shape:?}, found {found:?}"
        )));
    }
    ArrayData::new(found, values, unit)
        .ok_or_else(|| DecodeError::Layout("array size does not match its shape".to_string()))
}

fn band_structure(record: &Value) -> Result<BandStructure, DecodeError> {
    let results = record
        .get("results")
        .ok_or_else(|| DecodeError::Layout("missing `results` record".to_string()))?;

    let converged = results
        .get("converged")
        .and_then(Value::as_bool)
        .ok_or_else(|| DecodeError::Layout("missing `converged` flag".to_string()))?;

    let kcoords = results
        .get("kcoords")
        .ok_or_else(|| DecodeError::Layout("missing `kcoords` dataset".to_string()))?;
    let (kshape, kvalues) = decode_array(kcoords)?;
    if kshape.len() != 2 || kshape[1] != 3 {
        return Err(DecodeError::Layout(format!(
            "expected k-point coordinates of shape (n, 3), found {kshape:?}"
        )));
    }
    let kpoints = kvalues
        .chunks_exact(3)
        .map(|point| [point[0], point[1], point[2]])
        .collect::<Vec<_>>();

    let n_spin = count_field(results, "n_spin_components")?.unwrap_or(1);
    let n_kpoints = count_field(results, "n_kpoints")?.unwrap_or(kpoints.len());
    if n_kpoints != kpoints.len() {
        return Err(DecodeError::Layout(format!(
            "`n_kpoints` is {n_kpoints} but {} k-points were written",
            kpoints.len()
        )));
    }

    let eigenvalues = results
        .get("eigenvalues")
        .ok_or_else(|| DecodeError::Layout("missing `eigenvalues` dataset".to_string()))?;
    let (_, values) = decode_array(eigenvalues)?;
    let per_band = n_spin.checked_mul(n_kpoints).ok_or_else(|| {
        DecodeError::Layout(format!(
            "{n_spin} spin components and {n_kpoints} k-points overflow the band layout"
        ))
    })?;
    if per_band == 0 || values.len() % per_band != 0 {
        return Err(DecodeError::Layout(format!(
            "{} eigenvalues cannot be split over {n_spin} spin components and {n_kpoints} k-points",
            values.len()
        )));
    }
    let n_bands = values.len() / per_band;
    if let Some(declared) = count_field(results, "n_bands")? {
        if declared != n_bands {
            return Err(DecodeError::Layout(format!(
                "`n_bands` is {declared} but eigenvalues hold {n_bands} bands"
            )));
        }
    }

    let eigenvalues = ArrayData::new(vec![n_spin, n_kpoints, n_bands], values, ENERGY_UNIT)
        .ok_or_else(|| DecodeError::Layout("eigenvalue count does not match".to_string()))?;
    Ok(BandStructure {
        kpoints,
        eigenvalues,
        converged,
    })
}

fn count_field(record: &Value, key: &str) -> Result<Option<usize>, DecodeError> {
    match record.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|count| usize::try_from(count).ok())
            .map(Some)
            .ok_or_else(|| DecodeError::Layout(format!("`{key}` must be a count"))),
    }
}

#[cfg(test)]
mod tests {
    use super::{AttemptResult, JsonRecordDecoder, RetrievedArtifacts, interpret, transform_scf_summary};
    use crate::common::LogMarkers;
    use crate::domain::{ArtifactKind, AttemptStatus, CrashKind};
    use crate::runner::Termination;
    use serde_json::{Value, json};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const FINISHED_LOG: &str = "[ Info: Running SCF\nFinished running AiidaDFTK\n";

    fn write(root: &Path, name: &str, content: &str) {
        fs::write(root.join(name), content).expect("artifact should be written");
    }

    fn scf_summary(converged: bool) -> Value {
        json!({
            "converged": converged,
            "n_iter": 12,
            "norm_Δρ": 1.0e-9,
            "εF": 0.21,
            "energies": { "total": -7.9, "Kinetic": 3.1 },
            "occupation": [[2.0, 2.0]],
            "eigenvalues": [[-0.2, 0.1]]
        })
    }

    fn retrieve_list(postscf: &[&str]) -> Vec<String> {
        let mut list = postscf.iter().map(|name| name.to_string()).collect::<Vec<_>>();
        list.extend(
            ["DFTK.log", "timings.json", "DFTK.txt", "self_consistent_field.json"]
                .map(str::to_string),
        );
        list
    }

    fn run(root: &Path, list: &[String], termination: Termination) -> AttemptResult {
        let retrieved = RetrievedArtifacts::from_dir(root, list).expect("retrieval should succeed");
        interpret(
            &termination,
            &retrieved,
            list,
            2,
            &JsonRecordDecoder,
            &LogMarkers::default(),
        )
    }

    #[test]
    fn converged_scf_with_forces_and_stresses_succeeds() {
        let temp = TempDir::new().expect("tempdir should be created");
        write(temp.path(), "DFTK.log", FINISHED_LOG);
        write(temp.path(), "self_consistent_field.json", &scf_summary(true).to_string());
        write(
            temp.path(),
            "compute_forces_cart.hdf5",
            r#"{"results": [[0.0, 0.0, 0.01], [0.0, 0.0, -0.01]]}"#,
        );
        write(
            temp.path(),
            "compute_stresses_cart.hdf5",
            r#"{"results": [[1e-4, 0, 0], [0, 1e-4, 0], [0, 0, 1e-4]]}"#,
        );
        let list = retrieve_list(&["compute_forces_cart.hdf5", "compute_stresses_cart.hdf5"]);

        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::Success);
        assert_eq!(result.outputs.converged(), Some(true));

        let forces = result.outputs.output_forces.expect("forces should be published");
        assert_eq!(forces.shape(), &[2, 3]);
        assert_eq!(forces.unit, "hartree/bohr");
        assert_eq!(forces.get(&[1, 2]), Some(-0.01));
        let stresses = result.outputs.output_stresses.expect("stresses should be published");
        assert_eq!(stresses.shape(), &[3, 3]);
        assert_eq!(stresses.unit, "hartree/bohr^3");
    }

    #[test]
    fn scf_summary_is_renamed_and_annotated() {
        let (parameters, structure) =
            transform_scf_summary(scf_summary(true)).expect("summary should transform");

        assert!(structure.is_none());
        assert!(parameters.get("occupation").is_none());
        assert!(parameters.get("eigenvalues").is_none());
        assert!(parameters.get("norm_Δρ").is_none());
        assert_eq!(parameters["norm_delta_rho"], json!(1.0e-9));
        assert_eq!(parameters["fermi_level"], json!(0.21));
        assert_eq!(parameters["fermi_level_unit"], json!("hartree"));
        assert_eq!(parameters["energies"]["total_unit"], json!("hartree"));
        assert_eq!(parameters["energies"]["Kinetic_unit"], json!("hartree"));
        assert_eq!(parameters["energies"]["total"], json!(-7.9));
    }

    #[test]
    fn absent_special_keys_become_null() {
        let (parameters, _) = transform_scf_summary(json!({ "converged": true }))
            .expect("summary should transform");
        assert_eq!(parameters["norm_delta_rho"], Value::Null);
        assert_eq!(parameters["fermi_level"], Value::Null);
    }

    #[test]
    fn output_structure_is_lifted_into_its_own_channel() {
        let mut summary = scf_summary(false);
        summary["output_structure"] = json!({
            "cell": [[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]],
            "sites": [{ "kind_name": "Si", "position": [0.1, 0.0, 0.0] }]
        });
        let (parameters, structure) =
            transform_scf_summary(summary).expect("summary should transform");

        assert!(parameters.get("output_structure").is_none());
        let structure = structure.expect("structure should be lifted");
        assert_eq!(structure.atom_count(), 1);
    }

    #[test]
    fn unconverged_scf_still_publishes_parameters() {
        let temp = TempDir::new().expect("tempdir should be created");
        write(temp.path(), "DFTK.log", FINISHED_LOG);
        write(temp.path(), "self_consistent_field.json", &scf_summary(false).to_string());
        write(temp.path(), "compute_forces_cart.hdf5", r#"{"results": [[0, 0, 0], [0, 0, 0]]}"#);
        let list = retrieve_list(&["compute_forces_cart.hdf5"]);

        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::ScfNotConverged);
        assert_eq!(result.outputs.converged(), Some(false));
        assert!(result.outputs.output_forces.is_none());
    }

    #[test]
    fn walltime_kill_is_classified_by_scf_summary_presence() {
        let temp = TempDir::new().expect("tempdir should be created");
        let list = retrieve_list(&[]);
        let killed = Termination {
            exit_code: None,
            walltime_exceeded: true,
        };

        let result = run(temp.path(), &list, killed);
        assert_eq!(result.status, AttemptStatus::OutOfWalltimeDuringScf);
        assert!(result.outputs.output_parameters.is_none());

        write(temp.path(), "self_consistent_field.json", &scf_summary(true).to_string());
        let result = run(temp.path(), &list, killed);
        assert_eq!(result.status, AttemptStatus::OutOfWalltimeDuringPostProcessing);
    }

    #[test]
    fn run_log_markers_classify_crashes() {
        let temp = TempDir::new().expect("tempdir should be created");
        let list = retrieve_list(&[]);
        write(temp.path(), "self_consistent_field.json", &scf_summary(true).to_string());

        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::ProcessCrashed(CrashKind::NoSuccessMarker));

        write(temp.path(), "DFTK.log", "ERROR: LoadError: ArgumentError: Package AiidaDFTK not found\n");
        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::ProcessCrashed(CrashKind::SetupFailed));

        write(temp.path(), "DFTK.log", "[ Info: Running SCF\n");
        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::ProcessCrashed(CrashKind::NoSuccessMarker));
    }

    #[test]
    fn missing_requested_forces_are_reported() {
        let temp = TempDir::new().expect("tempdir should be created");
        write(temp.path(), "DFTK.log", FINISHED_LOG);
        write(temp.path(), "self_consistent_field.json", &scf_summary(true).to_string());
        let list = retrieve_list(&["compute_forces_cart.hdf5"]);

        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::MissingArtifact(ArtifactKind::Forces));
        assert!(result.outputs.output_forces.is_none());
        assert!(result.outputs.output_parameters.is_some());
    }

    #[test]
    fn missing_scf_summary_is_reported() {
        let temp = TempDir::new().expect("tempdir should be created");
        write(temp.path(), "DFTK.log", FINISHED_LOG);
        let result = run(temp.path(), &retrieve_list(&[]), Termination::default());
        assert_eq!(result.status, AttemptStatus::MissingArtifact(ArtifactKind::ScfSummary));
    }

    #[test]
    fn misshapen_stresses_are_treated_as_missing() {
        let temp = TempDir::new().expect("tempdir should be created");
        write(temp.path(), "DFTK.log", FINISHED_LOG);
        write(temp.path(), "self_consistent_field.json", &scf_summary(true).to_string());
        write(temp.path(), "compute_stresses_cart.hdf5", r#"{"results": [[1, 0], [0, 1]]}"#);
        let list = retrieve_list(&["compute_stresses_cart.hdf5"]);

        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::MissingArtifact(ArtifactKind::Stresses));
    }

    #[test]
    fn bands_are_reshaped_by_spin_kpoint_and_band() {
        let temp = TempDir::new().expect("tempdir should be created");
        write(temp.path(), "DFTK.log", FINISHED_LOG);
        write(temp.path(), "self_consistent_field.json", &scf_summary(true).to_string());
        let bands = json!({
            "results": {
                "converged": true,
                "n_spin_components": 2,
                "n_bands": 3,
                "kcoords": [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
                "eigenvalues": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
            }
        });
        write(temp.path(), "compute_bands.json", &bands.to_string());
        let list = retrieve_list(&["compute_bands.json"]);

        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::Success);
        let bands = result.outputs.output_bands.expect("bands should be published");
        assert_eq!(bands.eigenvalues.shape(), &[2, 2, 3]);
        assert_eq!(bands.eigenvalues.get(&[1, 0, 2]), Some(9.0));
        assert_eq!(bands.n_spin_components(), 2);
        let kpoints = result.outputs.output_kpoints.expect("k-points should be published");
        assert_eq!(kpoints.points().map(<[_]>::len), Some(2));
    }

    #[test]
    fn oversized_band_counts_are_treated_as_missing_bands() {
        let temp = TempDir::new().expect("tempdir should be created");
        write(temp.path(), "DFTK.log", FINISHED_LOG);
        write(temp.path(), "self_consistent_field.json", &scf_summary(true).to_string());
        let bands = json!({
            "results": {
                "converged": true,
                "n_spin_components": u64::MAX,
                "kcoords": [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
                "eigenvalues": [1, 2, 3, 4]
            }
        });
        write(temp.path(), "compute_bands.json", &bands.to_string());
        let list = retrieve_list(&["compute_bands.json"]);

        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::MissingArtifact(ArtifactKind::Bands));
        assert!(result.outputs.output_bands.is_none());
    }

    #[test]
    fn unconverged_bands_publish_their_data() {
        let temp = TempDir::new().expect("tempdir should be created");
        write(temp.path(), "DFTK.log", FINISHED_LOG);
        write(temp.path(), "self_consistent_field.json", &scf_summary(true).to_string());
        let bands = json!({
            "results": {
                "converged": false,
                "kcoords": [[0.0, 0.0, 0.0]],
                "eigenvalues": [[[-0.1, 0.2]]]
            }
        });
        write(temp.path(), "compute_bands.json", &bands.to_string());
        let list = retrieve_list(&["compute_bands.json"]);

        let result = run(temp.path(), &list, Termination::default());
        assert_eq!(result.status, AttemptStatus::PostProcessingNotConverged);
        let bands = result.outputs.output_bands.expect("bands should be published");
        assert_eq!(bands.eigenvalues.shape(), &[1, 1, 2]);
    }
}
