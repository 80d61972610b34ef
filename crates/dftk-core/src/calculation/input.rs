use crate::common::constants::{
    ANG_TO_BOHR, DEFAULT_CHECKPOINT_FILENAME, MIN_OUTPUT_BUFFER_SECONDS, PSEUDO_SUBFOLDER,
    SCF_FUNCTION,
};
use crate::domain::{DftkError, DftkResult, KpointsData, PseudoFamily, Structure};
use crate::utils::merge_parameters;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Walltimes below this many seconds keep a fixed flush buffer instead of a 10% margin.
const SHORT_WALLTIME_SECONDS: u64 = 10 * MIN_OUTPUT_BUFFER_SECONDS;

#[derive(Debug, Clone, PartialEq)]
pub struct InputDocument {
    pub document: Value,
    pub local_copy_list: Vec<LocalCopy>,
}

impl InputDocument {
    pub fn to_json(&self) -> DftkResult<String> {
        serde_json::to_string_pretty(&self.document).map_err(|source| {
            DftkError::internal(
                "SYS.INPUT_SERIALIZE",
                format!("failed to serialize input document: {source}"),
            )
        })
    }
}

/// A file staged from the local machine into the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCopy {
    pub source: PathBuf,
    pub filename: String,
    pub target: String,
}

/// SCF `maxtime` leaving room for the program to write its outputs before the walltime.
pub fn scf_time_budget(max_wallclock_seconds: u64) -> u64 {
    if max_wallclock_seconds < SHORT_WALLTIME_SECONDS {
        max_wallclock_seconds.saturating_sub(MIN_OUTPUT_BUFFER_SECONDS)
    } else {
        max_wallclock_seconds / 10 * 9 + max_wallclock_seconds % 10 * 9 / 10
    }
}

pub fn build_input_document(
    parameters: &Value,
    structure: &Structure,
    pseudos: &PseudoFamily,
    kpoints: &KpointsData,
    max_wallclock_seconds: Option<u64>,
) -> DftkResult<InputDocument> {
    if !parameters.is_object() {
        return Err(DftkError::input_validation(
            "INPUT.PARAMETERS_TYPE",
            "input parameters must be a key-value record",
        ));
    }

    let (kgrid, kshift) = kpoints.get_mesh().ok_or_else(|| {
        DftkError::input_validation(
            "INPUT.KPOINTS_MESH",
            "the kpoints input does not have a valid mesh set",
        )
    })?;

    let bounding_box = structure
        .cell
        .iter()
        .map(|vector| vector.map(|value| value * ANG_TO_BOHR))
        .collect::<Vec<_>>();

    let mut atoms = Vec::with_capacity(structure.sites.len());
    let mut local_copy_list = Vec::new();
    let mut staged = BTreeSet::new();
    for site in &structure.sites {
        let pseudo = pseudos.get(&site.kind_name).ok_or_else(|| {
            DftkError::input_validation(
                "INPUT.PSEUDOS_MISMATCH",
                format!("no pseudopotential defined for kind '{}'", site.kind_name),
            )
        })?;
        let target = format!("{PSEUDO_SUBFOLDER}{}", pseudo.filename);
        atoms.push(json!({
            "symbol": site.kind_name,
            "position": site.position.map(|value| value * ANG_TO_BOHR),
            "pseudopotential": target,
        }));
        if staged.insert(target.clone()) {
            local_copy_list.push(LocalCopy {
                source: pseudo.source.clone(),
                filename: pseudo.filename.clone(),
                target,
            });
        }
    }

    let mut scf_kwargs = serde_json::Map::new();
    if let Some(walltime) = max_wallclock_seconds {
        scf_kwargs.insert("maxtime".to_string(), json!(scf_time_budget(walltime)));
    }

    let mut document = json!({
        "periodic_system": {
            "bounding_box": bounding_box,
            "atoms": atoms,
        },
        "model_kwargs": {},
        "basis_kwargs": {
            "kgrid": kgrid,
            "kshift": kshift,
        },
        "scf": {
            "$function": SCF_FUNCTION,
            "checkpointfile": DEFAULT_CHECKPOINT_FILENAME,
            "$kwargs": scf_kwargs,
        },
        "postscf": [],
    });
    merge_parameters(&mut document, parameters);

    Ok(InputDocument {
        document,
        local_copy_list,
    })
}
