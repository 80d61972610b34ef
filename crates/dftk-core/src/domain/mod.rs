pub mod errors;
pub mod outputs;
pub mod status;

pub use errors::{DftkError, DftkErrorCategory, DftkResult};
pub use outputs::{ArrayData, BandStructure, CalculationOutputs};
pub use status::{
    ArtifactKind, AttemptStatus, BANDS_FUNCTION, CrashKind, ExitStatus, FORCES_FUNCTION,
    STRESSES_FUNCTION, SUPPORTED_POSTSCF,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Periodic crystal structure: cell vectors as rows and cartesian site positions, both in Å.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub cell: [[f64; 3]; 3],
    #[serde(default)]
    pub sites: Vec<Site>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub kind_name: String,
    pub position: [f64; 3],
}

impl Structure {
    pub fn new(cell: [[f64; 3]; 3]) -> Self {
        Self {
            cell,
            sites: Vec::new(),
        }
    }

    pub fn append_atom(&mut self, kind_name: impl Into<String>, position: [f64; 3]) {
        self.sites.push(Site {
            kind_name: kind_name.into(),
            position,
        });
    }

    pub fn append_atom_fractional(&mut self, kind_name: impl Into<String>, fractional: [f64; 3]) {
        let mut position = [0.0; 3];
        for (axis, vector) in self.cell.iter().enumerate() {
            for (component, value) in vector.iter().enumerate() {
                position[component] += fractional[axis] * value;
            }
        }
        self.append_atom(kind_name, position);
    }

    pub fn kind_names(&self) -> BTreeSet<String> {
        self.sites
            .iter()
            .map(|site| site.kind_name.clone())
            .collect()
    }

    pub fn atom_count(&self) -> usize {
        self.sites.len()
    }

    pub fn cell_lengths(&self) -> [f64; 3] {
        self.cell
            .map(|vector| vector.iter().map(|value| value * value).sum::<f64>().sqrt())
    }
}

/// K-point sampling: a Monkhorst-Pack mesh or an explicit list (usually a band path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KpointsData {
    Mesh {
        mesh: [u32; 3],
        #[serde(default)]
        offset: [f64; 3],
    },
    List {
        points: Vec<[f64; 3]>,
    },
}

impl KpointsData {
    pub fn mesh(mesh: [u32; 3]) -> Self {
        Self::Mesh {
            mesh,
            offset: [0.0; 3],
        }
    }

    pub fn list(points: Vec<[f64; 3]>) -> Self {
        Self::List { points }
    }

    pub fn get_mesh(&self) -> Option<([u32; 3], [f64; 3])> {
        match self {
            Self::Mesh { mesh, offset } => Some((*mesh, *offset)),
            Self::List { .. } => None,
        }
    }

    pub fn points(&self) -> Option<&[[f64; 3]]> {
        match self {
            Self::Mesh { .. } => None,
            Self::List { points } => Some(points),
        }
    }
}

/// Reference to a pseudopotential file that is staged next to the input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudoPotential {
    pub filename: String,
    pub source: PathBuf,
}

impl PseudoPotential {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let filename = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { filename, source }
    }
}

pub type PseudoFamily = BTreeMap<String, PseudoPotential>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub num_machines: Option<u32>,
    #[serde(default = "default_mpiprocs")]
    pub num_mpiprocs_per_machine: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            num_machines: None,
            num_mpiprocs_per_machine: default_mpiprocs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcOptions {
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub max_wallclock_seconds: Option<u64>,
    #[serde(default = "default_withmpi")]
    pub withmpi: bool,
}

impl Default for CalcOptions {
    fn default() -> Self {
        Self {
            resources: Resources::default(),
            max_wallclock_seconds: None,
            withmpi: default_withmpi(),
        }
    }
}

const fn default_mpiprocs() -> u32 {
    1
}

const fn default_withmpi() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::{CalcOptions, KpointsData, PseudoPotential, Structure};

    fn silicon() -> Structure {
        let param = 5.43;
        let mut structure = Structure::new([
            [param / 2.0, param / 2.0, 0.0],
            [param / 2.0, 0.0, param / 2.0],
            [0.0, param / 2.0, param / 2.0],
        ]);
        structure.append_atom("Si", [0.0, 0.0, 0.0]);
        structure.append_atom_fractional("Si", [0.25, 0.25, 0.25]);
        structure
    }

    #[test]
    fn fractional_sites_are_stored_in_cartesian_coordinates() {
        let structure = silicon();
        let position = structure.sites[1].position;
        for component in position {
            assert!((component - 5.43 / 4.0).abs() < 1.0e-12);
        }
    }

    #[test]
    fn kind_names_are_unique_and_sorted() {
        let mut structure = silicon();
        structure.append_atom("C", [1.0, 1.0, 1.0]);
        let kinds = structure.kind_names().into_iter().collect::<Vec<_>>();
        assert_eq!(kinds, vec!["C".to_string(), "Si".to_string()]);
        assert_eq!(structure.atom_count(), 3);
    }

    #[test]
    fn kpoints_deserialize_from_tagged_json() {
        let mesh: KpointsData = serde_json::from_str(r#"{"type": "mesh", "mesh": [4, 4, 4]}"#)
            .expect("mesh should deserialize");
        assert_eq!(mesh.get_mesh(), Some(([4, 4, 4], [0.0; 3])));

        let list: KpointsData =
            serde_json::from_str(r#"{"type": "list", "points": [[0.0, 0.0, 0.0]]}"#)
                .expect("list should deserialize");
        assert!(list.get_mesh().is_none());
        assert_eq!(list.points().map(|points| points.len()), Some(1));
    }

    #[test]
    fn pseudo_filename_comes_from_source_path() {
        let pseudo = PseudoPotential::new("/data/pseudos/Si.upf");
        assert_eq!(pseudo.filename, "Si.upf");
    }

    #[test]
    fn options_default_to_mpi_single_process() {
        let options: CalcOptions =
            serde_json::from_str("{}").expect("empty options should deserialize");
        assert!(options.withmpi);
        assert_eq!(options.resources.num_mpiprocs_per_machine, 1);
        assert!(options.resources.num_machines.is_none());
        assert!(options.max_wallclock_seconds.is_none());
    }
}
