pub mod kpoints;
pub mod merge;
pub mod pseudos;

pub use kpoints::{create_kpoints_from_distance, reciprocal_cell};
pub use merge::merge_parameters;
pub use pseudos::validate_and_prepare_pseudos_inputs;
