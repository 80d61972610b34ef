//! Unit conversions and file-naming contract shared with the external program.

pub const BOHR_RADIUS_ANGSTROM: f64 = 0.529_177_210_67_f64;
pub const ANG_TO_BOHR: f64 = 1.0 / BOHR_RADIUS_ANGSTROM;

pub const ENERGY_UNIT: &str = "hartree";
pub const FORCE_UNIT: &str = "hartree/bohr";
pub const STRESS_UNIT: &str = "hartree/bohr^3";

pub const INPUT_FILENAME: &str = "DFTK.json";
pub const STDOUT_FILENAME: &str = "DFTK.txt";
pub const LOG_FILENAME: &str = "DFTK.log";
pub const TIMINGS_FILENAME: &str = "timings.json";
pub const SCFRES_SUMMARY_FILENAME: &str = "self_consistent_field.json";
pub const PSEUDO_SUBFOLDER: &str = "./pseudo/";
pub const DEFAULT_CHECKPOINT_FILENAME: &str = "scfres.jld2";
pub const SCF_FUNCTION: &str = "self_consistent_field";

/// Seconds reserved at the end of the walltime for the program to flush its outputs.
pub const MIN_OUTPUT_BUFFER_SECONDS: u64 = 60;
