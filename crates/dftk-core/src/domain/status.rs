use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Output artifacts whose absence the interpreter reports individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    ScfSummary,
    Forces,
    Stresses,
    Bands,
}

impl ArtifactKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScfSummary => "scf",
            Self::Forces => "forces",
            Self::Stresses => "stresses",
            Self::Bands => "bands",
        }
    }

    /// Post-SCF function producing the artifact, if it is a post-processing product.
    pub const fn postscf_function(self) -> Option<&'static str> {
        match self {
            Self::ScfSummary => None,
            Self::Forces => Some(FORCES_FUNCTION),
            Self::Stresses => Some(STRESSES_FUNCTION),
            Self::Bands => Some(BANDS_FUNCTION),
        }
    }
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const FORCES_FUNCTION: &str = "compute_forces_cart";
pub const STRESSES_FUNCTION: &str = "compute_stresses_cart";
pub const BANDS_FUNCTION: &str = "compute_bands";
pub const SUPPORTED_POSTSCF: [&str; 3] = [FORCES_FUNCTION, STRESSES_FUNCTION, BANDS_FUNCTION];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashKind {
    /// The run log carries the package setup/import failure marker.
    SetupFailed,
    /// The run log is missing or never reached the success marker.
    NoSuccessMarker,
}

/// Classification of a single attempt of the external program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptStatus {
    Success,
    ScfNotConverged,
    PostProcessingNotConverged,
    OutOfWalltimeDuringScf,
    OutOfWalltimeDuringPostProcessing,
    MissingArtifact(ArtifactKind),
    ProcessCrashed(CrashKind),
}

impl AttemptStatus {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub const fn exit_status(self) -> ExitStatus {
        match self {
            Self::Success => ExitStatus::Success,
            Self::ScfNotConverged => ExitStatus::ScfConvergenceNotReached,
            Self::PostProcessingNotConverged => ExitStatus::BandsConvergenceNotReached,
            Self::OutOfWalltimeDuringScf => ExitStatus::ScfOutOfWalltime,
            Self::OutOfWalltimeDuringPostProcessing => ExitStatus::PostScfOutOfWalltime,
            Self::MissingArtifact(ArtifactKind::ScfSummary) => ExitStatus::MissingScfSummary,
            Self::MissingArtifact(ArtifactKind::Forces) => ExitStatus::MissingForces,
            Self::MissingArtifact(ArtifactKind::Stresses) => ExitStatus::MissingStresses,
            Self::MissingArtifact(ArtifactKind::Bands) => ExitStatus::MissingBands,
            Self::ProcessCrashed(CrashKind::SetupFailed) => ExitStatus::PackageSetupFailed,
            Self::ProcessCrashed(CrashKind::NoSuccessMarker) => ExitStatus::ProcessCrashed,
        }
    }
}

impl Display for AttemptStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.exit_status().label())
    }
}

/// Exit statuses exposed to the caller of a calculation or workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Success,
    MissingScfSummary,
    MissingForces,
    MissingStresses,
    MissingBands,
    PackageSetupFailed,
    ProcessCrashed,
    InvalidPseudopotentialInput,
    InvalidKpointsInput,
    InvalidResources,
    UnderspecifiedResources,
    InvalidParametersInput,
    InvalidKpathInput,
    ScfOutOfWalltime,
    PostScfOutOfWalltime,
    ScfConvergenceNotReached,
    BandsConvergenceNotReached,
}

impl ExitStatus {
    pub const fn code(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::MissingScfSummary => 100,
            Self::MissingForces => 101,
            Self::MissingStresses => 102,
            Self::MissingBands => 103,
            Self::PackageSetupFailed => 110,
            Self::ProcessCrashed => 111,
            Self::InvalidPseudopotentialInput => 201,
            Self::InvalidKpointsInput => 202,
            Self::InvalidResources => 203,
            Self::UnderspecifiedResources => 204,
            Self::InvalidParametersInput => 205,
            Self::InvalidKpathInput => 301,
            Self::ScfOutOfWalltime => 400,
            Self::PostScfOutOfWalltime => 401,
            Self::ScfConvergenceNotReached => 500,
            Self::BandsConvergenceNotReached => 501,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::MissingScfSummary => "ERROR_MISSING_SCFRES_FILE",
            Self::MissingForces => "ERROR_MISSING_FORCES_FILE",
            Self::MissingStresses => "ERROR_MISSING_STRESSES_FILE",
            Self::MissingBands => "ERROR_MISSING_BANDS_FILE",
            Self::PackageSetupFailed => "ERROR_PACKAGE_SETUP_FAILED",
            Self::ProcessCrashed => "ERROR_PROCESS_CRASHED",
            Self::InvalidPseudopotentialInput => "ERROR_INVALID_INPUT_PSEUDO_POTENTIALS",
            Self::InvalidKpointsInput => "ERROR_INVALID_INPUT_KPOINTS",
            Self::InvalidResources => "ERROR_INVALID_INPUT_RESOURCES",
            Self::UnderspecifiedResources => "ERROR_INVALID_INPUT_RESOURCES_UNDERSPECIFIED",
            Self::InvalidParametersInput => "ERROR_INVALID_INPUT_PARAMETERS",
            Self::InvalidKpathInput => "ERROR_INVALID_INPUT_KPATH",
            Self::ScfOutOfWalltime => "ERROR_SCF_OUT_OF_WALLTIME",
            Self::PostScfOutOfWalltime => "ERROR_POSTSCF_OUT_OF_WALLTIME",
            Self::ScfConvergenceNotReached => "ERROR_SCF_CONVERGENCE_NOT_REACHED",
            Self::BandsConvergenceNotReached => "ERROR_BANDS_CONVERGENCE_NOT_REACHED",
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::Success => "The calculation finished successfully.",
            Self::MissingScfSummary => "The output file containing the SCF summary is missing.",
            Self::MissingForces => "The output file containing forces is missing.",
            Self::MissingStresses => "The output file containing stresses is missing.",
            Self::MissingBands => "The output file containing the band structure is missing.",
            Self::PackageSetupFailed => {
                "The external program failed to load its interface package."
            }
            Self::ProcessCrashed => "The external program did not finish its run.",
            Self::InvalidPseudopotentialInput => {
                "`pseudos` could not be used to get the necessary pseudos."
            }
            Self::InvalidKpointsInput => {
                "Exactly one of the `kpoints` and `kpoints_distance` inputs must be specified."
            }
            Self::InvalidResources => "The resource options are inconsistent.",
            Self::UnderspecifiedResources => {
                "The options did not specify both `resources.num_machines` and `max_wallclock_seconds`."
            }
            Self::InvalidParametersInput => "The input parameters request an unsupported function.",
            Self::InvalidKpathInput => {
                "Exactly one of the `bands_kpoints` and `bands_kpoints_distance` inputs must be specified."
            }
            Self::ScfOutOfWalltime => "The SCF was interrupted by the walltime limit.",
            Self::PostScfOutOfWalltime => {
                "The post-SCF calculation was interrupted by the walltime limit."
            }
            Self::ScfConvergenceNotReached => "The SCF minimization cycle did not converge.",
            Self::BandsConvergenceNotReached => "The band structure calculation did not converge.",
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ExitStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtifactKind, AttemptStatus, CrashKind, ExitStatus};
    use std::collections::BTreeSet;

    #[test]
    fn missing_artifact_statuses_map_to_distinct_codes() {
        let codes = [
            ArtifactKind::ScfSummary,
            ArtifactKind::Forces,
            ArtifactKind::Stresses,
            ArtifactKind::Bands,
        ]
        .into_iter()
        .map(|kind| AttemptStatus::MissingArtifact(kind).exit_status().code())
        .collect::<Vec<_>>();

        assert_eq!(codes, vec![100, 101, 102, 103]);
    }

    #[test]
    fn walltime_statuses_are_distinguished_by_phase() {
        assert_eq!(
            AttemptStatus::OutOfWalltimeDuringScf.exit_status(),
            ExitStatus::ScfOutOfWalltime
        );
        assert_eq!(
            AttemptStatus::OutOfWalltimeDuringPostProcessing.exit_status(),
            ExitStatus::PostScfOutOfWalltime
        );
        assert_eq!(
            AttemptStatus::ProcessCrashed(CrashKind::SetupFailed)
                .exit_status()
                .label(),
            "ERROR_PACKAGE_SETUP_FAILED"
        );
    }

    #[test]
    fn exit_codes_are_unique() {
        let all = [
            ExitStatus::Success,
            ExitStatus::MissingScfSummary,
            ExitStatus::MissingForces,
            ExitStatus::MissingStresses,
            ExitStatus::MissingBands,
            ExitStatus::PackageSetupFailed,
            ExitStatus::ProcessCrashed,
            ExitStatus::InvalidPseudopotentialInput,
            ExitStatus::InvalidKpointsInput,
            ExitStatus::InvalidResources,
            ExitStatus::UnderspecifiedResources,
            ExitStatus::InvalidParametersInput,
            ExitStatus::InvalidKpathInput,
            ExitStatus::ScfOutOfWalltime,
            ExitStatus::PostScfOutOfWalltime,
            ExitStatus::ScfConvergenceNotReached,
            ExitStatus::BandsConvergenceNotReached,
        ];
        let codes = all.iter().map(|status| status.code()).collect::<BTreeSet<_>>();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn exit_status_serializes_as_label() {
        let json = serde_json::to_string(&ExitStatus::ScfConvergenceNotReached)
            .expect("exit status should serialize");
        assert_eq!(json, "\"ERROR_SCF_CONVERGENCE_NOT_REACHED\"");
    }
}
