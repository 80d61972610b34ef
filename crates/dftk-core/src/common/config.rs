//! Process-wide plugin configuration.
//!
//! The configuration is loaded once at process start (`PluginConfig::load` or
//! `PluginConfig::default`) and passed by reference to the calculation and
//! workflow layers. It records the interface version of the external
//! `AiidaDFTK` Julia package that the generated input documents target.

use crate::domain::{DftkError, DftkResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const INTERFACE_PACKAGE: &str = "AiidaDFTK";
pub const INTERFACE_PACKAGE_UUID: &str = "26386dbc-b74b-4d9a-b75a-41d28ada84fc";
pub const INTERFACE_VERSION_SPEC: &str = "0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Executable launched for every attempt.
    pub program: PathBuf,
    /// Julia project environment holding the interface package.
    pub julia_project: Option<PathBuf>,
    /// Optional MPI launcher prefix used when `withmpi` is set.
    pub mpirun_command: Vec<String>,
    pub interface: InterfaceRequirement,
    pub log_markers: LogMarkers,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("julia"),
            julia_project: None,
            mpirun_command: vec![
                "mpirun".to_string(),
                "-np".to_string(),
                "{tot_num_mpiprocs}".to_string(),
            ],
            interface: InterfaceRequirement::default(),
            log_markers: LogMarkers::default(),
        }
    }
}

impl PluginConfig {
    pub fn load(path: impl AsRef<Path>) -> DftkResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| {
            DftkError::io_system(
                "IO.CONFIG_READ",
                format!("failed to read config '{}': {}", path.display(), source),
            )
        })?;
        serde_json::from_str(&content).map_err(|source| {
            DftkError::input_validation(
                "INPUT.CONFIG_PARSE",
                format!("failed to parse config '{}': {}", path.display(), source),
            )
        })
    }

    pub fn load_or_default(path: Option<&Path>) -> DftkResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Versioned compatibility requirement on the Julia interface package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceRequirement {
    pub package: String,
    pub uuid: String,
    pub version_spec: String,
}

impl Default for InterfaceRequirement {
    fn default() -> Self {
        Self {
            package: INTERFACE_PACKAGE.to_string(),
            uuid: INTERFACE_PACKAGE_UUID.to_string(),
            version_spec: INTERFACE_VERSION_SPEC.to_string(),
        }
    }
}

impl InterfaceRequirement {
    /// Julia `Project.toml` pinning the interface package to the required version.
    pub fn render_project_toml(&self) -> String {
        format!(
            "[deps]\n{} = \"{}\"\n\n[compat]\n{} = \"{}\"\n",
            self.package, self.uuid, self.package, self.version_spec
        )
    }

    pub fn run_script(&self) -> String {
        format!("using {0}; {0}.run()", self.package)
    }
}

/// Run-log lines that identify a completed run and a failed package setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogMarkers {
    pub success: String,
    pub setup_failure: Vec<String>,
}

impl Default for LogMarkers {
    fn default() -> Self {
        Self {
            success: "Finished running AiidaDFTK".to_string(),
            setup_failure: vec![
                "Package AiidaDFTK not found".to_string(),
                "ERROR: LoadError".to_string(),
            ],
        }
    }
}
