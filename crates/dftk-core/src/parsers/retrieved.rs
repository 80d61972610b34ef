use crate::domain::{DftkError, DftkResult};
use globset::{Glob, GlobSetBuilder};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Artifacts the orchestration engine brought back from a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedArtifacts {
    root: PathBuf,
    names: BTreeSet<String>,
}

impl RetrievedArtifacts {
    pub fn new<I, S>(root: impl Into<PathBuf>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root: root.into(),
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Collects the files directly under `root` that match any retrieve pattern.
    pub fn from_dir(root: impl Into<PathBuf>, patterns: &[String]) -> DftkResult<Self> {
        let root = root.into();
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|source| {
                DftkError::input_validation(
                    "INPUT.RETRIEVE_PATTERN",
                    format!("invalid retrieve pattern '{pattern}': {source}"),
                )
            })?;
            builder.add(glob);
        }
        let matcher = builder.build().map_err(|source| {
            DftkError::internal(
                "SYS.RETRIEVE_PATTERN",
                format!("failed to compile retrieve patterns: {source}"),
            )
        })?;

        let entries = fs::read_dir(&root).map_err(|source| {
            DftkError::io_system(
                "IO.RETRIEVE_READ",
                format!("failed to list '{}': {}", root.display(), source),
            )
        })?;

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| {
                DftkError::io_system(
                    "IO.RETRIEVE_READ",
                    format!("failed to list '{}': {}", root.display(), source),
                )
            })?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if matcher.is_match(Path::new(&name)) {
                names.insert(name);
            }
        }

        Ok(Self { root, names })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn path(&self, name: &str) -> Option<PathBuf> {
        self.contains(name).then(|| self.root.join(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
