//! The generated Atlantis repo config and its YAML (de)serialization.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::project::Project;

/// Atlantis repo config version we generate
pub const CONFIG_VERSION: u32 = 3;

/// Output document (`atlantis.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlantisConfig {
    pub version: u32,
    #[serde(default)]
    pub automerge: bool,
    #[serde(default)]
    pub parallel_plan: bool,
    #[serde(default)]
    pub parallel_apply: bool,
    /// Carried over verbatim from a previous config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows: Option<serde_yaml::Value>,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl AtlantisConfig {
    pub fn new(automerge: bool, parallel: bool) -> Self {
        Self {
            version: CONFIG_VERSION,
            automerge,
            parallel_plan: parallel,
            parallel_apply: parallel,
            workflows: None,
            projects: Vec::new(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, OutputError> {
        let yaml = serde_yaml::to_string(self)?;
        if cfg!(windows) {
            return Ok(yaml.replace('\n', "\r\n"));
        }
        Ok(yaml)
    }

    pub fn from_yaml(input: &str) -> Result<Self, OutputError> {
        Ok(serde_yaml::from_str(input)?)
    }
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("YAML serialization failed: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("failed to read previous config {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read a previously generated config. A missing file is not an error.
pub fn load_previous_config(path: &Utf8Path) -> Result<Option<AtlantisConfig>, OutputError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(OutputError::Read {
                path: path.to_owned(),
                source,
            });
        }
    };
    AtlantisConfig::from_yaml(&content).map(Some)
}

/// Write the config to `path`.
pub fn write_config(config: &AtlantisConfig, path: &Utf8Path) -> Result<(), OutputError> {
    let yaml = config.to_yaml()?;
    std::fs::write(path, yaml).map_err(|source| OutputError::Write {
        path: path.to_owned(),
        source,
    })
}
