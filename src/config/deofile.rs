//! deofile discovery and parsing

use crate::config::Config;
use crate::error::{ConfigError, ConfigResult, DeoError, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names searched for, in order
const DEOFILE_NAMES: &[&str] = &["deofile.yml", "deofile.yaml"];

/// Contents of a deofile
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Deofile {
    /// Setting key to value
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// Property tree, flattened into dot paths when applied
    #[serde(default)]
    pub properties: Value,

    /// Task kind to target name to options
    #[serde(default)]
    pub targets: Mapping,
}

impl Deofile {
    /// Apply settings, properties and targets, in that order.
    ///
    /// `cwd` defaults to `base_dir`; a relative `cwd` setting is resolved
    /// against it.
    pub fn apply(&self, config: &mut Config, base_dir: &Path) -> Result<Vec<String>> {
        config.set_setting("cwd", &base_dir.to_string_lossy())?;
        for (key, value) in &self.settings {
            config.set_setting(key, value)?;
        }

        if !self.properties.is_null() {
            if !self.properties.is_mapping() {
                return Err(ConfigError::Invalid("properties must be a mapping".to_string()).into());
            }
            config.properties_mut().set_properties(&self.properties);
        }

        config.register_targets(&self.targets)
    }
}

/// Find the deofile by searching the current directory and its parents
pub fn find_deofile() -> ConfigResult<PathBuf> {
    find_deofile_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the deofile starting from a specific directory
pub fn find_deofile_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in DEOFILE_NAMES {
            let path = current_dir.join(file_name);
            searched_paths.push(path.display().to_string());

            if path.is_file() {
                return Ok(path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse a deofile from a path
pub fn parse_deofile_file(path: &Path) -> Result<Deofile> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e)))?;
    debug!("loaded deofile {}", path.display());
    parse_deofile(&contents)
}

/// Parse a deofile from a string; an empty document is an empty deofile
pub fn parse_deofile(yaml: &str) -> Result<Deofile> {
    if yaml.trim().is_empty() {
        return Ok(Deofile::default());
    }
    serde_yaml::from_str(yaml).map_err(DeoError::from)
}
