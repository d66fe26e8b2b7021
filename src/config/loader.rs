// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::config::task::{RawTaskDefinition, TaskDefinition};
use crate::errors::Result;

/// Load an engine configuration file and return the raw `RawEngineConfig`.
///
/// This only performs TOML deserialization. Use [`load_engine_config`] for
/// validation as well.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawEngineConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawEngineConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load and validate the engine configuration.
///
/// A missing file is not an error: the defaults are used instead, so the
/// CLI works without any config on disk.
pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let raw = if path.exists() {
        load_from_path(path)?
    } else {
        debug!(path = %path.display(), "no engine config file; using defaults");
        RawEngineConfig::default()
    };
    EngineConfig::try_from(raw)
}

/// Parse and validate a YAML task description.
pub fn parse_task(contents: &str) -> Result<TaskDefinition> {
    let raw: RawTaskDefinition = serde_yaml::from_str(contents)?;
    TaskDefinition::try_from(raw)
}

/// Read, parse and validate a YAML task description from disk.
pub fn load_task(path: impl AsRef<Path>) -> Result<TaskDefinition> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_task(&contents)
}

/// Default engine config location: `Kubelaunch.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Kubelaunch.toml")
}
