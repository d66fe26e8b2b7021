// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    /// Malformed task/volume request. Raised before any cluster mutation.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A per-node unit failed to create; siblings were rolled back.
    #[error(
        "Submission of task {task_id} failed at node {node_idx} \
         ({rolled_back} unit(s) rolled back): {source}"
    )]
    PartialSubmissionFailure {
        task_id: String,
        node_idx: u32,
        rolled_back: usize,
        #[source]
        source: Box<LaunchError>,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Unit {unit} (node {node_idx}) did not start within {waited:?}")]
    SchedulingTimeout {
        node_idx: u32,
        unit: String,
        waited: Duration,
    },

    #[error("Orchestrator call `{operation}` on '{resource}' failed: {message}")]
    UpstreamFailure {
        operation: &'static str,
        resource: String,
        message: String,
    },

    #[error("Volume {volume} is mounted by live units: {}", users.join(", "))]
    VolumeInUse { volume: String, users: Vec<String> },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LaunchError {
    pub fn upstream(
        operation: &'static str,
        resource: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        LaunchError::UpstreamFailure {
            operation,
            resource: resource.into(),
            message: err.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        LaunchError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LaunchError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LaunchError::ValidationError(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, LaunchError>;
