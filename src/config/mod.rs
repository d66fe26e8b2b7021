// src/config/mod.rs

//! Configuration and request models for kubelaunch.
//!
//! Responsibilities:
//! - Define the TOML-backed engine configuration (`model.rs`).
//! - Define the YAML task and volume descriptions (`task.rs`).
//! - Load both from disk (`loader.rs`).
//! - Validate them before anything touches the cluster (`validate.rs`).

pub mod loader;
pub mod model;
pub mod task;
pub mod validate;

pub use loader::{load_engine_config, load_from_path, load_task, parse_task};
pub use model::{EngineConfig, LogOptions, RawEngineConfig};
pub use task::{
    Accelerators, RawTaskDefinition, RawVolumeDefinition, ResourcesSpec, TaskDefinition,
    VolumeDefinition,
};
