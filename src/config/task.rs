// src/config/task.rs

//! YAML task and volume descriptions.
//!
//! The task format follows the SkyPilot dialect:
//!
//! ```yaml
//! name: train
//! num_nodes: 2
//! resources:
//!   cpus: 4+
//!   memory: 16Gi
//!   accelerators: V100:1
//!   image_id: pytorch/pytorch:latest
//! envs:
//!   EPOCHS: 10
//! volumes:
//!   /data: datasets
//! setup: pip install -r requirements.txt
//! run: python train.py
//! ```
//!
//! Fields this engine has no use for (`instance_type`, `use_spot`,
//! `disk_size`, `ports`, `file_mounts`) are accepted and ignored so that
//! files written for richer launchers still load.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

/// Task description as read from YAML, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTaskDefinition {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub workdir: Option<String>,

    /// Signed so that `num_nodes: 0` or `-1` reach validation instead of
    /// failing as a parse error.
    #[serde(default = "default_num_nodes")]
    pub num_nodes: i64,

    #[serde(default)]
    pub resources: Option<ResourcesSpec>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub envs: BTreeMap<String, String>,

    #[serde(default)]
    pub file_mounts: Option<serde_yaml::Value>,

    /// Container mount path -> logical volume name.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,

    #[serde(default)]
    pub setup: Option<String>,

    #[serde(default)]
    pub run: Option<String>,
}

fn default_num_nodes() -> i64 {
    1
}

/// Per-node resource descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesSpec {
    #[serde(default, deserialize_with = "opt_scalar")]
    pub cpus: Option<String>,

    #[serde(default, deserialize_with = "opt_scalar")]
    pub memory: Option<String>,

    #[serde(default)]
    pub accelerators: Option<Accelerators>,

    #[serde(default)]
    pub image_id: Option<String>,

    // Compatibility shim: accepted, never translated.
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub use_spot: Option<bool>,
    #[serde(default)]
    pub disk_size: Option<serde_yaml::Value>,
    #[serde(default)]
    pub ports: Option<serde_yaml::Value>,
}

impl ResourcesSpec {
    /// Names of the set fields that are accepted but have no effect.
    pub fn ignored_fields(&self) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if self.instance_type.is_some() {
            ignored.push("instance_type");
        }
        if self.use_spot.is_some() {
            ignored.push("use_spot");
        }
        if self.disk_size.is_some() {
            ignored.push("disk_size");
        }
        if self.ports.is_some() {
            ignored.push("ports");
        }
        ignored
    }
}

/// Accelerator request: `4`, `"V100"`, `"V100:2"` or `{V100: 2}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Accelerators {
    Count(u32),
    Spec(String),
    Map(BTreeMap<String, u32>),
}

/// Validated task description.
///
/// Only constructed through `TryFrom<RawTaskDefinition>` (see
/// `validate.rs`), so `run` is non-blank and `num_nodes >= 1`.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: Option<String>,
    pub workdir: Option<String>,
    pub num_nodes: u32,
    pub resources: ResourcesSpec,
    pub envs: BTreeMap<String, String>,
    pub volumes: BTreeMap<String, String>,
    pub setup: Option<String>,
    pub run: String,
}

impl TaskDefinition {
    pub(crate) fn new_unchecked(raw: RawTaskDefinition, num_nodes: u32, run: String) -> Self {
        Self {
            name: raw.name,
            workdir: raw.workdir,
            num_nodes,
            resources: raw.resources.unwrap_or_default(),
            envs: raw.envs,
            volumes: raw.volumes,
            setup: raw.setup,
            run,
        }
    }
}

/// Volume request as read from YAML or assembled by the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVolumeDefinition {
    pub name: String,

    #[serde(deserialize_with = "scalar")]
    pub size: String,

    #[serde(default)]
    pub storage_class: Option<String>,

    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

impl RawVolumeDefinition {
    pub fn new(name: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: size.into(),
            storage_class: None,
            access_modes: default_access_modes(),
        }
    }
}

/// Validated volume request.
#[derive(Debug, Clone)]
pub struct VolumeDefinition {
    pub name: String,
    pub size: String,
    pub storage_class: Option<String>,
    pub access_modes: Vec<String>,
}

// --- scalar helpers --------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Text(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn scalar<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(Scalar::deserialize(de)?.into())
}

fn opt_scalar<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(de)?.map(String::from))
}

fn scalar_map<'de, D: Deserializer<'de>>(de: D) -> Result<BTreeMap<String, String>, D::Error> {
    let map = Option::<BTreeMap<String, Scalar>>::deserialize(de)?.unwrap_or_default();
    Ok(map.into_iter().map(|(k, v)| (k, v.into())).collect())
}
