// src/cluster/mod.rs

//! Cluster capability seam.
//!
//! The engine never talks to Kubernetes directly; it talks to a
//! [`ClusterBackend`]. This keeps the orchestration logic testable against
//! the deterministic [`memory::InMemoryCluster`] while production uses
//! [`k8s::KubeBackend`].
//!
//! - Execution units are batch jobs, one per task node.
//! - Storage claims back volumes.
//! - Pods are only read: discovered for log streaming and waited on.
//!
//! Every backend is bound to a single namespace at construction time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::errors::Result;
use crate::labels::LabelSelector;
use crate::resources::ResourceRequirements;
use crate::types::{PodPhase, UnitPhase};

pub mod k8s;
pub mod memory;

pub use self::k8s::KubeBackend;
pub use self::memory::InMemoryCluster;

/// Log lines of a pod, in order. May borrow the backend that opened it.
pub type LogLines<'a> = BoxStream<'a, std::io::Result<String>>;

/// Environment variable injected into a unit's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// A resolved volume mount: container path backed by a concrete claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Pod-level volume name (the logical volume name).
    pub name: String,
    pub mount_path: String,
    pub claim_name: String,
}

/// Everything needed to create one execution unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    pub name: String,
    pub node_idx: u32,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub resources: ResourceRequirements,
    pub mounts: Vec<VolumeMount>,
}

/// Observed state of an execution unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub phase: UnitPhase,
    pub created_at: Option<DateTime<Utc>>,
    /// Claims mounted by the unit's pod template.
    pub claim_names: Vec<String>,
}

/// Everything needed to create one storage claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub size: String,
    pub storage_class: Option<String>,
    pub access_modes: Vec<String>,
}

/// Observed state of a storage claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRecord {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub size: Option<String>,
    pub storage_class: Option<String>,
    pub access_modes: Vec<String>,
    /// Claim phase as reported by the cluster (`Pending`, `Bound`, ...).
    pub phase: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Observed state of a pod.
#[derive(Debug, Clone, PartialEq)]
pub struct PodRecord {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub phase: PodPhase,
    pub created_at: Option<DateTime<Utc>>,
}

/// Create/list/delete over units and claims, plus pod reads and logs.
///
/// Deletes return `Ok(false)` when the object was already gone, so bulk
/// stop/delete stays idempotent.
pub trait ClusterBackend: Send + Sync {
    fn create_unit<'a>(&'a self, unit: &'a UnitSpec) -> BoxFuture<'a, Result<()>>;

    fn list_units<'a>(
        &'a self,
        selector: &'a LabelSelector,
    ) -> BoxFuture<'a, Result<Vec<UnitRecord>>>;

    /// Delete a unit, cascading to its pods in the background.
    fn delete_unit<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn create_claim<'a>(&'a self, claim: &'a ClaimSpec) -> BoxFuture<'a, Result<()>>;

    fn list_claims<'a>(
        &'a self,
        selector: &'a LabelSelector,
    ) -> BoxFuture<'a, Result<Vec<ClaimRecord>>>;

    fn delete_claim<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn list_pods<'a>(
        &'a self,
        selector: &'a LabelSelector,
    ) -> BoxFuture<'a, Result<Vec<PodRecord>>>;

    /// Open a pod's log. With `follow`, the stream stays open until the
    /// container exits; without it, the current log is returned in one pass.
    fn stream_pod_logs<'a>(
        &'a self,
        pod: &'a str,
        follow: bool,
    ) -> BoxFuture<'a, Result<LogLines<'a>>>;
}
