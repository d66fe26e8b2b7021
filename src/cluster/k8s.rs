// src/cluster/k8s.rs

//! Kubernetes backend.
//!
//! Units are `batch/v1` Jobs, claims are `PersistentVolumeClaim`s, and logs
//! are read from the Jobs' pods. All objects live in one namespace.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use futures::{AsyncBufReadExt, FutureExt, StreamExt};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar as K8sEnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, PodTemplateSpec,
    ResourceRequirements as K8sResourceRequirements, Volume, VolumeMount as K8sVolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams, PropagationPolicy};
use kube::Client;
use tracing::debug;

use crate::cluster::{
    ClaimRecord, ClaimSpec, ClusterBackend, LogLines, PodRecord, UnitRecord, UnitSpec,
};
use crate::errors::{LaunchError, Result};
use crate::labels::{LabelSelector, TASK_ID_LABEL, NODE_IDX_LABEL, OWNER_LABEL, TYPE_LABEL};
use crate::resources::ResourceRequirements;
use crate::types::{PodPhase, UnitPhase};

/// Name of the single container in every unit pod.
const CONTAINER_NAME: &str = "task";

/// Labels copied from the unit onto its pod template, so pods can be found
/// by task and node.
const POD_TEMPLATE_LABELS: &[&str] = &[TYPE_LABEL, TASK_ID_LABEL, OWNER_LABEL, NODE_IDX_LABEL];

/// [`ClusterBackend`] backed by a live Kubernetes API server.
#[derive(Clone)]
pub struct KubeBackend {
    namespace: String,
    jobs: Api<Job>,
    claims: Api<PersistentVolumeClaim>,
    pods: Api<Pod>,
}

impl std::fmt::Debug for KubeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeBackend")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeBackend {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            jobs: Api::namespaced(client.clone(), namespace),
            claims: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
        }
    }

    /// Connect using the ambient kubeconfig / in-cluster config.
    pub async fn connect(namespace: &str) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| LaunchError::upstream("connect", namespace, e))?;
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl ClusterBackend for KubeBackend {
    fn create_unit<'a>(&'a self, unit: &'a UnitSpec) -> BoxFuture<'a, Result<()>> {
        async move {
            let job = build_job(unit, &self.namespace);
            self.jobs
                .create(&PostParams::default(), &job)
                .await
                .map_err(|e| LaunchError::upstream("create unit", &unit.name, e))?;
            debug!(unit = %unit.name, "created job");
            Ok(())
        }
        .boxed()
    }

    fn list_units<'a>(&'a self, selector: &'a LabelSelector) -> BoxFuture<'a, Result<Vec<UnitRecord>>> {
        async move {
            let lp = ListParams::default().labels(&selector.to_string());
            let jobs = self
                .jobs
                .list(&lp)
                .await
                .map_err(|e| LaunchError::upstream("list units", selector.to_string(), e))?;
            Ok(jobs.items.iter().map(unit_record).collect())
        }
        .boxed()
    }

    fn delete_unit<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let dp = DeleteParams {
                propagation_policy: Some(PropagationPolicy::Background),
                ..Default::default()
            };
            match self.jobs.delete(name, &dp).await {
                Ok(_) => Ok(true),
                Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
                Err(e) => Err(LaunchError::upstream("delete unit", name, e)),
            }
        }
        .boxed()
    }

    fn create_claim<'a>(&'a self, claim: &'a ClaimSpec) -> BoxFuture<'a, Result<()>> {
        async move {
            let pvc = build_claim(claim, &self.namespace);
            self.claims
                .create(&PostParams::default(), &pvc)
                .await
                .map_err(|e| LaunchError::upstream("create claim", &claim.name, e))?;
            Ok(())
        }
        .boxed()
    }

    fn list_claims<'a>(
        &'a self,
        selector: &'a LabelSelector,
    ) -> BoxFuture<'a, Result<Vec<ClaimRecord>>> {
        async move {
            let lp = ListParams::default().labels(&selector.to_string());
            let pvcs = self
                .claims
                .list(&lp)
                .await
                .map_err(|e| LaunchError::upstream("list claims", selector.to_string(), e))?;
            Ok(pvcs.items.iter().map(claim_record).collect())
        }
        .boxed()
    }

    fn delete_claim<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            match self.claims.delete(name, &DeleteParams::default()).await {
                Ok(_) => Ok(true),
                Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
                Err(e) => Err(LaunchError::upstream("delete claim", name, e)),
            }
        }
        .boxed()
    }

    fn list_pods<'a>(&'a self, selector: &'a LabelSelector) -> BoxFuture<'a, Result<Vec<PodRecord>>> {
        async move {
            let lp = ListParams::default().labels(&selector.to_string());
            let pods = self
                .pods
                .list(&lp)
                .await
                .map_err(|e| LaunchError::upstream("list pods", selector.to_string(), e))?;
            Ok(pods.items.iter().map(pod_record).collect())
        }
        .boxed()
    }

    fn stream_pod_logs<'a>(&'a self, pod: &'a str, follow: bool) -> BoxFuture<'a, Result<LogLines<'a>>> {
        async move {
            let lp = LogParams {
                container: Some(CONTAINER_NAME.to_string()),
                follow,
                ..LogParams::default()
            };
            let reader = self
                .pods
                .log_stream(pod, &lp)
                .await
                .map_err(|e| LaunchError::upstream("stream logs", pod, e))?;
            Ok(reader.lines().boxed())
        }
        .boxed()
    }
}

// --- object builders ---------------------------------------------------------

fn build_job(unit: &UnitSpec, namespace: &str) -> Job {
    let pod_labels: BTreeMap<String, String> = unit
        .labels
        .iter()
        .filter(|(k, _)| POD_TEMPLATE_LABELS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let env: Vec<K8sEnvVar> = unit
        .env
        .iter()
        .map(|e| K8sEnvVar {
            name: e.name.clone(),
            value: Some(e.value.clone()),
            ..Default::default()
        })
        .collect();

    let volume_mounts: Vec<K8sVolumeMount> = unit
        .mounts
        .iter()
        .map(|m| K8sVolumeMount {
            name: m.name.clone(),
            mount_path: m.mount_path.clone(),
            ..Default::default()
        })
        .collect();

    // Several mount paths may share one volume; the pod lists it once.
    let mut volumes: Vec<Volume> = Vec::new();
    for m in unit.mounts.iter() {
        if volumes.iter().any(|v| v.name == m.name) {
            continue;
        }
        volumes.push(Volume {
            name: m.name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: m.claim_name.clone(),
                read_only: None,
            }),
            ..Default::default()
        });
    }

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(unit.image.clone()),
        command: Some(unit.command.clone()),
        args: Some(unit.args.clone()),
        env: (!env.is_empty()).then_some(env),
        resources: (!unit.resources.is_empty()).then(|| k8s_resources(&unit.resources)),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(unit.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(unit.labels.clone()),
            annotations: Some(unit.annotations.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn k8s_resources(res: &ResourceRequirements) -> K8sResourceRequirements {
    K8sResourceRequirements {
        requests: quantities(&res.requests),
        limits: quantities(&res.limits),
        ..Default::default()
    }
}

fn quantities(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if map.is_empty() {
        return None;
    }
    Some(
        map.iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

fn build_claim(claim: &ClaimSpec, namespace: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(claim.labels.clone()),
            annotations: Some(claim.annotations.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(claim.access_modes.clone()),
            storage_class_name: claim.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(claim.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// --- object readers ----------------------------------------------------------

/// Phase of a Job with `backoffLimit: 0`: any success or failure is final,
/// any active pod means running.
fn unit_phase(job: &Job) -> UnitPhase {
    let Some(status) = job.status.as_ref() else {
        return UnitPhase::Pending;
    };
    if status.succeeded.unwrap_or(0) > 0 {
        UnitPhase::Succeeded
    } else if status.failed.unwrap_or(0) > 0 {
        UnitPhase::Failed
    } else if status.active.unwrap_or(0) > 0 {
        UnitPhase::Running
    } else {
        UnitPhase::Pending
    }
}

fn unit_record(job: &Job) -> UnitRecord {
    let claim_names = job
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.volumes.as_ref())
        .map(|vols| {
            vols.iter()
                .filter_map(|v| v.persistent_volume_claim.as_ref())
                .map(|pvc| pvc.claim_name.clone())
                .collect()
        })
        .unwrap_or_default();

    UnitRecord {
        name: job.metadata.name.clone().unwrap_or_default(),
        labels: job.metadata.labels.clone().unwrap_or_default(),
        annotations: job.metadata.annotations.clone().unwrap_or_default(),
        phase: unit_phase(job),
        created_at: job.metadata.creation_timestamp.as_ref().map(|t| t.0),
        claim_names,
    }
}

fn claim_record(pvc: &PersistentVolumeClaim) -> ClaimRecord {
    let spec = pvc.spec.as_ref();
    ClaimRecord {
        name: pvc.metadata.name.clone().unwrap_or_default(),
        labels: pvc.metadata.labels.clone().unwrap_or_default(),
        annotations: pvc.metadata.annotations.clone().unwrap_or_default(),
        size: spec
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .map(|q| q.0.clone()),
        storage_class: spec.and_then(|s| s.storage_class_name.clone()),
        access_modes: spec.and_then(|s| s.access_modes.clone()).unwrap_or_default(),
        phase: pvc
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        created_at: pvc.metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}

fn pod_record(pod: &Pod) -> PodRecord {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|p| p.parse::<PodPhase>().unwrap_or(PodPhase::Unknown))
        .unwrap_or(PodPhase::Pending);

    PodRecord {
        name: pod.metadata.name.clone().unwrap_or_default(),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        phase,
        created_at: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}
