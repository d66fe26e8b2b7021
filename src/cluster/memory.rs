// src/cluster/memory.rs

//! In-memory cluster used by tests and dry runs.
//!
//! Behaves like a single namespace of an orchestrator:
//! - creating a unit also creates its pod (`{unit}-pod`, phase `Pending`)
//!   unless auto pods are disabled,
//! - deleting a unit removes its pods,
//! - phases only change when a test says so,
//! - pod logs are scripted and can be appended to while a reader follows.
//!
//! Failures can be injected per operation with [`FailPoint`].

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::Notify;

use crate::cluster::{
    ClaimRecord, ClaimSpec, ClusterBackend, LogLines, PodRecord, UnitRecord, UnitSpec,
};
use crate::errors::{LaunchError, Result};
use crate::labels::{LabelSelector, NODE_IDX_LABEL, OWNER_LABEL, TASK_ID_LABEL, TYPE_LABEL};
use crate::types::{PodPhase, UnitPhase};

const JOB_NAME_LABEL: &str = "job-name";

/// Operations that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Creating the unit for this node index fails.
    CreateUnitForNode(u32),
    ListUnits,
    DeleteUnit,
    CreateClaim,
    ListClaims,
    DeleteClaim,
    ListPods,
    StreamLogs,
}

#[derive(Debug, Clone)]
struct StoredUnit {
    spec: UnitSpec,
    record: UnitRecord,
}

#[derive(Debug, Clone)]
struct StoredPod {
    record: PodRecord,
    lines: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    units: BTreeMap<String, StoredUnit>,
    claims: BTreeMap<String, ClaimRecord>,
    pods: BTreeMap<String, StoredPod>,
    failures: HashSet<FailPoint>,
    deleted_units: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    changed: Notify,
    active_readers: Arc<AtomicUsize>,
    auto_pods: bool,
}

/// Deterministic [`ClusterBackend`] fake.
#[derive(Debug, Clone)]
pub struct InMemoryCluster {
    inner: Arc<Inner>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A cluster whose scheduler never creates pods on its own; tests add
    /// them with [`InMemoryCluster::add_pod`].
    pub fn without_auto_pods() -> Self {
        Self::build(false)
    }

    fn build(auto_pods: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changed: Notify::new(),
                active_readers: Arc::new(AtomicUsize::new(0)),
                auto_pods,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Ignore poisoning: state stays usable after a panicked test thread.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let out = f(&mut self.state());
        self.inner.changed.notify_waiters();
        out
    }

    fn check(&self, point: FailPoint, resource: &str) -> Result<()> {
        if self.state().failures.contains(&point) {
            return Err(LaunchError::upstream(
                "injected failure",
                resource,
                format!("{point:?}"),
            ));
        }
        Ok(())
    }

    /// Reject selectors the API server would refuse to parse.
    fn check_selector(selector: &LabelSelector) -> Result<()> {
        if selector.is_well_formed() {
            Ok(())
        } else {
            Err(LaunchError::upstream(
                "list",
                selector.to_string(),
                "unable to parse requirement: invalid label value",
            ))
        }
    }

    // --- test controls -------------------------------------------------------

    pub fn inject_failure(&self, point: FailPoint) {
        self.state().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Specs of all units currently present, ordered by name.
    pub fn units(&self) -> Vec<UnitSpec> {
        self.state().units.values().map(|u| u.spec.clone()).collect()
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.state().units.keys().cloned().collect()
    }

    /// Names of units deleted so far, in call order.
    pub fn deleted_units(&self) -> Vec<String> {
        self.state().deleted_units.clone()
    }

    pub fn claims(&self) -> Vec<ClaimRecord> {
        self.state().claims.values().cloned().collect()
    }

    pub fn pods(&self) -> Vec<PodRecord> {
        self.state().pods.values().map(|p| p.record.clone()).collect()
    }

    /// Number of log streams opened and not yet dropped.
    pub fn active_log_readers(&self) -> usize {
        self.inner.active_readers.load(Ordering::SeqCst)
    }

    pub fn set_unit_phase(&self, unit: &str, phase: UnitPhase) {
        self.mutate(|s| {
            if let Some(u) = s.units.get_mut(unit) {
                u.record.phase = phase;
            }
        });
    }

    /// Set a node's unit phase and move its pods to the matching phase.
    pub fn set_node_phase(&self, task_id: &str, node_idx: u32, phase: UnitPhase) {
        let pod_phase = match phase {
            UnitPhase::Pending => PodPhase::Pending,
            UnitPhase::Running => PodPhase::Running,
            UnitPhase::Succeeded => PodPhase::Succeeded,
            UnitPhase::Failed => PodPhase::Failed,
        };
        let idx = node_idx.to_string();
        self.mutate(|s| {
            for u in s.units.values_mut() {
                if label_is(&u.record.labels, TASK_ID_LABEL, task_id)
                    && label_is(&u.record.labels, NODE_IDX_LABEL, &idx)
                {
                    u.record.phase = phase;
                }
            }
            for p in s.pods.values_mut() {
                if label_is(&p.record.labels, TASK_ID_LABEL, task_id)
                    && label_is(&p.record.labels, NODE_IDX_LABEL, &idx)
                {
                    p.record.phase = pod_phase;
                }
            }
        });
    }

    pub fn set_pod_phase(&self, pod: &str, phase: PodPhase) {
        self.mutate(|s| {
            if let Some(p) = s.pods.get_mut(pod) {
                p.record.phase = phase;
            }
        });
    }

    pub fn add_pod(&self, name: &str, labels: BTreeMap<String, String>, phase: PodPhase) {
        self.mutate(|s| {
            s.pods.insert(
                name.to_string(),
                StoredPod {
                    record: PodRecord {
                        name: name.to_string(),
                        labels,
                        phase,
                        created_at: Some(Utc::now()),
                    },
                    lines: Vec::new(),
                },
            );
        });
    }

    /// Append a log line to a pod; following readers see it immediately.
    pub fn push_log(&self, pod: &str, line: &str) {
        self.mutate(|s| {
            if let Some(p) = s.pods.get_mut(pod) {
                p.lines.push(line.to_string());
            }
        });
    }

    /// Name of the first pod backing a task node, if any.
    pub fn pod_for_node(&self, task_id: &str, node_idx: u32) -> Option<String> {
        let idx = node_idx.to_string();
        self.state()
            .pods
            .values()
            .find(|p| {
                label_is(&p.record.labels, TASK_ID_LABEL, task_id)
                    && label_is(&p.record.labels, NODE_IDX_LABEL, &idx)
            })
            .map(|p| p.record.name.clone())
    }

    /// Register a claim that was not created through the engine.
    pub fn add_claim(&self, claim: ClaimSpec) {
        self.mutate(|s| {
            s.claims.insert(claim.name.clone(), claim_record(&claim));
        });
    }
}

fn label_is(labels: &BTreeMap<String, String>, key: &str, value: &str) -> bool {
    labels.get(key).is_some_and(|v| v == value)
}

fn claim_record(claim: &ClaimSpec) -> ClaimRecord {
    ClaimRecord {
        name: claim.name.clone(),
        labels: claim.labels.clone(),
        annotations: claim.annotations.clone(),
        size: Some(claim.size.clone()),
        storage_class: claim.storage_class.clone(),
        access_modes: claim.access_modes.clone(),
        phase: "Bound".to_string(),
        created_at: Some(Utc::now()),
    }
}

/// Decrements the live reader count when a log stream is dropped.
struct ReaderGuard(Arc<AtomicUsize>);

impl ReaderGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `Some(Some(line))`: next line. `Some(None)`: end of log. `None`: wait.
fn next_line(inner: &Inner, pod: &str, cursor: usize, follow: bool) -> Option<Option<String>> {
    let state = inner
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match state.pods.get(pod) {
        None => Some(None),
        Some(p) if cursor < p.lines.len() => Some(Some(p.lines[cursor].clone())),
        Some(p) if !follow || p.record.phase.is_terminal() => Some(None),
        Some(_) => None,
    }
}

impl ClusterBackend for InMemoryCluster {
    fn create_unit<'a>(&'a self, unit: &'a UnitSpec) -> BoxFuture<'a, Result<()>> {
        async move {
            self.check(FailPoint::CreateUnitForNode(unit.node_idx), &unit.name)?;
            let auto_pods = self.inner.auto_pods;
            self.mutate(|s| {
                if s.units.contains_key(&unit.name) {
                    return Err(LaunchError::upstream(
                        "create unit",
                        &unit.name,
                        "already exists",
                    ));
                }

                let record = UnitRecord {
                    name: unit.name.clone(),
                    labels: unit.labels.clone(),
                    annotations: unit.annotations.clone(),
                    phase: UnitPhase::Pending,
                    created_at: Some(Utc::now()),
                    claim_names: unit.mounts.iter().map(|m| m.claim_name.clone()).collect(),
                };
                s.units.insert(
                    unit.name.clone(),
                    StoredUnit {
                        spec: unit.clone(),
                        record,
                    },
                );

                if auto_pods {
                    let mut labels: BTreeMap<String, String> = unit
                        .labels
                        .iter()
                        .filter(|(k, _)| {
                            [TYPE_LABEL, TASK_ID_LABEL, OWNER_LABEL, NODE_IDX_LABEL]
                                .contains(&k.as_str())
                        })
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    labels.insert(JOB_NAME_LABEL.to_string(), unit.name.clone());
                    let pod_name = format!("{}-pod", unit.name);
                    s.pods.insert(
                        pod_name.clone(),
                        StoredPod {
                            record: PodRecord {
                                name: pod_name,
                                labels,
                                phase: PodPhase::Pending,
                                created_at: Some(Utc::now()),
                            },
                            lines: Vec::new(),
                        },
                    );
                }
                Ok(())
            })
        }
        .boxed()
    }

    fn list_units<'a>(
        &'a self,
        selector: &'a LabelSelector,
    ) -> BoxFuture<'a, Result<Vec<UnitRecord>>> {
        async move {
            self.check(FailPoint::ListUnits, &selector.to_string())?;
            Self::check_selector(selector)?;
            Ok(self
                .state()
                .units
                .values()
                .filter(|u| selector.matches(&u.record.labels))
                .map(|u| u.record.clone())
                .collect())
        }
        .boxed()
    }

    fn delete_unit<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            self.check(FailPoint::DeleteUnit, name)?;
            Ok(self.mutate(|s| {
                let existed = s.units.remove(name).is_some();
                if existed {
                    s.deleted_units.push(name.to_string());
                    s.pods
                        .retain(|_, p| !label_is(&p.record.labels, JOB_NAME_LABEL, name));
                }
                existed
            }))
        }
        .boxed()
    }

    fn create_claim<'a>(&'a self, claim: &'a ClaimSpec) -> BoxFuture<'a, Result<()>> {
        async move {
            self.check(FailPoint::CreateClaim, &claim.name)?;
            self.mutate(|s| {
                if s.claims.contains_key(&claim.name) {
                    return Err(LaunchError::upstream(
                        "create claim",
                        &claim.name,
                        "already exists",
                    ));
                }
                s.claims.insert(claim.name.clone(), claim_record(claim));
                Ok(())
            })
        }
        .boxed()
    }

    fn list_claims<'a>(
        &'a self,
        selector: &'a LabelSelector,
    ) -> BoxFuture<'a, Result<Vec<ClaimRecord>>> {
        async move {
            self.check(FailPoint::ListClaims, &selector.to_string())?;
            Self::check_selector(selector)?;
            Ok(self
                .state()
                .claims
                .values()
                .filter(|c| selector.matches(&c.labels))
                .cloned()
                .collect())
        }
        .boxed()
    }

    fn delete_claim<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            self.check(FailPoint::DeleteClaim, name)?;
            Ok(self.mutate(|s| s.claims.remove(name).is_some()))
        }
        .boxed()
    }

    fn list_pods<'a>(
        &'a self,
        selector: &'a LabelSelector,
    ) -> BoxFuture<'a, Result<Vec<PodRecord>>> {
        async move {
            self.check(FailPoint::ListPods, &selector.to_string())?;
            Self::check_selector(selector)?;
            Ok(self
                .state()
                .pods
                .values()
                .filter(|p| selector.matches(&p.record.labels))
                .map(|p| p.record.clone())
                .collect())
        }
        .boxed()
    }

    fn stream_pod_logs<'a>(
        &'a self,
        pod: &'a str,
        follow: bool,
    ) -> BoxFuture<'a, Result<LogLines<'a>>> {
        async move {
            self.check(FailPoint::StreamLogs, pod)?;
            if !self.state().pods.contains_key(pod) {
                return Err(LaunchError::not_found("pod", pod));
            }

            let guard = ReaderGuard::new(&self.inner.active_readers);
            let inner = Arc::clone(&self.inner);
            let pod = pod.to_string();

            let lines = futures::stream::unfold(
                (inner, pod, 0usize, guard),
                move |(inner, pod, cursor, guard)| async move {
                    loop {
                        let ready = {
                            // Registered before reading so a push between the
                            // read and the await still wakes us.
                            let notified = inner.changed.notified();
                            tokio::pin!(notified);
                            notified.as_mut().enable();

                            match next_line(&inner, &pod, cursor, follow) {
                                Some(ready) => ready,
                                None => {
                                    notified.await;
                                    continue;
                                }
                            }
                        };
                        return ready.map(|line| {
                            (Ok::<_, std::io::Error>(line), (inner, pod, cursor + 1, guard))
                        });
                    }
                },
            );

            Ok(lines.boxed())
        }
        .boxed()
    }
}
