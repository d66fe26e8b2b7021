// src/engine/orchestrator.rs

//! Job orchestrator.
//!
//! A task becomes one execution unit per node. Every unit runs the same
//! image, script, resources and mounts; only `NODE_RANK` and the unit name
//! differ. Submission either creates all units or none: on a failure the
//! units created so far are deleted before the error is returned.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cluster::{ClusterBackend, EnvVar, UnitSpec, VolumeMount};
use crate::config::TaskDefinition;
use crate::engine::status::{TaskSnapshot, group_by_label, snapshot};
use crate::engine::{Engine, short_id};
use crate::errors::{LaunchError, Result};
use crate::labels::{
    CREATED_AT_ANNOTATION, LabelSelector, NUM_NODES_ANNOTATION, Owner, OwnerScope, TASK_ID_LABEL,
    is_valid_label_value, unit_labels,
};
use crate::resources::{resolve_image, translate};

/// Shell used to run the composed script.
const SHELL: [&str; 2] = ["/bin/bash", "-c"];

/// The units a submission will create, in node order.
#[derive(Debug, Clone)]
pub struct SubmitPlan {
    pub task_id: String,
    pub task_name: String,
    pub units: Vec<UnitSpec>,
}

/// Build the per-node units of a task without touching the cluster.
///
/// `claims` maps each logical volume name the task mounts to its resolved
/// claim name.
pub fn plan_submission(
    task: &TaskDefinition,
    task_id: &str,
    owner: &Owner,
    claims: &BTreeMap<String, String>,
    default_image: &str,
    created_at: DateTime<Utc>,
) -> Result<SubmitPlan> {
    let task_name = task
        .name
        .clone()
        .unwrap_or_else(|| format!("task-{task_id}"));
    let resources = translate(&task.resources)?;
    let image = resolve_image(&task.resources, default_image);
    let mounts = volume_mounts(task, claims)?;
    let script = compose_script(task);
    let num_nodes = task.num_nodes;

    let annotations = BTreeMap::from([
        (CREATED_AT_ANNOTATION.to_string(), created_at.to_rfc3339()),
        (NUM_NODES_ANNOTATION.to_string(), num_nodes.to_string()),
    ]);

    let units = (0..num_nodes)
        .map(|node_idx| UnitSpec {
            name: unit_name(&task_name, task_id, node_idx, num_nodes),
            node_idx,
            labels: unit_labels(task_id, &task_name, owner, node_idx),
            annotations: annotations.clone(),
            image: image.clone(),
            command: SHELL.iter().map(|s| s.to_string()).collect(),
            args: vec![script.clone()],
            env: node_env(task, node_idx),
            resources: resources.clone(),
            mounts: mounts.clone(),
        })
        .collect();

    Ok(SubmitPlan {
        task_id: task_id.to_string(),
        task_name,
        units,
    })
}

/// `{name}-{id}` for single-node tasks, `{name}-{id}-node-{idx}` otherwise.
pub fn unit_name(task_name: &str, task_id: &str, node_idx: u32, num_nodes: u32) -> String {
    if num_nodes > 1 {
        format!("{task_name}-{task_id}-node-{node_idx}")
    } else {
        format!("{task_name}-{task_id}")
    }
}

/// `cd workdir`, then setup, then run, one per line.
fn compose_script(task: &TaskDefinition) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(workdir) = task.workdir.as_deref().filter(|w| !w.trim().is_empty()) {
        parts.push(format!("cd {workdir}"));
    }
    if let Some(setup) = task.setup.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(setup.to_string());
    }
    parts.push(task.run.clone());
    parts.join("\n")
}

fn node_env(task: &TaskDefinition, node_idx: u32) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = task
        .envs
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    env.push(EnvVar {
        name: "NODE_RANK".to_string(),
        value: node_idx.to_string(),
    });
    env.push(EnvVar {
        name: "NUM_NODES".to_string(),
        value: task.num_nodes.to_string(),
    });
    env
}

fn volume_mounts(
    task: &TaskDefinition,
    claims: &BTreeMap<String, String>,
) -> Result<Vec<VolumeMount>> {
    // One positional pod volume per distinct claim; logical names never leak
    // into pod volume names, so two mounts share a name only if they share a claim.
    let pod_volume_names: BTreeMap<&str, String> = claims
        .keys()
        .enumerate()
        .map(|(i, logical)| (logical.as_str(), format!("vol-{i}")))
        .collect();

    task.volumes
        .iter()
        .map(|(mount_path, logical)| {
            let claim_name = claims.get(logical).ok_or_else(|| {
                LaunchError::ValidationError(format!("volume '{logical}' was not resolved"))
            })?;
            Ok(VolumeMount {
                name: pod_volume_names
                    .get(logical.as_str())
                    .cloned()
                    .ok_or_else(|| {
                        LaunchError::ValidationError(format!("volume '{logical}' was not resolved"))
                    })?,
                mount_path: mount_path.clone(),
                claim_name: claim_name.clone(),
            })
        })
        .collect()
}

impl<C: ClusterBackend + 'static> Engine<C> {
    /// Resolve volumes and build the submission without creating anything.
    pub async fn plan(&self, task: &TaskDefinition, owner: &Owner) -> Result<SubmitPlan> {
        let claims = self.resolve_mounts(task, owner).await?;
        plan_submission(
            task,
            &short_id(),
            owner,
            &claims,
            &self.config.default_image,
            Utc::now(),
        )
    }

    /// Submit a task: create one unit per node and return the task id.
    pub async fn submit(&self, task: &TaskDefinition, owner: &Owner) -> Result<String> {
        let plan = self.plan(task, owner).await?;
        let task_id = plan.task_id.clone();
        info!(
            task_id = %task_id,
            name = %plan.task_name,
            num_nodes = task.num_nodes,
            owner = %owner,
            "submitting task"
        );

        let mut created: Vec<&str> = Vec::with_capacity(plan.units.len());
        for unit in &plan.units {
            match self.cluster.create_unit(unit).await {
                Ok(()) => {
                    debug!(unit = %unit.name, node_idx = unit.node_idx, "unit created");
                    created.push(&unit.name);
                }
                Err(err) => {
                    warn!(
                        task_id = %task_id,
                        unit = %unit.name,
                        error = %err,
                        "unit creation failed; rolling back"
                    );
                    let rolled_back = self.rollback(&created).await;
                    return Err(LaunchError::PartialSubmissionFailure {
                        task_id,
                        node_idx: unit.node_idx,
                        rolled_back,
                        source: Box::new(err),
                    });
                }
            }
        }

        info!(task_id = %task_id, units = created.len(), "task submitted");
        Ok(task_id)
    }

    /// Best-effort delete of already-created units. Returns how many went away.
    async fn rollback(&self, units: &[&str]) -> usize {
        let mut removed = 0;
        for name in units {
            match self.cluster.delete_unit(name).await {
                Ok(_) => removed += 1,
                Err(err) => warn!(unit = %name, error = %err, "rollback delete failed"),
            }
        }
        removed
    }

    /// Delete every unit of a task visible in `scope`.
    ///
    /// Returns the number of units deleted; an unknown or already-stopped
    /// task yields 0.
    pub async fn stop(&self, task_id: &str, scope: &OwnerScope) -> Result<usize> {
        // An id that cannot be a label value names no task.
        if !is_valid_label_value(task_id) {
            debug!(task_id, "malformed task id; nothing to stop");
            return Ok(0);
        }
        let units = self
            .cluster
            .list_units(&LabelSelector::task(task_id, scope))
            .await?;
        let deleted = self.delete_units(units.iter().map(|u| u.name.as_str())).await?;
        info!(task_id, deleted, "task stopped");
        Ok(deleted)
    }

    /// Delete every task unit visible in `scope`.
    pub async fn stop_all(&self, scope: &OwnerScope) -> Result<usize> {
        let units = self.cluster.list_units(&LabelSelector::tasks(scope)).await?;
        let deleted = self.delete_units(units.iter().map(|u| u.name.as_str())).await?;
        info!(deleted, "all tasks stopped");
        Ok(deleted)
    }

    async fn delete_units<'n>(&self, names: impl Iterator<Item = &'n str>) -> Result<usize> {
        let mut deleted = 0;
        for name in names {
            if self.cluster.delete_unit(name).await? {
                deleted += 1;
            } else {
                debug!(unit = name, "unit already gone");
            }
        }
        Ok(deleted)
    }

    /// Tasks visible in `scope`, newest first.
    pub async fn list(&self, scope: &OwnerScope) -> Result<Vec<TaskSnapshot>> {
        let units = self.cluster.list_units(&LabelSelector::tasks(scope)).await?;
        let mut tasks: Vec<TaskSnapshot> = group_by_label(units, TASK_ID_LABEL)
            .iter()
            .map(|(task_id, units)| snapshot(task_id, units, &self.config.namespace))
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// Current status of one task.
    pub async fn status(&self, task_id: &str, scope: &OwnerScope) -> Result<TaskSnapshot> {
        if !is_valid_label_value(task_id) {
            return Err(LaunchError::not_found("task", task_id));
        }
        let units = self
            .cluster
            .list_units(&LabelSelector::task(task_id, scope))
            .await?;
        if units.is_empty() {
            return Err(LaunchError::not_found("task", task_id));
        }
        Ok(snapshot(task_id, &units, &self.config.namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_task;
    use crate::config::validate::is_dns_label;

    fn plan(yaml: &str, claims: &[(&str, &str)]) -> SubmitPlan {
        let task = parse_task(yaml).unwrap();
        let owner = Owner::new("alice@example.com").unwrap();
        let claims = claims
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        plan_submission(&task, "abcd1234", &owner, &claims, "python:3.13-slim", Utc::now())
            .unwrap()
    }

    fn env_value<'a>(unit: &'a UnitSpec, name: &str) -> Option<&'a str> {
        unit.env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    #[test]
    fn single_node_unit_has_no_node_suffix() {
        let p = plan("name: hello\nrun: echo hi\n", &[]);
        assert_eq!(p.units.len(), 1);
        assert_eq!(p.units[0].name, "hello-abcd1234");
        assert_eq!(env_value(&p.units[0], "NODE_RANK"), Some("0"));
        assert_eq!(env_value(&p.units[0], "NUM_NODES"), Some("1"));
    }

    #[test]
    fn multi_node_units_differ_only_in_rank() {
        let p = plan("name: train\nnum_nodes: 3\nenvs:\n  EPOCHS: 10\nrun: python t.py\n", &[]);
        let names: Vec<_> = p.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(
            names,
            ["train-abcd1234-node-0", "train-abcd1234-node-1", "train-abcd1234-node-2"]
        );
        for (idx, unit) in p.units.iter().enumerate() {
            assert_eq!(env_value(unit, "NODE_RANK"), Some(idx.to_string().as_str()));
            assert_eq!(env_value(unit, "NUM_NODES"), Some("3"));
            assert_eq!(env_value(unit, "EPOCHS"), Some("10"));
            assert_eq!(unit.args, p.units[0].args);
            assert_eq!(unit.image, p.units[0].image);
            assert_eq!(unit.annotations.get(NUM_NODES_ANNOTATION).map(String::as_str), Some("3"));
        }
    }

    #[test]
    fn default_name_uses_task_id() {
        let p = plan("run: echo hi\n", &[]);
        assert_eq!(p.task_name, "task-abcd1234");
        assert_eq!(p.units[0].name, "task-abcd1234-abcd1234");
    }

    #[test]
    fn script_joins_workdir_setup_and_run() {
        let p = plan("workdir: /src\nsetup: pip install x\nrun: python main.py\n", &[]);
        assert_eq!(p.units[0].command, ["/bin/bash", "-c"]);
        assert_eq!(p.units[0].args, ["cd /src\npip install x\npython main.py"]);
    }

    #[test]
    fn mounts_use_resolved_claims() {
        let p = plan(
            "run: x\nvolumes:\n  /data: data\n  /ckpt: Scratch_Space\n",
            &[("data", "data-1a2b3c4d"), ("Scratch_Space", "Scratch_Space")],
        );
        let mounts = &p.units[0].mounts;
        let data = mounts.iter().find(|m| m.mount_path == "/data").unwrap();
        assert_eq!(data.claim_name, "data-1a2b3c4d");
        let scratch = mounts.iter().find(|m| m.mount_path == "/ckpt").unwrap();
        assert_eq!(scratch.claim_name, "Scratch_Space");
        assert!(is_dns_label(&scratch.name));
        assert_ne!(data.name, scratch.name);
    }

    #[test]
    fn pod_volume_names_never_collide_with_logical_names() {
        let p = plan(
            "run: x\nvolumes:\n  /a: A_x\n  /b: volume-0\n",
            &[("A_x", "A_x"), ("volume-0", "volume-0-1a2b3c4d")],
        );
        let mounts = &p.units[0].mounts;
        let a = mounts.iter().find(|m| m.mount_path == "/a").unwrap();
        let b = mounts.iter().find(|m| m.mount_path == "/b").unwrap();
        assert_eq!(a.claim_name, "A_x");
        assert_eq!(b.claim_name, "volume-0-1a2b3c4d");
        assert_ne!(a.name, b.name);
        assert!(is_dns_label(&a.name) && is_dns_label(&b.name));
    }

    #[test]
    fn shared_logical_volume_shares_one_pod_volume() {
        let p = plan(
            "run: x\nvolumes:\n  /in: data\n  /out: data\n",
            &[("data", "data-1a2b3c4d")],
        );
        let mounts = &p.units[0].mounts;
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].name, mounts[1].name);
        assert_eq!(mounts[0].claim_name, mounts[1].claim_name);
    }

    #[test]
    fn owner_label_is_sanitized() {
        let p = plan("run: x\n", &[]);
        assert_eq!(
            p.units[0].labels.get("owner").map(String::as_str),
            Some("alice-example.com")
        );
    }
}
