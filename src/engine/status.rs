// src/engine/status.rs

//! Status aggregation.
//!
//! A task's state is a pure function of the phases of its units:
//!
//! - `failed` if any unit failed, regardless of the others
//! - `completed` if every expected unit succeeded
//! - `running` if at least one unit is running
//! - `pending` otherwise
//!
//! Units that were expected (per the `num-nodes` annotation) but are not
//! observed count as pending.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cluster::UnitRecord;
use crate::labels::{NODE_IDX_LABEL, NUM_NODES_ANNOTATION, OWNER_LABEL, TASK_NAME_LABEL};
use crate::types::{TaskState, UnitPhase};

/// Number of units in each phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PhaseCounts {
    pub fn from_phases(phases: impl IntoIterator<Item = UnitPhase>) -> Self {
        let mut counts = PhaseCounts::default();
        for phase in phases {
            counts.add(phase);
        }
        counts
    }

    pub fn add(&mut self, phase: UnitPhase) {
        match phase {
            UnitPhase::Pending => self.pending += 1,
            UnitPhase::Running => self.running += 1,
            UnitPhase::Succeeded => self.succeeded += 1,
            UnitPhase::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed
    }
}

/// Reduce unit phase counts to a task state.
pub fn aggregate(counts: &PhaseCounts) -> TaskState {
    if counts.failed > 0 {
        TaskState::Failed
    } else if counts.total() > 0 && counts.succeeded == counts.total() {
        TaskState::Completed
    } else if counts.running > 0 {
        TaskState::Running
    } else {
        TaskState::Pending
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub name: Option<String>,
    pub status: TaskState,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub owner: Option<String>,
    pub metadata: TaskMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskMetadata {
    pub namespace: String,
    pub num_nodes: u32,
    /// Unit names ordered by node index.
    pub node_units: Vec<String>,
    pub pending_nodes: usize,
    pub running_nodes: usize,
    pub succeeded_nodes: usize,
    pub failed_nodes: usize,
}

/// Build a snapshot from the observed units of one task.
///
/// `units` must all carry the same `task-id`; the caller groups them.
pub fn snapshot(task_id: &str, units: &[UnitRecord], namespace: &str) -> TaskSnapshot {
    let mut ordered: Vec<&UnitRecord> = units.iter().collect();
    ordered.sort_by_key(|u| node_index(u).unwrap_or(u32::MAX));

    let observed = u32::try_from(units.len()).unwrap_or(u32::MAX);
    let num_nodes = declared_num_nodes(units).unwrap_or(observed).max(observed);

    let mut counts = PhaseCounts::from_phases(units.iter().map(|u| u.phase));
    counts.pending += (num_nodes - observed) as usize;

    let first = ordered.first();
    TaskSnapshot {
        task_id: task_id.to_string(),
        name: first.and_then(|u| u.labels.get(TASK_NAME_LABEL).cloned()),
        status: aggregate(&counts),
        created_at: units.iter().filter_map(|u| u.created_at).min(),
        updated_at: Utc::now(),
        owner: first.and_then(|u| u.labels.get(OWNER_LABEL).cloned()),
        metadata: TaskMetadata {
            namespace: namespace.to_string(),
            num_nodes,
            node_units: ordered.iter().map(|u| u.name.clone()).collect(),
            pending_nodes: counts.pending,
            running_nodes: counts.running,
            succeeded_nodes: counts.succeeded,
            failed_nodes: counts.failed,
        },
    }
}

/// Node count recorded at submission, if any unit carries it.
pub fn declared_num_nodes(units: &[UnitRecord]) -> Option<u32> {
    units
        .iter()
        .filter_map(|u| u.annotations.get(NUM_NODES_ANNOTATION))
        .find_map(|v| v.parse::<u32>().ok())
}

pub fn node_index(unit: &UnitRecord) -> Option<u32> {
    unit.labels.get(NODE_IDX_LABEL)?.parse().ok()
}

/// Group units by a label value, dropping units without it.
pub fn group_by_label(units: Vec<UnitRecord>, key: &str) -> BTreeMap<String, Vec<UnitRecord>> {
    let mut groups: BTreeMap<String, Vec<UnitRecord>> = BTreeMap::new();
    for unit in units {
        if let Some(value) = unit.labels.get(key).cloned() {
            groups.entry(value).or_default().push(unit);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: usize, running: usize, succeeded: usize, failed: usize) -> PhaseCounts {
        PhaseCounts {
            pending,
            running,
            succeeded,
            failed,
        }
    }

    fn unit(name: &str, idx: u32, phase: UnitPhase, num_nodes: u32) -> UnitRecord {
        UnitRecord {
            name: name.to_string(),
            labels: BTreeMap::from([
                (NODE_IDX_LABEL.to_string(), idx.to_string()),
                (TASK_NAME_LABEL.to_string(), "train".to_string()),
                (OWNER_LABEL.to_string(), "alice".to_string()),
            ]),
            annotations: BTreeMap::from([(
                NUM_NODES_ANNOTATION.to_string(),
                num_nodes.to_string(),
            )]),
            phase,
            created_at: None,
            claim_names: Vec::new(),
        }
    }

    #[test]
    fn failure_dominates() {
        assert_eq!(aggregate(&counts(0, 2, 0, 1)), TaskState::Failed);
        assert_eq!(aggregate(&counts(0, 0, 2, 1)), TaskState::Failed);
    }

    #[test]
    fn completed_requires_every_unit() {
        assert_eq!(aggregate(&counts(0, 0, 3, 0)), TaskState::Completed);
        assert_eq!(aggregate(&counts(1, 0, 2, 0)), TaskState::Pending);
        assert_eq!(aggregate(&counts(0, 1, 2, 0)), TaskState::Running);
    }

    #[test]
    fn nothing_started_is_pending() {
        assert_eq!(aggregate(&counts(2, 0, 0, 0)), TaskState::Pending);
        assert_eq!(aggregate(&PhaseCounts::default()), TaskState::Pending);
    }

    #[test]
    fn missing_units_count_as_pending() {
        // Two of three nodes visible, both succeeded.
        let units = vec![
            unit("train-abc-node-1", 1, UnitPhase::Succeeded, 3),
            unit("train-abc-node-0", 0, UnitPhase::Succeeded, 3),
        ];
        let snap = snapshot("abc", &units, "default");
        assert_eq!(snap.status, TaskState::Pending);
        assert_eq!(snap.metadata.pending_nodes, 1);
        assert_eq!(snap.metadata.num_nodes, 3);
        assert_eq!(
            snap.metadata.node_units,
            vec!["train-abc-node-0".to_string(), "train-abc-node-1".to_string()]
        );
    }

    #[test]
    fn snapshot_carries_name_and_owner() {
        let units = vec![unit("train-abc", 0, UnitPhase::Running, 1)];
        let snap = snapshot("abc", &units, "ml");
        assert_eq!(snap.name.as_deref(), Some("train"));
        assert_eq!(snap.owner.as_deref(), Some("alice"));
        assert_eq!(snap.metadata.namespace, "ml");
        assert_eq!(snap.status, TaskState::Running);
    }
}
