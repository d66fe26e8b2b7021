#![allow(dead_code)]

use std::error::Error;

pub use kubelaunch_test_utils::builders::{TaskDefinitionBuilder, VolumeDefinitionBuilder, labels};
pub use kubelaunch_test_utils::fixture::{engine, engine_on, owner, test_config};
pub use kubelaunch_test_utils::{eventually, init_tracing, with_timeout};

use kubelaunch::cluster::UnitSpec;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Value of an environment variable injected into a unit.
pub fn env_of<'a>(unit: &'a UnitSpec, name: &str) -> Option<&'a str> {
    unit.env
        .iter()
        .find(|e| e.name == name)
        .map(|e| e.value.as_str())
}

/// Units of one task, ordered by node index.
pub fn units_of(all: Vec<UnitSpec>, task_id: &str) -> Vec<UnitSpec> {
    let mut units: Vec<UnitSpec> = all
        .into_iter()
        .filter(|u| u.labels.get("task-id").map(String::as_str) == Some(task_id))
        .collect();
    units.sort_by_key(|u| u.node_idx);
    units
}
