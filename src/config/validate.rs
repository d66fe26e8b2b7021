// src/config/validate.rs

use std::sync::LazyLock;

use regex::Regex;

use crate::config::model::{EngineConfig, LogOptions, RawEngineConfig};
use crate::config::task::{RawTaskDefinition, RawVolumeDefinition, TaskDefinition, VolumeDefinition};
use crate::errors::{LaunchError, Result};
use crate::types::ACCESS_MODES;

/// DNS-1123 label: lowercase alphanumerics and `-`, alphanumeric at both ends.
static DNS_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

const MAX_NAME_LEN: usize = 63;

/// `-` + 8-char id.
const TASK_ID_SUFFIX_LEN: usize = 9;

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = LaunchError;

    fn try_from(raw: RawEngineConfig) -> std::result::Result<Self, Self::Error> {
        validate_engine_config(&raw)?;
        Ok(EngineConfig {
            namespace: raw.cluster.namespace,
            default_image: raw.task.default_image,
            logs: LogOptions::from(&raw.logs),
        })
    }
}

fn validate_engine_config(cfg: &RawEngineConfig) -> Result<()> {
    if !is_dns_label(&cfg.cluster.namespace) {
        return Err(config_error(format!(
            "[cluster].namespace '{}' is not a valid namespace name",
            cfg.cluster.namespace
        )));
    }

    if cfg.task.default_image.trim().is_empty() {
        return Err(config_error("[task].default_image must not be empty"));
    }

    if cfg.logs.schedule_timeout_secs == 0 {
        return Err(config_error("[logs].schedule_timeout_secs must be >= 1 (got 0)"));
    }
    if cfg.logs.poll_interval_ms == 0 {
        return Err(config_error("[logs].poll_interval_ms must be >= 1 (got 0)"));
    }
    if cfg.logs.channel_capacity == 0 {
        return Err(config_error("[logs].channel_capacity must be >= 1 (got 0)"));
    }

    Ok(())
}

impl TryFrom<RawTaskDefinition> for TaskDefinition {
    type Error = LaunchError;

    fn try_from(raw: RawTaskDefinition) -> std::result::Result<Self, Self::Error> {
        let run = validate_run(&raw)?;
        let num_nodes = validate_num_nodes(raw.num_nodes)?;
        if let Some(name) = raw.name.as_deref() {
            validate_task_name(name, num_nodes)?;
        }
        validate_volume_mounts(&raw)?;
        validate_envs(&raw)?;
        Ok(TaskDefinition::new_unchecked(raw, num_nodes, run))
    }
}

fn validate_run(raw: &RawTaskDefinition) -> Result<String> {
    match raw.run.as_deref() {
        Some(run) if !run.trim().is_empty() => Ok(run.to_string()),
        _ => Err(LaunchError::ValidationError(
            "task must define a non-empty `run` command".to_string(),
        )),
    }
}

fn validate_num_nodes(num_nodes: i64) -> Result<u32> {
    if num_nodes < 1 {
        return Err(LaunchError::ValidationError(format!(
            "num_nodes must be >= 1 (got {num_nodes})"
        )));
    }
    u32::try_from(num_nodes).map_err(|_| {
        LaunchError::ValidationError(format!("num_nodes {num_nodes} is out of range"))
    })
}

/// The name must survive as a unit name and label value:
/// `{name}-{id}` or `{name}-{id}-node-{N-1}`.
fn validate_task_name(name: &str, num_nodes: u32) -> Result<()> {
    if !is_dns_label(name) {
        return Err(LaunchError::ValidationError(format!(
            "task name '{name}' must consist of lowercase alphanumerics or '-', \
             and start and end with an alphanumeric character"
        )));
    }

    let node_suffix_len = if num_nodes > 1 {
        "-node-".len() + (num_nodes - 1).to_string().len()
    } else {
        0
    };
    let longest = name.len() + TASK_ID_SUFFIX_LEN + node_suffix_len;
    if longest > MAX_NAME_LEN {
        return Err(LaunchError::ValidationError(format!(
            "task name '{name}' is too long: generated unit names would be {longest} \
             characters (max {MAX_NAME_LEN})"
        )));
    }
    Ok(())
}

fn validate_volume_mounts(raw: &RawTaskDefinition) -> Result<()> {
    for (mount_path, volume) in raw.volumes.iter() {
        if !mount_path.starts_with('/') {
            return Err(LaunchError::ValidationError(format!(
                "volume mount path '{mount_path}' must be absolute"
            )));
        }
        if volume.trim().is_empty() {
            return Err(LaunchError::ValidationError(format!(
                "volume mount '{mount_path}' has an empty volume name"
            )));
        }
    }
    Ok(())
}

fn validate_envs(raw: &RawTaskDefinition) -> Result<()> {
    for reserved in ["NODE_RANK", "NUM_NODES"] {
        if raw.envs.contains_key(reserved) {
            return Err(LaunchError::ValidationError(format!(
                "environment variable {reserved} is set per node and cannot be overridden"
            )));
        }
    }
    Ok(())
}

impl TryFrom<RawVolumeDefinition> for VolumeDefinition {
    type Error = LaunchError;

    fn try_from(raw: RawVolumeDefinition) -> std::result::Result<Self, Self::Error> {
        // `{name}-{id}` is the claim name.
        if !is_dns_label(&raw.name) || raw.name.len() + TASK_ID_SUFFIX_LEN > MAX_NAME_LEN {
            return Err(LaunchError::ValidationError(format!(
                "volume name '{}' must be a DNS-1123 label of at most {} characters",
                raw.name,
                MAX_NAME_LEN - TASK_ID_SUFFIX_LEN
            )));
        }

        if raw.size.trim().is_empty() {
            return Err(LaunchError::ValidationError(format!(
                "volume '{}' must declare a size",
                raw.name
            )));
        }

        if raw.access_modes.is_empty() {
            return Err(LaunchError::ValidationError(format!(
                "volume '{}' must declare at least one access mode",
                raw.name
            )));
        }
        for mode in raw.access_modes.iter() {
            if !ACCESS_MODES.contains(&mode.as_str()) {
                return Err(LaunchError::ValidationError(format!(
                    "unknown access mode '{mode}' (expected one of {})",
                    ACCESS_MODES.join(", ")
                )));
            }
        }

        Ok(VolumeDefinition {
            name: raw.name,
            size: raw.size.trim().to_string(),
            storage_class: raw.storage_class.filter(|s| !s.trim().is_empty()),
            access_modes: raw.access_modes,
        })
    }
}

pub fn is_dns_label(s: &str) -> bool {
    s.len() <= MAX_NAME_LEN && DNS_LABEL_RE.is_match(s)
}

fn config_error(msg: impl Into<String>) -> LaunchError {
    LaunchError::ValidationError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_task(yaml: &str) -> RawTaskDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn missing_run_is_rejected() {
        let err = TaskDefinition::try_from(raw_task("name: a\n")).unwrap_err();
        assert!(err.to_string().contains("run"));
    }

    #[test]
    fn blank_run_is_rejected() {
        let err = TaskDefinition::try_from(raw_task("run: '   '\n")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn non_positive_num_nodes_is_rejected() {
        for n in [0, -3] {
            let err =
                TaskDefinition::try_from(raw_task(&format!("run: x\nnum_nodes: {n}\n"))).unwrap_err();
            assert!(err.to_string().contains("num_nodes"), "{err}");
        }
    }

    #[test]
    fn uppercase_task_name_is_rejected() {
        let err = TaskDefinition::try_from(raw_task("name: Train\nrun: x\n")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn long_name_accounts_for_node_suffix() {
        let name = "a".repeat(48);
        let single = format!("name: {name}\nrun: x\n");
        assert!(TaskDefinition::try_from(raw_task(&single)).is_ok());

        let multi = format!("name: {name}\nrun: x\nnum_nodes: 16\n");
        assert!(TaskDefinition::try_from(raw_task(&multi)).is_err());
    }

    #[test]
    fn relative_mount_path_is_rejected() {
        let err = TaskDefinition::try_from(raw_task("run: x\nvolumes:\n  data: vol\n")).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn reserved_env_is_rejected() {
        let err =
            TaskDefinition::try_from(raw_task("run: x\nenvs:\n  NODE_RANK: 3\n")).unwrap_err();
        assert!(err.to_string().contains("NODE_RANK"));
    }

    #[test]
    fn volume_access_modes_are_checked() {
        let mut raw = RawVolumeDefinition::new("data", "10Gi");
        raw.access_modes = vec!["ReadWriteSometimes".to_string()];
        assert!(VolumeDefinition::try_from(raw).is_err());

        let ok = VolumeDefinition::try_from(RawVolumeDefinition::new("data", "10Gi")).unwrap();
        assert_eq!(ok.access_modes, vec!["ReadWriteOnce".to_string()]);
    }

    #[test]
    fn zero_timeout_config_is_rejected() {
        let mut raw = RawEngineConfig::default();
        raw.logs.schedule_timeout_secs = 0;
        assert!(EngineConfig::try_from(raw).is_err());
    }
}
