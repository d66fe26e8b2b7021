// src/resources.rs

//! Resource translator.
//!
//! Turns the per-node [`ResourcesSpec`] into the orchestrator's
//! request/limit representation:
//! - CPU and memory are set identically as request and limit.
//! - Accelerators become a limit on [`GPU_RESOURCE`] only.
//! - Unset CPU/memory are omitted, never defaulted to zero.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::task::{Accelerators, ResourcesSpec};
use crate::errors::{LaunchError, Result};

/// Conventional accelerator resource key.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Native request/limit maps (resource name -> quantity string).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

impl ResourceRequirements {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

pub fn translate(spec: &ResourcesSpec) -> Result<ResourceRequirements> {
    let mut out = ResourceRequirements::default();

    if let Some(cpu) = quantity(spec.cpus.as_deref()) {
        out.requests.insert("cpu".to_string(), cpu.clone());
        out.limits.insert("cpu".to_string(), cpu);
    }

    if let Some(memory) = quantity(spec.memory.as_deref()) {
        out.requests.insert("memory".to_string(), memory.clone());
        out.limits.insert("memory".to_string(), memory);
    }

    if let Some(acc) = spec.accelerators.as_ref() {
        let count = accelerator_count(acc)?;
        if count > 0 {
            out.limits.insert(GPU_RESOURCE.to_string(), count.to_string());
        }
    }

    let ignored = spec.ignored_fields();
    if !ignored.is_empty() {
        debug!(?ignored, "resource fields accepted but not translated");
    }

    Ok(out)
}

/// Container image for a task: `image_id` or the configured default.
pub fn resolve_image(spec: &ResourcesSpec, default_image: &str) -> String {
    spec.image_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_image)
        .to_string()
}

/// Trim and drop the "at least" `+` suffix (`4+` -> `4`).
fn quantity(raw: Option<&str>) -> Option<String> {
    let q = raw?.trim().trim_end_matches('+').trim();
    if q.is_empty() {
        None
    } else {
        Some(q.to_string())
    }
}

/// Number of accelerators requested.
///
/// `"V100:2"` -> 2, `"V100"` -> 1, `"2"` -> 2, `{V100: 2}` -> 2.
pub fn accelerator_count(acc: &Accelerators) -> Result<u32> {
    match acc {
        Accelerators::Count(n) => Ok(*n),
        Accelerators::Map(map) => map
            .values()
            .try_fold(0u32, |total, n| total.checked_add(*n))
            .ok_or_else(|| {
                LaunchError::ValidationError("accelerator counts overflow".to_string())
            }),
        Accelerators::Spec(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(0);
            }
            match s.rsplit_once(':') {
                Some((_, count)) => count.trim().parse::<u32>().map_err(|_| {
                    LaunchError::ValidationError(format!(
                        "invalid accelerator count in '{s}' (expected NAME:COUNT)"
                    ))
                }),
                None => Ok(s.parse::<u32>().unwrap_or(1)),
            }
        }
    }
}
