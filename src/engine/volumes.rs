// src/engine/volumes.rs

//! Volume resolver and volume management.
//!
//! A volume is a storage claim named `{name}-{id}` and labelled with
//! `type=volume`, its id, its logical name and its owner. Tasks refer to
//! volumes by logical name; [`Engine::resolve_volume`] maps that name to
//! the concrete claim for one owner.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cluster::{ClaimRecord, ClaimSpec, ClusterBackend};
use crate::config::{TaskDefinition, VolumeDefinition};
use crate::engine::{Engine, short_id};
use crate::errors::{LaunchError, Result};
use crate::labels::{
    CREATED_AT_ANNOTATION, LabelSelector, OWNER_LABEL, Owner, OwnerScope, VOLUME_ID_LABEL,
    VOLUME_NAME_LABEL, is_valid_label_value, volume_labels,
};

/// Point-in-time view of a volume.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeSnapshot {
    pub volume_id: String,
    pub name: String,
    pub size: Option<String>,
    pub storage_class: Option<String>,
    pub access_modes: Vec<String>,
    /// Claim phase (`Pending`, `Bound`, `Lost`).
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub metadata: VolumeMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeMetadata {
    pub claim_name: String,
    pub namespace: String,
}

impl VolumeSnapshot {
    fn from_claim(claim: ClaimRecord, namespace: &str) -> Self {
        let label = |key: &str| claim.labels.get(key).cloned();
        VolumeSnapshot {
            volume_id: label(VOLUME_ID_LABEL).unwrap_or_default(),
            name: label(VOLUME_NAME_LABEL).unwrap_or_default(),
            size: claim.size.clone(),
            storage_class: claim.storage_class.clone(),
            access_modes: claim.access_modes.clone(),
            status: claim.phase.clone(),
            created_at: claim.created_at,
            owner: label(OWNER_LABEL),
            metadata: VolumeMetadata {
                claim_name: claim.name,
                namespace: namespace.to_string(),
            },
        }
    }
}

impl<C: ClusterBackend + 'static> Engine<C> {
    /// Map a logical volume name to a concrete claim name for `owner`.
    ///
    /// With no matching volume the logical name is returned unchanged and
    /// treated as a literal, pre-existing claim name. More than one match
    /// is rejected.
    pub async fn resolve_volume(&self, logical_name: &str, owner: &Owner) -> Result<String> {
        let matches = self.volumes_named(logical_name, owner).await?;
        match matches.as_slice() {
            [] => {
                debug!(volume = logical_name, "no managed volume; using name as claim");
                Ok(logical_name.to_string())
            }
            [claim] => Ok(claim.name.clone()),
            many => Err(LaunchError::ValidationError(format!(
                "volume name '{logical_name}' is ambiguous: {} claims match ({})",
                many.len(),
                many.iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Resolve every distinct logical volume a task mounts, once each.
    pub async fn resolve_mounts(
        &self,
        task: &TaskDefinition,
        owner: &Owner,
    ) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for logical in task.volumes.values() {
            if resolved.contains_key(logical) {
                continue;
            }
            let claim = self.resolve_volume(logical, owner).await?;
            resolved.insert(logical.clone(), claim);
        }
        Ok(resolved)
    }

    /// Create a volume and return its id.
    pub async fn create_volume(&self, volume: &VolumeDefinition, owner: &Owner) -> Result<String> {
        if !self.volumes_named(&volume.name, owner).await?.is_empty() {
            return Err(LaunchError::ValidationError(format!(
                "volume '{}' already exists for {owner}",
                volume.name
            )));
        }

        let volume_id = short_id();
        let claim = ClaimSpec {
            name: format!("{}-{volume_id}", volume.name),
            labels: volume_labels(&volume_id, &volume.name, owner),
            annotations: BTreeMap::from([(
                CREATED_AT_ANNOTATION.to_string(),
                Utc::now().to_rfc3339(),
            )]),
            size: volume.size.clone(),
            storage_class: volume.storage_class.clone(),
            access_modes: volume.access_modes.clone(),
        };

        self.cluster.create_claim(&claim).await?;
        info!(volume_id = %volume_id, claim = %claim.name, size = %volume.size, "volume created");
        Ok(volume_id)
    }

    /// Volumes visible in `scope`, newest first.
    pub async fn list_volumes(&self, scope: &OwnerScope) -> Result<Vec<VolumeSnapshot>> {
        let claims = self.cluster.list_claims(&LabelSelector::volumes(scope)).await?;
        let mut out: Vec<VolumeSnapshot> = claims
            .into_iter()
            .map(|c| VolumeSnapshot::from_claim(c, &self.config.namespace))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub async fn volume_status(&self, volume_id: &str, owner: &Owner) -> Result<VolumeSnapshot> {
        let claim = self.find_volume(volume_id, owner).await?;
        Ok(VolumeSnapshot::from_claim(claim, &self.config.namespace))
    }

    /// Delete a volume owned by `owner`.
    ///
    /// Refused with [`LaunchError::VolumeInUse`] while a pending or running
    /// unit of any owner mounts the claim.
    pub async fn delete_volume(&self, volume_id: &str, owner: &Owner) -> Result<()> {
        let claim = self.find_volume(volume_id, owner).await?;

        let users: Vec<String> = self
            .cluster
            .list_units(&LabelSelector::tasks(&OwnerScope::AllOwners))
            .await?
            .into_iter()
            .filter(|u| u.phase.is_live() && u.claim_names.contains(&claim.name))
            .map(|u| u.name)
            .collect();
        if !users.is_empty() {
            warn!(volume_id, claim = %claim.name, ?users, "refusing to delete mounted volume");
            return Err(LaunchError::VolumeInUse {
                volume: volume_id.to_string(),
                users,
            });
        }

        if self.cluster.delete_claim(&claim.name).await? {
            info!(volume_id, claim = %claim.name, "volume deleted");
        } else {
            debug!(volume_id, claim = %claim.name, "claim already gone");
        }
        Ok(())
    }

    async fn find_volume(&self, volume_id: &str, owner: &Owner) -> Result<ClaimRecord> {
        if !is_valid_label_value(volume_id) {
            return Err(LaunchError::not_found("volume", volume_id));
        }
        let selector = LabelSelector::volumes(&OwnerScope::owner(owner)).eq(VOLUME_ID_LABEL, volume_id);
        self.cluster
            .list_claims(&selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LaunchError::not_found("volume", volume_id))
    }

    async fn volumes_named(&self, logical_name: &str, owner: &Owner) -> Result<Vec<ClaimRecord>> {
        // A name that cannot be a label value cannot match a managed volume.
        if !is_valid_label_value(logical_name) {
            return Ok(Vec::new());
        }
        let selector =
            LabelSelector::volumes(&OwnerScope::owner(owner)).eq(VOLUME_NAME_LABEL, logical_name);
        self.cluster.list_claims(&selector).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::config::{EngineConfig, RawVolumeDefinition};

    fn engine() -> Engine<InMemoryCluster> {
        Engine::new(InMemoryCluster::new(), EngineConfig::default())
    }

    fn volume(name: &str) -> VolumeDefinition {
        VolumeDefinition::try_from(RawVolumeDefinition::new(name, "10Gi")).unwrap()
    }

    #[tokio::test]
    async fn created_volume_resolves_for_its_owner_only() {
        let engine = engine();
        let alice = Owner::new("alice").unwrap();
        let bob = Owner::new("bob").unwrap();

        let id = engine.create_volume(&volume("data"), &alice).await.unwrap();
        assert_eq!(engine.resolve_volume("data", &alice).await.unwrap(), format!("data-{id}"));
        assert_eq!(engine.resolve_volume("data", &bob).await.unwrap(), "data");
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let engine = engine();
        let alice = Owner::new("alice").unwrap();
        engine.create_volume(&volume("data"), &alice).await.unwrap();
        let err = engine.create_volume(&volume("data"), &alice).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn unknown_volume_is_not_found() {
        let engine = engine();
        let alice = Owner::new("alice").unwrap();
        assert!(engine.volume_status("nope1234", &alice).await.unwrap_err().is_not_found());
        assert!(engine.delete_volume("nope1234", &alice).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn resolving_a_path_like_name_is_literal() {
        let engine = engine();
        let alice = Owner::new("alice").unwrap();
        assert_eq!(engine.resolve_volume("my/claim", &alice).await.unwrap(), "my/claim");
    }
}
