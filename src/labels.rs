// src/labels.rs

//! Label and isolation scheme.
//!
//! Every resource the engine creates is stamped with a kind marker
//! (`type=task` / `type=volume`), its identity labels and the sanitized
//! `owner`. Queries are exact-match selectors built from the same keys.
//!
//! Owner scoping is explicit: callers pass an [`OwnerScope`], and only
//! [`OwnerScope::AllOwners`] drops the owner clause.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{LaunchError, Result};

pub const TYPE_LABEL: &str = "type";
pub const TASK_KIND: &str = "task";
pub const VOLUME_KIND: &str = "volume";

pub const TASK_ID_LABEL: &str = "task-id";
pub const TASK_NAME_LABEL: &str = "task-name";
pub const NODE_IDX_LABEL: &str = "node-idx";
pub const OWNER_LABEL: &str = "owner";

pub const VOLUME_ID_LABEL: &str = "volume-id";
pub const VOLUME_NAME_LABEL: &str = "volume-name";

pub const CREATED_AT_ANNOTATION: &str = "created-at";
pub const NUM_NODES_ANNOTATION: &str = "num-nodes";

/// Kubernetes label value grammar (max 63 chars checked separately).
static LABEL_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").unwrap());

const MAX_LABEL_VALUE_LEN: usize = 63;

/// Replace every character the label grammar rejects (notably `@`) with `-`.
///
/// `first.last@domain.com` becomes `first.last-domain.com`.
pub fn sanitize_label_value(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

pub fn is_valid_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_VALUE_LEN && LABEL_VALUE_RE.is_match(value)
}

/// A caller identity, already sanitized for use as a label value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    raw: String,
    label: String,
}

impl Owner {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LaunchError::ValidationError(
                "owner identity must not be empty".to_string(),
            ));
        }

        let label = sanitize_label_value(trimmed);
        if !is_valid_label_value(&label) {
            return Err(LaunchError::ValidationError(format!(
                "owner '{trimmed}' cannot be expressed as a label value (got '{label}')"
            )));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            label,
        })
    }

    /// The identity as given by the caller.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The sanitized value stored in the `owner` label.
    pub fn label_value(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Visibility scope of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerScope {
    Owner(Owner),
    /// Admin-style query over every owner.
    AllOwners,
}

impl OwnerScope {
    pub fn owner(owner: &Owner) -> Self {
        OwnerScope::Owner(owner.clone())
    }

    pub fn for_caller(owner: &Owner, all_owners: bool) -> Self {
        if all_owners {
            OwnerScope::AllOwners
        } else {
            OwnerScope::Owner(owner.clone())
        }
    }
}

impl From<Owner> for OwnerScope {
    fn from(owner: Owner) -> Self {
        OwnerScope::Owner(owner)
    }
}

impl From<&Owner> for OwnerScope {
    fn from(owner: &Owner) -> Self {
        OwnerScope::Owner(owner.clone())
    }
}

/// Exact-match (`k=v,k2=v2`) label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    terms: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: &str, value: impl Into<String>) -> Self {
        self.terms.insert(key.to_string(), value.into());
        self
    }

    /// Add the owner clause unless the scope spans all owners.
    pub fn scoped(self, scope: &OwnerScope) -> Self {
        match scope {
            OwnerScope::Owner(owner) => self.eq(OWNER_LABEL, owner.label_value()),
            OwnerScope::AllOwners => self,
        }
    }

    /// Selector over all task units visible in `scope`.
    pub fn tasks(scope: &OwnerScope) -> Self {
        Self::new().eq(TYPE_LABEL, TASK_KIND).scoped(scope)
    }

    /// Selector over the units of one task.
    pub fn task(task_id: &str, scope: &OwnerScope) -> Self {
        Self::tasks(scope).eq(TASK_ID_LABEL, task_id)
    }

    /// Selector over all volumes visible in `scope`.
    pub fn volumes(scope: &OwnerScope) -> Self {
        Self::new().eq(TYPE_LABEL, VOLUME_KIND).scoped(scope)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.terms.get(key).map(String::as_str)
    }

    /// True when every value is a legal label value the API server accepts.
    pub fn is_well_formed(&self) -> bool {
        self.terms.values().all(|v| is_valid_label_value(v))
    }

    /// True when every term is present with the same value in `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.terms {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Labels stamped on an execution unit (and its pod template).
pub fn unit_labels(
    task_id: &str,
    task_name: &str,
    owner: &Owner,
    node_idx: u32,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TYPE_LABEL.to_string(), TASK_KIND.to_string()),
        (TASK_ID_LABEL.to_string(), task_id.to_string()),
        (TASK_NAME_LABEL.to_string(), task_name.to_string()),
        (OWNER_LABEL.to_string(), owner.label_value().to_string()),
        (NODE_IDX_LABEL.to_string(), node_idx.to_string()),
    ])
}

/// Labels stamped on a volume's storage claim.
pub fn volume_labels(volume_id: &str, volume_name: &str, owner: &Owner) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TYPE_LABEL.to_string(), VOLUME_KIND.to_string()),
        (VOLUME_ID_LABEL.to_string(), volume_id.to_string()),
        (VOLUME_NAME_LABEL.to_string(), volume_name.to_string()),
        (OWNER_LABEL.to_string(), owner.label_value().to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_at_sign() {
        let owner = Owner::new("first.last@domain.com").unwrap();
        assert_eq!(owner.label_value(), "first.last-domain.com");
        assert_eq!(owner.raw(), "first.last@domain.com");
    }

    #[test]
    fn empty_owner_is_rejected() {
        assert!(Owner::new("   ").unwrap_err().is_validation());
    }

    #[test]
    fn owner_that_cannot_become_a_label_is_rejected() {
        assert!(Owner::new("@alice").is_err());
        assert!(Owner::new("a".repeat(64)).is_err());
    }

    #[test]
    fn owner_scope_adds_owner_clause() {
        let owner = Owner::new("bob@example.org").unwrap();
        let sel = LabelSelector::tasks(&OwnerScope::owner(&owner));
        assert_eq!(sel.to_string(), "owner=bob-example.org,type=task");
    }

    #[test]
    fn all_owners_scope_omits_owner_clause() {
        let sel = LabelSelector::task("abcd1234", &OwnerScope::AllOwners);
        assert_eq!(sel.to_string(), "task-id=abcd1234,type=task");
        assert!(sel.get(OWNER_LABEL).is_none());
    }

    #[test]
    fn selector_matches_requires_every_term() {
        let owner = Owner::new("carol").unwrap();
        let labels = unit_labels("abcd1234", "train", &owner, 2);
        assert!(LabelSelector::task("abcd1234", &OwnerScope::owner(&owner)).matches(&labels));

        let other = Owner::new("dave").unwrap();
        assert!(!LabelSelector::task("abcd1234", &OwnerScope::owner(&other)).matches(&labels));
        assert!(!LabelSelector::volumes(&OwnerScope::AllOwners).matches(&labels));
    }
}
