// src/engine/mod.rs

//! Job execution engine.
//!
//! This module ties together:
//! - the job orchestrator (submit / stop / list / status)
//! - the status aggregator that reduces unit phases to a task state
//! - the volume resolver and volume management
//! - the log stream coordinator that fans in per-node logs
//!
//! All cluster access goes through a [`ClusterBackend`], shared behind an
//! `Arc` so log workers can outlive the call that spawned them.

use std::sync::Arc;

use uuid::Uuid;

use crate::cluster::ClusterBackend;
use crate::config::EngineConfig;

pub mod logs;
pub mod orchestrator;
pub mod status;
pub mod volumes;

pub use logs::{LogEvent, LogLine, LogStream};
pub use orchestrator::{SubmitPlan, plan_submission};
pub use status::{PhaseCounts, TaskMetadata, TaskSnapshot, aggregate};
pub use volumes::{VolumeMetadata, VolumeSnapshot};

/// Length of generated task and volume ids.
pub const SHORT_ID_LEN: usize = 8;

/// Entry point for every engine operation.
pub struct Engine<C: ClusterBackend + 'static> {
    cluster: Arc<C>,
    config: EngineConfig,
}

impl<C: ClusterBackend + 'static> Engine<C> {
    pub fn new(cluster: C, config: EngineConfig) -> Self {
        Self::with_shared(Arc::new(cluster), config)
    }

    pub fn with_shared(cluster: Arc<C>, config: EngineConfig) -> Self {
        Self { cluster, config }
    }

    pub fn cluster(&self) -> &Arc<C> {
        &self.cluster
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// First 8 hex characters of a random v4 UUID.
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}
