use std::time::Duration;

use kubelaunch::cluster::InMemoryCluster;
use kubelaunch::config::{EngineConfig, LogOptions};
use kubelaunch::engine::Engine;
use kubelaunch::labels::Owner;

/// Engine config with log timeouts short enough for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        namespace: "kubelaunch-test".to_string(),
        default_image: "python:3.13-slim".to_string(),
        logs: LogOptions {
            schedule_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            channel_capacity: 16,
        },
    }
}

/// An engine over a fresh in-memory cluster, plus a handle to that cluster.
pub fn engine() -> (Engine<InMemoryCluster>, InMemoryCluster) {
    engine_on(InMemoryCluster::new())
}

pub fn engine_on(cluster: InMemoryCluster) -> (Engine<InMemoryCluster>, InMemoryCluster) {
    (Engine::new(cluster.clone(), test_config()), cluster)
}

pub fn owner(name: &str) -> Owner {
    Owner::new(name).expect("valid owner")
}
