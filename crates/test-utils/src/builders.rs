use std::collections::BTreeMap;

use kubelaunch::config::{
    Accelerators, RawTaskDefinition, RawVolumeDefinition, ResourcesSpec, TaskDefinition,
    VolumeDefinition,
};

/// Builder for `TaskDefinition` to simplify test setup.
pub struct TaskDefinitionBuilder {
    raw: RawTaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new(run: &str) -> Self {
        Self {
            raw: RawTaskDefinition {
                num_nodes: 1,
                run: Some(run.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.raw.name = Some(name.to_string());
        self
    }

    pub fn num_nodes(mut self, n: i64) -> Self {
        self.raw.num_nodes = n;
        self
    }

    pub fn workdir(mut self, dir: &str) -> Self {
        self.raw.workdir = Some(dir.to_string());
        self
    }

    pub fn setup(mut self, script: &str) -> Self {
        self.raw.setup = Some(script.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.raw.envs.insert(key.to_string(), value.to_string());
        self
    }

    /// Mount the logical volume `volume` at `path`.
    pub fn volume(mut self, path: &str, volume: &str) -> Self {
        self.raw.volumes.insert(path.to_string(), volume.to_string());
        self
    }

    pub fn cpus(mut self, cpus: &str) -> Self {
        self.resources().cpus = Some(cpus.to_string());
        self
    }

    pub fn memory(mut self, memory: &str) -> Self {
        self.resources().memory = Some(memory.to_string());
        self
    }

    pub fn accelerators(mut self, spec: &str) -> Self {
        self.resources().accelerators = Some(Accelerators::Spec(spec.to_string()));
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.resources().image_id = Some(image.to_string());
        self
    }

    fn resources(&mut self) -> &mut ResourcesSpec {
        self.raw.resources.get_or_insert_with(ResourcesSpec::default)
    }

    pub fn raw(self) -> RawTaskDefinition {
        self.raw
    }

    pub fn try_build(self) -> anyhow::Result<TaskDefinition> {
        Ok(TaskDefinition::try_from(self.raw)?)
    }

    pub fn build(self) -> TaskDefinition {
        self.try_build()
            .expect("Failed to build valid task from builder")
    }
}

/// Builder for `VolumeDefinition`.
pub struct VolumeDefinitionBuilder {
    raw: RawVolumeDefinition,
}

impl VolumeDefinitionBuilder {
    pub fn new(name: &str, size: &str) -> Self {
        Self {
            raw: RawVolumeDefinition::new(name, size),
        }
    }

    pub fn storage_class(mut self, class: &str) -> Self {
        self.raw.storage_class = Some(class.to_string());
        self
    }

    pub fn access_modes(mut self, modes: &[&str]) -> Self {
        self.raw.access_modes = modes.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn build(self) -> VolumeDefinition {
        VolumeDefinition::try_from(self.raw).expect("Failed to build valid volume from builder")
    }
}

/// Labels as a map, for hand-made pods and claims.
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
