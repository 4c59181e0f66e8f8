use std::collections::BTreeMap;
use std::sync::Arc;

use fm_infra::Provisioner;
use fm_infra::retry::{RetryPolicy, retry};
use fm_infra::types::{Instance, InstanceFilter};

use crate::template::Formation;
use crate::{Error, Result};

/// Live formation instances keyed by machine name. Rebuilt on every query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    instances: BTreeMap<String, Instance>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    /// The instance for `name`, or `UnknownMachine`.
    pub fn require(&self, name: &str) -> Result<&Instance> {
        self.get(name)
            .ok_or_else(|| Error::UnknownMachine(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    pub fn instances(&self) -> &BTreeMap<String, Instance> {
        &self.instances
    }

    pub fn into_instances(self) -> BTreeMap<String, Instance> {
        self.instances
    }
}

impl FromIterator<Instance> for Registry {
    fn from_iter<T: IntoIterator<Item = Instance>>(iter: T) -> Self {
        let mut instances = BTreeMap::new();
        for instance in iter {
            instances.entry(instance.name.clone()).or_insert(instance);
        }
        Self { instances }
    }
}

/// Resolves the [`Registry`] from the provisioning collaborator.
#[derive(Clone)]
pub struct Discovery {
    provisioner: Arc<dyn Provisioner>,
    retry: RetryPolicy,
}

impl Discovery {
    pub fn new(provisioner: Arc<dyn Provisioner>, retry: RetryPolicy) -> Self {
        Self { provisioner, retry }
    }

    /// Running instances whose names the formation declares. Transient
    /// failures, including instances still waiting for an address, are
    /// retried up to the policy's ceiling.
    pub async fn resolve(&self, formation: &Formation) -> Result<Registry> {
        retry(self.retry, "instance discovery", |attempt| self.load(formation, attempt))
            .await
            .map_err(|e| Error::Discovery {
                attempts: e.attempts,
                source: e.last,
            })
    }

    async fn load(&self, formation: &Formation, attempt: u32) -> fm_infra::Result<Registry> {
        let running = self.provisioner.find(&InstanceFilter::all().running()).await?;

        let mut instances = BTreeMap::new();
        for instance in running {
            if !formation.is_declared(&instance.name) {
                continue;
            }
            if instance.address().is_none() {
                return Err(fm_infra::Error::MissingAddress {
                    instance: instance.name.clone(),
                });
            }
            if let Some(kept) = instances.get(&instance.name) {
                let kept: &Instance = kept;
                tracing::warn!(
                    machine = %instance.name,
                    kept = %kept.id,
                    ignored = %instance.id,
                    "duplicate live instances for one machine"
                );
                continue;
            }
            instances.insert(instance.name.clone(), instance);
        }

        tracing::debug!(attempt, live = instances.len(), "instances resolved");
        Ok(Registry { instances })
    }
}
