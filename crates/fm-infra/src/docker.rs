use async_trait::async_trait;
use docker_api::{CreateContainerRequest, DockerClient};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::entities::{DOCKER_CONTAINER, DOCKER_LAUNCH, DOCKER_REGION_LABEL, DOCKER_TYPE_LABEL};
use crate::mapper::Entity;
use crate::types::{Instance, InstanceFilter, InstanceId, InstanceState, LaunchSpec};
use crate::{Error, Provisioner, Result};

/// Label marking containers created by a formation.
pub const MANAGED_LABEL: &str = "formation.managed";

const SSH_PORT: &str = "22/tcp";

/// Docker Engine provisioner: every machine is a labelled container with
/// port 22 published on the host.
///
/// Delegates to `docker_api::DockerClient` for all HTTP calls.
pub struct DockerProvisioner {
    client: DockerClient,
    image: String,
    publish_ip: String,
}

impl DockerProvisioner {
    /// Create from env vars: `DOCKER_HOST` (default `tcp://127.0.0.1:2375`),
    /// `FORMATION_DOCKER_IMAGE`, `FORMATION_DOCKER_PUBLISH_IP`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let host = std::env::var("DOCKER_HOST").unwrap_or_else(|_| "tcp://127.0.0.1:2375".into());
        let image = std::env::var("FORMATION_DOCKER_IMAGE")
            .unwrap_or_else(|_| "rastasheep/ubuntu-sshd:16.04".into());
        let publish_ip =
            std::env::var("FORMATION_DOCKER_PUBLISH_IP").unwrap_or_else(|_| "127.0.0.1".into());

        Ok(Self::new(DockerClient::new(&host)?, image, publish_ip))
    }

    pub fn new(client: DockerClient, image: impl Into<String>, publish_ip: impl Into<String>) -> Self {
        Self {
            client,
            image: image.into(),
            publish_ip: publish_ip.into(),
        }
    }

    pub fn client(&self) -> &DockerClient {
        &self.client
    }

    /// Project the launch spec onto a container create body through
    /// [`DOCKER_LAUNCH`].
    fn create_request(&self, spec: &LaunchSpec) -> Result<CreateContainerRequest> {
        let mut labels: Map<String, Value> = spec
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        labels.insert(MANAGED_LABEL.into(), "true".into());
        labels.insert(DOCKER_TYPE_LABEL.into(), spec.instance_type.clone().into());
        labels.insert(DOCKER_REGION_LABEL.into(), spec.region.clone().into());

        let env: Vec<Value> = spec
            .extra
            .get("env")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .map(|(k, v)| match v.as_str() {
                Some(s) => Value::String(format!("{k}={s}")),
                None => Value::String(format!("{k}={v}")),
            })
            .collect();

        let launch: Entity = [
            ("image", json!(spec.image.as_deref().unwrap_or(&self.image))),
            ("tags", Value::Object(labels)),
            ("env", Value::Array(env)),
            ("cmd", spec.extra.get("cmd").cloned().unwrap_or(Value::Null)),
            ("exposedPorts", json!({ SSH_PORT: {} })),
            (
                "portBindings",
                json!({ SSH_PORT: [{ "HostIp": self.publish_ip, "HostPort": "" }] }),
            ),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        serde_json::from_value(DOCKER_LAUNCH.unmap_record(&launch)).map_err(|e| Error::Decode {
            entity: DOCKER_LAUNCH.entity,
            reason: e.to_string(),
        })
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let records = self
            .client
            .list_containers(true, &[format!("{MANAGED_LABEL}=true")])
            .await?;

        DOCKER_CONTAINER
            .map(&Value::Array(records))?
            .into_vec()
            .into_iter()
            .map(Instance::from_entity)
            .collect()
    }
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    async fn create(&self, spec: &LaunchSpec) -> Result<Instance> {
        let created = self
            .client
            .create_container(&spec.name, &self.create_request(spec)?)
            .await?;
        for warning in created.warnings.iter().flatten() {
            tracing::warn!(container_id = %created.id, "docker: {warning}");
        }

        self.client.start_container(&created.id).await?;
        info!(container_id = %created.id, name = %spec.name, "docker: container created");

        self.by_id(&InstanceId(created.id)).await
    }

    async fn find(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|instance| instance.matches(filter))
            .collect())
    }

    async fn start(&self, id: &InstanceId) -> Result<Instance> {
        self.client.start_container(&id.0).await?;
        info!(container_id = %id, "docker: container started");
        self.by_id(id).await
    }

    async fn stop(&self, id: &InstanceId) -> Result<Instance> {
        self.client.stop_container(&id.0, Some(10)).await?;
        info!(container_id = %id, "docker: container stopped");
        self.by_id(id).await
    }

    async fn terminate(&self, id: &InstanceId) -> Result<Instance> {
        let mut instance = self.by_id(id).await?;
        self.client.remove_container(&id.0).await?;
        info!(container_id = %id, name = %instance.name, "docker: container removed");
        // Removed containers drop out of listings; report the last known
        // record in its final state.
        instance.state = InstanceState::Terminated;
        Ok(instance)
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn provisioner() -> DockerProvisioner {
        let client = DockerClient::new("tcp://127.0.0.1:2375").unwrap();
        DockerProvisioner::new(client, "ubuntu:24.04", "127.0.0.1")
    }

    #[test]
    fn create_request_carries_formation_labels() {
        let spec = LaunchSpec {
            name: "db0".into(),
            instance_type: "t2.small".into(),
            region: "us-east-1".into(),
            tags: BTreeMap::from([("team".to_string(), "data".to_string())]),
            ..Default::default()
        };
        let req = provisioner().create_request(&spec).unwrap();

        assert_eq!(req.image, "ubuntu:24.04");
        assert_eq!(req.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(req.labels.get(DOCKER_TYPE_LABEL).map(String::as_str), Some("t2.small"));
        assert_eq!(req.labels.get("team").map(String::as_str), Some("data"));
        assert!(req.exposed_ports.contains_key(SSH_PORT));
        assert_eq!(req.cmd, None);

        let host_config = req.host_config.unwrap();
        let bindings = &host_config.port_bindings[SSH_PORT];
        assert_eq!(bindings[0].host_ip, "127.0.0.1");
        assert_eq!(bindings[0].host_port, "");
    }

    #[test]
    fn spec_image_and_env_override_defaults() {
        let mut extra = Map::new();
        extra.insert("env".into(), json!({ "ROLE": "manager", "SLOTS": 4 }));
        extra.insert("cmd".into(), json!(["/usr/sbin/sshd", "-D"]));
        let spec = LaunchSpec {
            name: "web".into(),
            image: Some("alpine:3".into()),
            extra,
            ..Default::default()
        };
        let req = provisioner().create_request(&spec).unwrap();

        assert_eq!(req.image, "alpine:3");
        assert_eq!(req.cmd, Some(vec!["/usr/sbin/sshd".to_string(), "-D".to_string()]));
        assert!(req.env.contains(&"ROLE=manager".to_string()));
        assert!(req.env.contains(&"SLOTS=4".to_string()));
    }
}
