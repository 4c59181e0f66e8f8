//! Mapping tables for the Docker records the provisioner reads and writes.

use chrono::DateTime;
use serde_json::Value;

use crate::mapper::{Mapping, derived, path};

/// Label carrying the formation machine type on Docker containers.
pub const DOCKER_TYPE_LABEL: &str = "formation.type";
/// Label carrying the formation region on Docker containers.
pub const DOCKER_REGION_LABEL: &str = "formation.region";

/// Docker Engine `GET /containers/json` summary record.
pub static DOCKER_CONTAINER: Mapping = Mapping {
    entity: "docker container",
    fields: &[
        path("id", "Id"),
        path("imageId", "ImageID"),
        path("state", "State"),
        derived("name", container_name),
        derived("ip", container_ip),
        derived("type", container_type),
        derived("region", container_region),
        derived("sshHost", ssh_host),
        derived("sshPort", ssh_port),
        path("tags", "Labels"),
        derived("launchedAt", created_at),
    ],
};

/// Canonical launch fields projected onto a `POST /containers/create` body
/// with [`Mapping::unmap_record`](crate::mapper::Mapping::unmap_record).
pub static DOCKER_LAUNCH: Mapping = Mapping {
    entity: "docker launch",
    fields: &[
        path("image", "Image"),
        path("tags", "Labels"),
        path("env", "Env"),
        path("cmd", "Cmd"),
        path("exposedPorts", "ExposedPorts"),
        path("portBindings", "HostConfig.PortBindings"),
    ],
};

fn label(record: &Value, key: &str) -> Value {
    record
        .get("Labels")
        .and_then(|labels| labels.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

fn container_type(record: &Value) -> Value {
    label(record, DOCKER_TYPE_LABEL)
}

fn container_region(record: &Value) -> Value {
    match label(record, DOCKER_REGION_LABEL) {
        Value::Null => Value::String("local".into()),
        region => region,
    }
}

fn container_name(record: &Value) -> Value {
    record
        .get("Names")
        .and_then(|names| names.get(0))
        .and_then(Value::as_str)
        .map(|name| Value::String(name.trim_start_matches('/').into()))
        .unwrap_or(Value::Null)
}

/// First network address the daemon reports, else loopback (published ports
/// are reachable there).
fn container_ip(record: &Value) -> Value {
    record
        .pointer("/NetworkSettings/Networks")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|networks| networks.values())
        .filter_map(|net| net.get("IPAddress").and_then(Value::as_str))
        .find(|ip| !ip.is_empty())
        .map(|ip| Value::String(ip.into()))
        .unwrap_or_else(|| Value::String("127.0.0.1".into()))
}

fn ssh_binding(record: &Value) -> Option<&Value> {
    record
        .get("Ports")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|port| port.get("PublicPort").is_some_and(|p| !p.is_null()))
        .find(|port| port.get("PrivatePort").and_then(Value::as_u64) == Some(22))
}

/// Host address of the published port 22. Wildcard binds are reached over
/// loopback.
fn ssh_host(record: &Value) -> Value {
    let Some(binding) = ssh_binding(record) else {
        return Value::Null;
    };
    match binding.get("IP").and_then(Value::as_str) {
        Some(ip) if !ip.is_empty() && ip != "0.0.0.0" && ip != "::" => Value::String(ip.into()),
        _ => Value::String("127.0.0.1".into()),
    }
}

fn ssh_port(record: &Value) -> Value {
    ssh_binding(record)
        .and_then(|port| port.get("PublicPort"))
        .cloned()
        .unwrap_or(Value::Null)
}

fn created_at(record: &Value) -> Value {
    record
        .get("Created")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|at| Value::String(at.to_rfc3339()))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Instance, InstanceState};
    use serde_json::json;

    fn container() -> Value {
        json!({
            "Id": "c0ffee",
            "Names": ["/db0"],
            "ImageID": "sha256:abc",
            "State": "running",
            "Created": 1492689600,
            "Labels": { "formation.type": "t2.small", "formation.managed": "true" },
            "Ports": [{ "IP": "0.0.0.0", "PrivatePort": 22, "PublicPort": 32768, "Type": "tcp" }],
            "NetworkSettings": { "Networks": { "bridge": { "IPAddress": "172.17.0.3" } } },
        })
    }

    #[test]
    fn docker_container_maps_to_instance() {
        let entity = DOCKER_CONTAINER.map_record(&container()).unwrap();
        let instance = Instance::from_entity(entity).unwrap();
        assert_eq!(instance.name, "db0");
        assert_eq!(instance.state, InstanceState::Running);
        assert_eq!(instance.ip.as_deref(), Some("172.17.0.3"));
        assert_eq!(instance.ssh_port, Some(32768));
        assert_eq!(instance.instance_type.as_deref(), Some("t2.small"));
        assert_eq!(instance.region.as_deref(), Some("local"));
        assert_eq!(instance.tags.get("formation.managed").map(String::as_str), Some("true"));
        assert!(instance.launched_at.is_some());
    }

    #[test]
    fn published_ssh_port_is_reached_on_the_host() {
        let instance = Instance::from_entity(DOCKER_CONTAINER.map_record(&container()).unwrap()).unwrap();
        assert_eq!(instance.ssh_endpoint(), Some(("127.0.0.1", 32768)));

        let mut record = container();
        record["Ports"][0]["IP"] = json!("192.168.5.10");
        let instance = Instance::from_entity(DOCKER_CONTAINER.map_record(&record).unwrap()).unwrap();
        assert_eq!(instance.ssh_endpoint(), Some(("192.168.5.10", 32768)));
    }

    #[test]
    fn unpublished_ssh_uses_the_container_address() {
        let mut record = container();
        record["Ports"] = json!([{ "PrivatePort": 22, "Type": "tcp" }]);
        let entity = DOCKER_CONTAINER.map_record(&record).unwrap();
        assert_eq!(entity["sshHost"], Value::Null);

        let instance = Instance::from_entity(entity).unwrap();
        assert_eq!(instance.ssh_endpoint(), Some(("172.17.0.3", 22)));
    }

    #[test]
    fn docker_ip_defaults_to_loopback() {
        let entity = DOCKER_CONTAINER
            .map_record(&json!({ "Id": "c1", "Names": ["/web"], "State": "exited" }))
            .unwrap();
        assert_eq!(entity["ip"], "127.0.0.1");
        assert_eq!(entity["sshPort"], Value::Null);
    }

    #[test]
    fn launch_fields_project_onto_create_body() {
        let mut entity = crate::mapper::Entity::new();
        entity.insert("image".into(), json!("ubuntu:24.04"));
        entity.insert("tags".into(), json!({ "formation.type": "t2.small" }));
        entity.insert("cmd".into(), Value::Null);
        entity.insert("portBindings".into(), json!({ "22/tcp": [{ "HostIp": "127.0.0.1" }] }));

        let body = DOCKER_LAUNCH.unmap_record(&entity);
        assert_eq!(body["Image"], "ubuntu:24.04");
        assert_eq!(body["Labels"]["formation.type"], "t2.small");
        assert_eq!(body["HostConfig"]["PortBindings"]["22/tcp"][0]["HostIp"], "127.0.0.1");
        assert!(body.get("Cmd").is_none());
    }
}
