use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::mapper::Entity;
use crate::{Error, Result};

/// Opaque provider-side instance identifier (e.g. an EC2 instance ID or a
/// Docker container ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-reported instance state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
    #[default]
    Unknown,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }

    /// Normalize the state vocabularies of EC2 and Docker.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => Self::Running,
            "pending" | "created" | "restarting" => Self::Pending,
            "stopping" | "shutting-down" => Self::Stopping,
            "stopped" | "exited" | "paused" => Self::Stopped,
            "terminated" | "removing" | "dead" => Self::Terminated,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InstanceState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Self::parse).unwrap_or_default())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Canonical compute instance, always built from a freshly mapped provider
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub state: InstanceState,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default, rename = "type")]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    /// Host-side address of a published SSH port, when it differs from `ip`.
    #[serde(default)]
    pub ssh_host: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub launched_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// Decode a canonical entity produced by one of the instance mappings.
    pub fn from_entity(entity: Entity) -> Result<Self> {
        serde_json::from_value(serde_json::Value::Object(entity)).map_err(|e| Error::Decode {
            entity: "instance",
            reason: e.to_string(),
        })
    }

    /// Routable address: public if present, else private.
    pub fn address(&self) -> Option<&str> {
        self.ip.as_deref().or(self.private_ip.as_deref())
    }

    /// Where SSH listens: the published host port if there is one, else
    /// port 22 on the routable address.
    pub fn ssh_endpoint(&self) -> Option<(&str, u16)> {
        match self.ssh_port {
            Some(port) => Some((self.ssh_host.as_deref().or(self.address())?, port)),
            None => Some((self.address()?, 22)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub fn matches(&self, filter: &InstanceFilter) -> bool {
        filter.id.as_ref().is_none_or(|id| id == &self.id)
            && filter.name.as_ref().is_none_or(|name| name == &self.name)
            && filter.state.is_none_or(|state| state == self.state)
            && filter.ip.as_ref().is_none_or(|ip| Some(ip.as_str()) == self.ip.as_deref())
    }
}

/// Field-equality filter for `Provisioner::find`. Every field that is set
/// must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub id: Option<InstanceId>,
    pub name: Option<String>,
    pub state: Option<InstanceState>,
    pub ip: Option<String>,
}

impl InstanceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn id(id: &InstanceId) -> Self {
        Self {
            id: Some(id.clone()),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn running(self) -> Self {
        self.with_state(InstanceState::Running)
    }
}

impl fmt::Display for InstanceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = &self.id {
            parts.push(format!("id={id}"));
        }
        if let Some(name) = &self.name {
            parts.push(format!("name={name}"));
        }
        if let Some(state) = &self.state {
            parts.push(format!("state={state}"));
        }
        if let Some(ip) = &self.ip {
            parts.push(format!("ip={ip}"));
        }
        if parts.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&parts.join(","))
        }
    }
}

/// Launch parameters handed to a provisioner for one machine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSpec {
    pub name: String,
    pub instance_type: String,
    pub region: String,
    pub image: Option<String>,
    pub key_name: Option<String>,
    pub tags: BTreeMap<String, String>,
    /// Provider-specific parameters the core does not interpret.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}
