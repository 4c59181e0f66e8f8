use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Container types ──────────────────────────────────────────────────

/// Body of `POST /containers/create`. Deserializable so callers can build
/// it from a projected canonical record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateContainerRequest {
    pub image: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub exposed_ports: HashMap<String, EmptyObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_config: Option<HostConfig>,
}

/// Docker encodes sets as objects whose values are `{}`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmptyObject {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConfig {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortBinding {
    pub host_ip: String,
    /// Empty lets the daemon pick a free host port.
    pub host_port: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerResponse {
    pub id: String,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

// ── Exec types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateExecRequest {
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    pub cmd: Vec<String>,
}

impl CreateExecRequest {
    /// Run `command` through `sh -c` with a TTY so the output stream is raw
    /// (no multiplexing headers).
    pub fn shell(command: &str) -> Self {
        Self {
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            cmd: vec!["sh".into(), "-c".into(), command.into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreated {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartExecRequest {
    pub detach: bool,
    pub tty: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecInspect {
    pub running: bool,
    #[serde(default)]
    pub exit_code: Option<i64>,
}

/// Output of a completed exec session.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub output: String,
    pub exit_code: Option<i64>,
}
