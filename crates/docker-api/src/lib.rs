//! Typed Rust client for the Docker Engine HTTP API.
//!
//! Covers the subset needed for running formation machines as containers:
//! containers (list, inspect, create, start, stop, remove) and exec.
//!
//! Container listings are returned as raw JSON so callers can normalize them
//! through their own field mappings.

mod types;

pub use types::*;

const API_VERSION: &str = "v1.24";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("docker api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("docker api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("unsupported docker host: {0}")]
    UnsupportedHost(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the Docker Engine REST API over TCP.
#[derive(Clone)]
pub struct DockerClient {
    base: String,
    http: reqwest::Client,
}

impl DockerClient {
    /// Build a client from a `DOCKER_HOST`-style address
    /// (`tcp://host:port`, `http://host:port` or `https://host:port`).
    pub fn new(host: &str) -> Result<Self> {
        let base = if let Some(rest) = host.strip_prefix("tcp://") {
            format!("http://{rest}")
        } else if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            return Err(Error::UnsupportedHost(host.to_string()));
        };

        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{API_VERSION}{path}", self.base)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    /// Like `check` but also accepts `304 Not Modified`, which the daemon
    /// returns for start/stop on a container already in that state.
    async fn check_allow_304(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() && status.as_u16() != 304 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    /// Like `check` but also treats 404 as success (for remove idempotency).
    async fn check_allow_404(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    // ── Containers ───────────────────────────────────────────────────

    /// List containers, optionally filtered by `label=value` pairs.
    pub async fn list_containers(&self, all: bool, labels: &[String]) -> Result<Vec<serde_json::Value>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if all {
            query.push(("all", "1".into()));
        }
        if !labels.is_empty() {
            let filters = serde_json::json!({ "label": labels });
            query.push(("filters", filters.to_string()));
        }

        let resp = self
            .http
            .get(self.url("/containers/json"))
            .query(&query)
            .send()
            .await?;

        Self::check(resp, "list containers")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    pub async fn inspect_container(&self, id: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(self.url(&format!("/containers/{id}/json")))
            .send()
            .await?;

        Self::check(resp, "inspect container")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    pub async fn create_container(
        &self,
        name: &str,
        req: &CreateContainerRequest,
    ) -> Result<CreateContainerResponse> {
        let resp = self
            .http
            .post(self.url("/containers/create"))
            .query(&[("name", name)])
            .json(req)
            .send()
            .await?;

        Self::check(resp, "create container")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    pub async fn start_container(&self, id: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{id}/start")))
            .send()
            .await?;

        Self::check_allow_304(resp, "start container").await?;
        Ok(())
    }

    pub async fn stop_container(&self, id: &str, timeout_secs: Option<u32>) -> Result<()> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(t) = timeout_secs {
            query.push(("t", t.to_string()));
        }

        let resp = self
            .http
            .post(self.url(&format!("/containers/{id}/stop")))
            .query(&query)
            .send()
            .await?;

        Self::check_allow_304(resp, "stop container").await?;
        Ok(())
    }

    /// Force-remove a container and its anonymous volumes.
    pub async fn remove_container(&self, id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/containers/{id}")))
            .query(&[("force", "1"), ("v", "1")])
            .send()
            .await?;

        Self::check_allow_404(resp, "remove container").await?;
        Ok(())
    }

    // ── Exec ─────────────────────────────────────────────────────────

    pub async fn create_exec(&self, container: &str, req: &CreateExecRequest) -> Result<ExecCreated> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{container}/exec")))
            .json(req)
            .send()
            .await?;

        Self::check(resp, "create exec")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    /// Start an exec instance attached and return its raw output once the
    /// process exits.
    pub async fn start_exec(&self, exec_id: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url(&format!("/exec/{exec_id}/start")))
            .json(&StartExecRequest {
                detach: false,
                tty: true,
            })
            .send()
            .await?;

        Self::check(resp, "start exec")
            .await?
            .text()
            .await
            .map_err(Error::from)
    }

    pub async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect> {
        let resp = self
            .http
            .get(self.url(&format!("/exec/{exec_id}/json")))
            .send()
            .await?;

        Self::check(resp, "inspect exec")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    /// Run a shell command in a container: create, start, then inspect the
    /// exec instance for its exit code.
    pub async fn exec(&self, container: &str, command: &str) -> Result<ExecResult> {
        let created = self
            .create_exec(container, &CreateExecRequest::shell(command))
            .await?;
        let output = self.start_exec(&created.id).await?;
        let inspect = self.inspect_exec(&created.id).await?;

        Ok(ExecResult {
            output,
            exit_code: inspect.exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_host_becomes_http_base() {
        let client = DockerClient::new("tcp://127.0.0.1:2375").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:2375");
        assert_eq!(
            client.url("/containers/json"),
            "http://127.0.0.1:2375/v1.24/containers/json"
        );
    }

    #[test]
    fn unix_socket_host_is_rejected() {
        let err = DockerClient::new("unix:///var/run/docker.sock").err().unwrap();
        assert!(matches!(err, Error::UnsupportedHost(_)));
    }

    #[test]
    fn shell_exec_request_serializes_pascal_case() {
        let req = CreateExecRequest::shell("echo hi");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["Tty"], true);
        assert_eq!(json["Cmd"], serde_json::json!(["sh", "-c", "echo hi"]));
    }

    #[test]
    fn create_request_skips_empty_sections() {
        let req = CreateContainerRequest {
            image: "ubuntu".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({ "Image": "ubuntu" }));
    }
}
