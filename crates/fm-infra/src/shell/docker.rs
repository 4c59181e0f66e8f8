use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use docker_api::DockerClient;

use super::shell_quote;
use crate::retry::{RetryPolicy, retry};
use crate::types::{CommandOutput, Instance};
use crate::{Error, RemoteShell, Result, Session};

/// Runs commands inside formation containers through the Docker exec API.
pub struct DockerShell {
    client: DockerClient,
    connect_retry: RetryPolicy,
}

impl DockerShell {
    pub fn new(client: DockerClient, connect_retry: RetryPolicy) -> Self {
        Self {
            client,
            connect_retry,
        }
    }
}

#[async_trait]
impl RemoteShell for DockerShell {
    async fn connect(&self, instance: &Instance) -> Result<Box<dyn Session>> {
        let container = instance.id.0.clone();

        retry(self.connect_retry, "docker exec connect", |_| {
            ensure_running(&self.client, &container)
        })
        .await
        .map_err(|e| Error::Connect {
            target: instance.name.clone(),
            attempts: e.attempts,
            reason: e.last.to_string(),
        })?;

        tracing::debug!(machine = %instance.name, container = %container, "docker: session open");

        Ok(Box::new(DockerSession {
            client: self.client.clone(),
            container,
            name: instance.name.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

async fn ensure_running(client: &DockerClient, container: &str) -> Result<()> {
    let inspect = client.inspect_container(container).await?;
    let running = inspect
        .pointer("/State/Running")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !running {
        return Err(Error::NotRunning {
            instance: container.to_string(),
        });
    }
    Ok(())
}

struct DockerSession {
    client: DockerClient,
    container: String,
    name: String,
}

impl DockerSession {
    async fn exec_checked(&self, command: &str) -> Result<String> {
        let result = self.client.exec(&self.container, command).await?;
        if result.exit_code != Some(0) {
            return Err(Error::Transfer {
                target: self.name.clone(),
                reason: format!("exit {:?}: {}", result.exit_code, result.output.trim()),
            });
        }
        Ok(result.output)
    }
}

#[async_trait]
impl Session for DockerSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        let result = self.client.exec(&self.container, command).await?;
        // TTY sessions merge stderr into the output stream.
        Ok(CommandOutput {
            stdout: result.output,
            stderr: String::new(),
            exit_code: result.exit_code,
        })
    }

    /// Files travel base64-encoded inside the exec command line, so this
    /// suits config files rather than large artifacts.
    async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        let bytes = tokio::fs::read(local).await?;
        let encoded = STANDARD.encode(bytes);
        let target = shell_quote(remote);

        self.exec_checked(&format!(
            "mkdir -p \"$(dirname {target})\" && printf '%s' {} | base64 -d > {target}",
            shell_quote(&encoded),
        ))
        .await?;

        tracing::info!(machine = %self.name, local = %local.display(), remote, "docker: uploaded");
        Ok(())
    }

    async fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        let output = self
            .exec_checked(&format!("base64 {}", shell_quote(remote)))
            .await?;
        let encoded: String = output.split_whitespace().collect();
        let bytes = STANDARD.decode(encoded).map_err(|e| Error::Transfer {
            target: self.name.clone(),
            reason: format!("decode {remote}: {e}"),
        })?;
        tokio::fs::write(local, bytes).await?;

        tracing::info!(machine = %self.name, remote, local = %local.display(), "docker: downloaded");
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<()> {
        tracing::debug!(machine = %self.name, "docker: session closed");
        Ok(())
    }
}
