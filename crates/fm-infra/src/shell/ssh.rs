use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::retry::{RetryPolicy, retry};
use crate::types::{CommandOutput, Instance};
use crate::{Error, RemoteShell, Result, Session};

const SSH_OPTS: &[&str] = &[
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "LogLevel=ERROR",
    "-o",
    "BatchMode=yes",
];

/// OpenSSH connection settings shared by every session.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    /// Directory holding `{keyName}_{region}.pem` files.
    pub key_dir: PathBuf,
    /// Directory for control-master sockets.
    pub control_dir: PathBuf,
    pub connect_timeout: Duration,
}

impl SshConfig {
    /// Load from env vars: `FORMATION_SSH_USER` (default `ubuntu`),
    /// `FORMATION_SSH_KEY_DIR` (default `.`).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            user: std::env::var("FORMATION_SSH_USER").unwrap_or_else(|_| "ubuntu".into()),
            key_dir: std::env::var("FORMATION_SSH_KEY_DIR")
                .unwrap_or_else(|_| ".".into())
                .into(),
            control_dir: std::env::temp_dir(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Key file for an instance, when it carries a key name and region.
    pub fn key_path(&self, instance: &Instance) -> Option<PathBuf> {
        let key = instance.key_name.as_deref()?;
        let region = instance.region.as_deref()?;
        Some(self.key_dir.join(format!("{key}_{region}.pem")))
    }
}

/// Remote shell over the system `ssh`/`scp` binaries. Each session owns an
/// OpenSSH control master so consecutive commands share one connection.
pub struct SshShell {
    config: SshConfig,
    connect_retry: RetryPolicy,
}

impl SshShell {
    pub fn new(config: SshConfig, connect_retry: RetryPolicy) -> Self {
        Self {
            config,
            connect_retry,
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn connect(&self, instance: &Instance) -> Result<Box<dyn Session>> {
        let (host, port) = instance.ssh_endpoint().ok_or_else(|| Error::MissingAddress {
            instance: instance.name.clone(),
        })?;

        let session = SshSession {
            machine: instance.name.clone(),
            destination: format!("{}@{host}", self.config.user),
            host: host.to_string(),
            port,
            key_path: self.config.key_path(instance),
            control_path: self
                .config
                .control_dir
                .join(format!("formation-{}.sock", Uuid::new_v4().simple())),
        };

        let connect_timeout = self.config.connect_timeout.as_secs().max(1);
        retry(self.connect_retry, "ssh connect", |_| session.open_master(connect_timeout))
            .await
            .map_err(|e| Error::Connect {
                target: session.destination.clone(),
                attempts: e.attempts,
                reason: e.last.to_string(),
            })?;

        tracing::debug!(machine = %session.machine, destination = %session.destination, "ssh: master open");
        Ok(Box::new(session))
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}

struct SshSession {
    machine: String,
    destination: String,
    host: String,
    port: u16,
    key_path: Option<PathBuf>,
    control_path: PathBuf,
}

impl SshSession {
    fn base_args(&self, port_flag: &str) -> Vec<String> {
        let mut args: Vec<String> = SSH_OPTS.iter().map(|s| s.to_string()).collect();
        args.push("-o".into());
        args.push(format!("ControlPath={}", self.control_path.display()));
        args.push(port_flag.into());
        args.push(self.port.to_string());
        if let Some(key) = &self.key_path {
            args.push("-i".into());
            args.push(key.display().to_string());
        }
        args
    }

    async fn open_master(&self, connect_timeout: u64) -> Result<()> {
        let mut args = self.base_args("-p");
        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={connect_timeout}"),
            "-M".into(),
            "-N".into(),
            "-f".into(),
            self.destination.clone(),
        ]);
        let output = run("ssh", &args).await?;
        if !output.status.success() {
            return Err(Error::Connect {
                target: self.destination.clone(),
                attempts: 1,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn scp(&self, from: &str, to: &str, recursive: bool) -> Result<()> {
        let mut args = self.base_args("-P");
        if recursive {
            args.push("-r".into());
        }
        args.push(from.into());
        args.push(to.into());

        let output = run("scp", &args).await?;
        if !output.status.success() {
            return Err(Error::Transfer {
                target: self.destination.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Session for SshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        let mut args = self.base_args("-p");
        args.push(self.destination.clone());
        // No local shell is involved: the remote shell receives `command`
        // verbatim.
        args.push(command.into());

        let output = run("ssh", &args).await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().map(i64::from),
        })
    }

    async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        let recursive = tokio::fs::metadata(local).await?.is_dir();
        let to = format!("{}:{remote}", self.destination);
        self.scp(&local.display().to_string(), &to, recursive).await?;
        tracing::info!(machine = %self.machine, local = %local.display(), remote, "ssh: uploaded");
        Ok(())
    }

    async fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        let from = format!("{}:{remote}", self.destination);
        self.scp(&from, &local.display().to_string(), false).await?;
        tracing::info!(machine = %self.machine, remote, local = %local.display(), "ssh: downloaded");
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<()> {
        let mut args = self.base_args("-p");
        args.extend(["-O".to_string(), "exit".into(), self.destination.clone()]);
        let output = run("ssh", &args).await?;
        if !output.status.success() {
            tracing::warn!(
                machine = %self.machine,
                host = %self.host,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ssh: control master did not exit cleanly"
            );
        }
        let _ = tokio::fs::remove_file(&self.control_path).await;
        Ok(())
    }
}

async fn run(program: &str, args: &[String]) -> Result<Output> {
    tracing::trace!(program, ?args, "spawning");
    Ok(Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceId;

    fn instance() -> Instance {
        serde_json::from_value(serde_json::json!({
            "id": "i-1",
            "name": "web",
            "state": "running",
            "region": "us-east-1",
            "keyName": "deploy",
            "ip": "54.0.0.1",
        }))
        .unwrap()
    }

    fn config() -> SshConfig {
        SshConfig {
            user: "ubuntu".into(),
            key_dir: PathBuf::from("/keys"),
            control_dir: PathBuf::from("/tmp"),
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn key_path_uses_key_name_and_region() {
        assert_eq!(
            config().key_path(&instance()),
            Some(PathBuf::from("/keys/deploy_us-east-1.pem"))
        );

        let mut keyless = instance();
        keyless.key_name = None;
        assert_eq!(config().key_path(&keyless), None);
    }

    #[test]
    fn base_args_pin_control_path_and_port() {
        let session = SshSession {
            machine: "web".into(),
            destination: "ubuntu@54.0.0.1".into(),
            host: "54.0.0.1".into(),
            port: 2222,
            key_path: Some(PathBuf::from("/keys/deploy_us-east-1.pem")),
            control_path: PathBuf::from("/tmp/formation-x.sock"),
        };
        let args = session.base_args("-P");
        assert!(args.contains(&"ControlPath=/tmp/formation-x.sock".to_string()));
        let port_at = args.iter().position(|a| a == "-P").unwrap();
        assert_eq!(args[port_at + 1], "2222");
        assert!(args.contains(&"/keys/deploy_us-east-1.pem".to_string()));
    }

    #[tokio::test]
    async fn connect_without_address_fails_fast() {
        let shell = SshShell::new(config(), RetryPolicy::once());
        let mut unaddressed = instance();
        unaddressed.id = InstanceId("i-2".into());
        unaddressed.ip = None;
        unaddressed.private_ip = None;

        let err = shell.connect(&unaddressed).await.err().unwrap();
        assert!(matches!(err, Error::MissingAddress { .. }));
    }
}
