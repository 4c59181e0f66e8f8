use std::path::PathBuf;
use std::sync::Arc;

use fm_engine::{EngineConfig, Formation, Orchestrator};
use fm_infra::RemoteShell;
use fm_infra::docker::DockerProvisioner;
use fm_infra::shell::{DockerShell, SshConfig, SshShell};

use crate::cli::{Cli, ShellKind};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub template: PathBuf,
    pub shell: ShellKind,
    pub engine: EngineConfig,
}

impl CliConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        Ok(Self {
            template: cli.template.clone(),
            shell: cli.shell,
            engine: EngineConfig::from_env()?,
        })
    }

    /// Wire the Docker provisioner and the selected remote shell.
    pub fn orchestrator(&self, formation: Formation) -> Result<Orchestrator> {
        let provisioner = DockerProvisioner::from_env()?;
        let shell: Arc<dyn RemoteShell> = match self.shell {
            ShellKind::Docker => Arc::new(DockerShell::new(provisioner.client().clone(), self.engine.connect)),
            ShellKind::Ssh => Arc::new(SshShell::new(SshConfig::from_env(), self.engine.connect)),
        };
        tracing::info!(
            template = %self.template.display(),
            shell = shell.name(),
            machines = formation.machines.len(),
            "formation ready"
        );
        Ok(Orchestrator::new(
            formation,
            Arc::new(provisioner),
            shell,
            self.engine.clone(),
        ))
    }
}
