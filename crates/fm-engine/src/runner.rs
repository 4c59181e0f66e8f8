use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fm_infra::types::Instance;
use fm_infra::{RemoteShell, Session};

use crate::eval::{Context, Evaluator, Host};
use crate::queue::Cancellation;
use crate::registry::Registry;
use crate::template::Script;
use crate::{Error, Result};

/// One executed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutput {
    pub command: String,
    pub stdout: String,
    pub exit_code: Option<i64>,
}

/// A script that ran to completion on one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub machine: String,
    pub script: String,
    pub lines: Vec<LineOutput>,
}

/// Evaluates and executes scripts over the remote shell.
#[derive(Clone)]
pub struct ScriptRunner {
    shell: Arc<dyn RemoteShell>,
    cancel: Cancellation,
}

impl ScriptRunner {
    pub fn new(shell: Arc<dyn RemoteShell>, cancel: Cancellation) -> Self {
        Self { shell, cancel }
    }

    /// Run every line of `script` on `target` over a single session. The
    /// first failing line aborts the rest of the script.
    pub async fn run_on(&self, script: &Script, target: &Instance, registry: &Registry) -> Result<RunResult> {
        self.run_lines(script, target, registry)
            .await
            .map_err(|e| Error::ScriptFailed {
                machine: target.name.clone(),
                script: script.name.clone(),
                source: Box::new(e),
            })
    }

    async fn run_lines(&self, script: &Script, target: &Instance, registry: &Registry) -> Result<RunResult> {
        self.cancel.check()?;
        let context = Context::new(target.clone(), registry.instances().clone())?;
        let host = ShellHost {
            shell: self.shell.clone(),
        };
        let mut evaluator = Evaluator::new(&host, &context);

        tracing::info!(machine = %target.name, script = %script.name, lines = script.lines.len(), "running script");
        let mut session = connect(self.shell.as_ref(), target).await?;
        let outcome = self
            .exec_lines(session.as_mut(), &mut evaluator, script, target)
            .await;

        close(session, &target.name).await;

        Ok(RunResult {
            machine: target.name.clone(),
            script: script.name.clone(),
            lines: outcome?,
        })
    }

    async fn exec_lines(
        &self,
        session: &mut dyn Session,
        evaluator: &mut Evaluator<'_>,
        script: &Script,
        target: &Instance,
    ) -> Result<Vec<LineOutput>> {
        let mut lines = Vec::with_capacity(script.lines.len());
        for (n, line) in script.lines.iter().enumerate() {
            self.cancel.check()?;
            let command = evaluator.evaluate(line).await?;
            tracing::debug!(machine = %target.name, script = %script.name, line = n + 1, command = %command, "exec");

            let output = session.exec(&command).await?;
            if !output.success() {
                return Err(Error::RemoteExecution {
                    machine: target.name.clone(),
                    command,
                    exit_code: output.exit_code,
                    output: format!("{}{}", output.stdout, output.stderr),
                });
            }
            lines.push(LineOutput {
                command,
                stdout: output.stdout,
                exit_code: output.exit_code,
            });
        }
        Ok(lines)
    }
}

async fn connect(shell: &dyn RemoteShell, target: &Instance) -> Result<Box<dyn Session>> {
    shell.connect(target).await.map_err(|e| match e {
        fm_infra::Error::MissingAddress { instance } => Error::MissingAddress { machine: instance },
        other => Error::Infra(other),
    })
}

/// Teardown failures are logged; the session's own result stands.
async fn close(session: Box<dyn Session>, machine: &str) {
    if let Err(e) = session.disconnect().await {
        tracing::warn!(machine, error = %e, "session teardown failed");
    }
}

/// Instance methods inside expressions, each on a short-lived session.
struct ShellHost {
    shell: Arc<dyn RemoteShell>,
}

#[async_trait]
impl Host for ShellHost {
    async fn exec(&self, instance: &Instance, command: &str) -> Result<String> {
        let mut session = connect(self.shell.as_ref(), instance).await?;
        let output = session.exec(command).await;
        close(session, &instance.name).await;
        let output = output?;

        if !output.success() {
            return Err(Error::RemoteExecution {
                machine: instance.name.clone(),
                command: command.to_string(),
                exit_code: output.exit_code,
                output: format!("{}{}", output.stdout, output.stderr),
            });
        }
        Ok(output.stdout)
    }

    async fn upload(&self, instance: &Instance, local: &Path, remote: &str) -> Result<()> {
        let mut session = connect(self.shell.as_ref(), instance).await?;
        let result = session.put(local, remote).await;
        close(session, &instance.name).await;
        Ok(result?)
    }

    async fn download(&self, instance: &Instance, remote: &str, local: &Path) -> Result<()> {
        let mut session = connect(self.shell.as_ref(), instance).await?;
        let result = session.get(remote, local).await;
        close(session, &instance.name).await;
        Ok(result?)
    }
}
