use std::collections::BTreeMap;
use std::sync::Arc;

use fm_infra::types::{Instance, InstanceFilter, InstanceId, InstanceState};
use fm_infra::{Provisioner, RemoteShell};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::MachineFailure;
use crate::queue::{Cancellation, OnError, run_parallel, run_serial};
use crate::registry::{Discovery, Registry};
use crate::runner::{RunResult, ScriptRunner};
use crate::template::{Formation, Script};
use crate::{Error, Result};

/// Outcome of one boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub run_id: Uuid,
    /// Default-phase runs, one per booted machine.
    pub default: Vec<RunResult>,
    /// Dependency-phase runs in execution order.
    pub scripts: Vec<RunResult>,
}

/// A declared machine joined with its live instance, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineStatus {
    pub name: String,
    pub instance_type: String,
    pub region: String,
    pub key_name: Option<String>,
    pub instance: Option<Instance>,
}

/// Drives provisioning, boot and targeted runs for one formation.
pub struct Orchestrator {
    formation: Formation,
    provisioner: Arc<dyn Provisioner>,
    discovery: Discovery,
    runner: ScriptRunner,
    config: EngineConfig,
    cancel: Cancellation,
}

impl Orchestrator {
    pub fn new(
        formation: Formation,
        provisioner: Arc<dyn Provisioner>,
        shell: Arc<dyn RemoteShell>,
        config: EngineConfig,
    ) -> Self {
        let cancel = Cancellation::new();
        Self {
            discovery: Discovery::new(provisioner.clone(), config.discovery),
            runner: ScriptRunner::new(shell, cancel.clone()),
            formation,
            provisioner,
            config,
            cancel,
        }
    }

    pub fn formation(&self) -> &Formation {
        &self.formation
    }

    /// Handle for stopping the current operation at its next serial step.
    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    pub async fn registry(&self) -> Result<Registry> {
        self.discovery.resolve(&self.formation).await
    }

    /// Lint, provision, then boot whatever was created.
    pub async fn deploy(&self) -> Result<BootReport> {
        self.formation.lint()?;
        let created = self.provision().await?;
        self.boot(&created).await
    }

    /// Create every machine that is not already running. Returns the created
    /// names in declared order.
    pub async fn provision(&self) -> Result<Vec<String>> {
        let results = run_parallel(&self.formation.machines, |machine| async move {
            let live = self
                .provisioner
                .find(&InstanceFilter::named(&machine.name).running())
                .await?;
            if let Some(existing) = live.first() {
                tracing::info!(machine = %machine.name, instance_id = %existing.id, "already running");
                return Ok(None);
            }

            let instance = self.provisioner.create(&machine.launch_spec()).await?;
            tracing::info!(
                machine = %machine.name,
                instance_id = %instance.id,
                provider = self.provisioner.name(),
                "created instance"
            );
            Ok::<_, Error>(Some(machine.name.clone()))
        })
        .await;

        let created: Vec<Option<String>> = results.into_iter().collect::<Result<_>>()?;
        Ok(created.into_iter().flatten().collect())
    }

    /// Run the default script on `names` in parallel, then each machine's
    /// boot scripts serially in declared order.
    pub async fn boot(&self, names: &[String]) -> Result<BootReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("boot", %run_id);
        self.boot_inner(run_id, names).instrument(span).await
    }

    async fn boot_inner(&self, run_id: Uuid, names: &[String]) -> Result<BootReport> {
        let mut report = BootReport {
            run_id,
            default: Vec::new(),
            scripts: Vec::new(),
        };
        if names.is_empty() {
            tracing::info!("nothing to boot");
            return Ok(report);
        }
        let names = self.in_declared_order(names)?;

        if let Some(script) = self.formation.script(&self.config.default_script) {
            tracing::info!(script = %script.name, machines = names.len(), "default phase");
            let registry = self.registry().await?;
            let (done, failures) = self.fan_out(script, &names, &registry).await;
            if !failures.is_empty() {
                return Err(Error::DefaultPhase(failures));
            }
            report.default = done;
        }

        let registry = self.registry().await?;
        let registry = &registry;
        let phases = run_serial(names.iter().enumerate(), OnError::Stop, &self.cancel, |(index, name)| async move {
            if index > 0 {
                if let Some(delay) = self.config.boot_delay {
                    tokio::time::sleep(delay).await;
                }
            }
            self.boot_machine(name, registry).await
        })
        .await;

        for phase in phases {
            report.scripts.extend(phase?);
        }
        tracing::info!(
            default = report.default.len(),
            scripts = report.scripts.len(),
            "boot finished"
        );
        Ok(report)
    }

    async fn boot_machine(&self, name: &str, registry: &Registry) -> Result<Vec<RunResult>> {
        let instance = registry.require(name)?;
        let boot = self.formation.boot_scripts(name);
        let total = boot.len();

        let results = run_serial(boot.iter().enumerate(), OnError::Stop, &self.cancel, |(n, script)| async move {
            tracing::info!(machine = %name, script = %script, step = n + 1, of = total, "boot script");
            let script = self.formation.script(script).ok_or_else(|| Error::MissingScript {
                machine: name.to_string(),
                script: script.clone(),
            })?;
            self.runner.run_on(script, instance, registry).await
        })
        .await;

        results.into_iter().collect()
    }

    /// Run a named script, or `script` itself as an inline command, on
    /// `targets` (every live formation machine when empty). Repeated targets
    /// run once.
    pub async fn run(&self, script: &str, targets: &[String]) -> Result<Vec<RunResult>> {
        let registry = self.registry().await?;
        let names: Vec<String> = if targets.is_empty() {
            self.formation
                .machine_names()
                .filter(|name| registry.contains(name))
                .map(str::to_string)
                .collect()
        } else {
            let mut names: Vec<String> = Vec::with_capacity(targets.len());
            for name in targets {
                registry.require(name)?;
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            names
        };

        let script = self.formation.script_or_inline(script);
        let (done, failures) = self.fan_out(&script, &names, &registry).await;
        if failures.is_empty() {
            Ok(done)
        } else {
            Err(Error::Targets(failures))
        }
    }

    /// Run `script` on every name concurrently, isolating failures.
    async fn fan_out(
        &self,
        script: &Script,
        names: &[String],
        registry: &Registry,
    ) -> (Vec<RunResult>, Vec<MachineFailure>) {
        let results = run_parallel(names, |name| async move {
            let instance = registry.require(name)?;
            self.runner.run_on(script, instance, registry).await
        })
        .await;

        let mut done = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(run) => done.push(run),
                Err(error) => {
                    tracing::error!(machine = %name, script = %script.name, error = %error, "script failed");
                    failures.push(MachineFailure {
                        machine: name.clone(),
                        error,
                    });
                }
            }
        }
        (done, failures)
    }

    fn in_declared_order(&self, names: &[String]) -> Result<Vec<String>> {
        if let Some(unknown) = names.iter().find(|n| !self.formation.is_declared(n)) {
            return Err(Error::UnknownMachine(unknown.clone()));
        }
        Ok(self
            .formation
            .machine_names()
            .filter(|declared| names.iter().any(|n| n.as_str() == *declared))
            .map(str::to_string)
            .collect())
    }

    /// Terminate every live formation instance in parallel.
    pub async fn terminate(&self) -> Result<Vec<Instance>> {
        let targets: Vec<Instance> = self
            .provisioner
            .find(&InstanceFilter::all())
            .await?
            .into_iter()
            .filter(|i| self.formation.is_declared(&i.name) && i.state != InstanceState::Terminated)
            .collect();

        let results = run_parallel(&targets, |instance| async move {
            let terminated = self.provisioner.terminate(&instance.id).await?;
            tracing::info!(machine = %instance.name, instance_id = %instance.id, "terminated");
            Ok::<_, Error>(terminated)
        })
        .await;

        let mut done = Vec::new();
        let mut failures = Vec::new();
        for (instance, result) in targets.iter().zip(results) {
            match result {
                Ok(terminated) => done.push(terminated),
                Err(error) => {
                    tracing::error!(machine = %instance.name, error = %error, "terminate failed");
                    failures.push(MachineFailure {
                        machine: instance.name.clone(),
                        error,
                    });
                }
            }
        }
        if failures.is_empty() {
            Ok(done)
        } else {
            Err(Error::Targets(failures))
        }
    }

    /// Start one instance by provider id.
    pub async fn start(&self, id: &InstanceId) -> Result<Instance> {
        let instance = self.provisioner.start(id).await?;
        tracing::info!(machine = %instance.name, instance_id = %id, state = %instance.state, "started");
        Ok(instance)
    }

    /// Stop one instance by provider id.
    pub async fn stop(&self, id: &InstanceId) -> Result<Instance> {
        let instance = self.provisioner.stop(id).await?;
        tracing::info!(machine = %instance.name, instance_id = %id, state = %instance.state, "stopped");
        Ok(instance)
    }

    /// Terminate one instance by provider id, declared or not.
    pub async fn remove(&self, id: &InstanceId) -> Result<Instance> {
        let instance = self.provisioner.terminate(id).await?;
        tracing::info!(machine = %instance.name, instance_id = %id, "terminated");
        Ok(instance)
    }

    /// Declared machines joined with their live instances, preferring a
    /// running one when a name has several.
    pub async fn status(&self) -> Result<Vec<MachineStatus>> {
        let mut by_name: BTreeMap<String, Instance> = BTreeMap::new();
        for instance in self.provisioner.find(&InstanceFilter::all()).await? {
            let replace = by_name
                .get(&instance.name)
                .is_none_or(|current| !current.is_running() && instance.is_running());
            if replace {
                by_name.insert(instance.name.clone(), instance);
            }
        }

        Ok(self
            .formation
            .machines
            .iter()
            .map(|machine| MachineStatus {
                name: machine.name.clone(),
                instance_type: machine.instance_type().to_string(),
                region: machine.region().to_string(),
                key_name: machine.key_name().map(str::to_string),
                instance: by_name.remove(&machine.name),
            })
            .collect())
    }

    /// Every instance the provider reports, declared or not.
    pub async fn ls(&self) -> Result<Vec<Instance>> {
        Ok(self.provisioner.find(&InstanceFilter::all()).await?)
    }
}
