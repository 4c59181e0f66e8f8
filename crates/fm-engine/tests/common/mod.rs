#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fm_engine::{EngineConfig, Formation, Orchestrator};
use fm_infra::retry::RetryPolicy;
use fm_infra::types::{CommandOutput, Instance, InstanceFilter, InstanceId, InstanceState, LaunchSpec};
use fm_infra::{Error, Provisioner, RemoteShell, Result, Session};
use serde_json::{Value, json};

pub fn instance(id: &str, name: &str, state: &str, ip: Option<&str>) -> Instance {
    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "state": state,
        "region": "us-east-1",
        "type": "t2.nano",
        "ip": ip,
    }))
    .unwrap()
}

// ── Provisioner ──

#[derive(Default)]
struct CloudState {
    instances: Vec<Instance>,
    created: Vec<String>,
    terminated: Vec<String>,
    finds: u32,
    failing_finds: u32,
    unaddressed_finds: u32,
}

/// In-memory provider. Creations come up running with a fresh address.
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_instances(instances: Vec<Instance>) -> Arc<Self> {
        let cloud = Self::default();
        cloud.state.lock().unwrap().instances = instances;
        Arc::new(cloud)
    }

    /// Make the next `n` finds fail outright.
    pub fn fail_finds(&self, n: u32) {
        self.state.lock().unwrap().failing_finds = n;
    }

    /// Make the next `n` finds report instances without addresses.
    pub fn hide_addresses(&self, n: u32) {
        self.state.lock().unwrap().unaddressed_finds = n;
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.state.lock().unwrap().terminated.clone()
    }

    pub fn finds(&self) -> u32 {
        self.state.lock().unwrap().finds
    }

    fn update(&self, id: &InstanceId, state: InstanceState) -> Result<Instance> {
        let mut cloud = self.state.lock().unwrap();
        let instance = cloud
            .instances
            .iter_mut()
            .find(|i| &i.id == id)
            .ok_or_else(|| Error::NotExactlyOne {
                filter: format!("id={id}"),
                found: 0,
            })?;
        instance.state = state;
        Ok(instance.clone())
    }
}

#[async_trait]
impl Provisioner for FakeCloud {
    async fn create(&self, spec: &LaunchSpec) -> Result<Instance> {
        let mut cloud = self.state.lock().unwrap();
        let n = cloud.instances.len() + 1;
        let mut created = instance(
            &format!("i-{n:04}"),
            &spec.name,
            "running",
            Some(&format!("10.0.0.{n}")),
        );
        created.instance_type = Some(spec.instance_type.clone());
        created.region = Some(spec.region.clone());
        cloud.instances.push(created.clone());
        cloud.created.push(spec.name.clone());
        Ok(created)
    }

    async fn find(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        let mut cloud = self.state.lock().unwrap();
        cloud.finds += 1;
        if cloud.failing_finds > 0 {
            cloud.failing_finds -= 1;
            return Err(Error::Io(std::io::Error::other("rate limited")));
        }
        let hide = cloud.unaddressed_finds > 0;
        if hide {
            cloud.unaddressed_finds -= 1;
        }
        Ok(cloud
            .instances
            .iter()
            .filter(|i| i.matches(filter))
            .cloned()
            .map(|mut i| {
                if hide {
                    i.ip = None;
                    i.private_ip = None;
                }
                i
            })
            .collect())
    }

    async fn start(&self, id: &InstanceId) -> Result<Instance> {
        self.update(id, InstanceState::Running)
    }

    async fn stop(&self, id: &InstanceId) -> Result<Instance> {
        self.update(id, InstanceState::Stopped)
    }

    async fn terminate(&self, id: &InstanceId) -> Result<Instance> {
        let terminated = self.update(id, InstanceState::Terminated)?;
        self.state
            .lock()
            .unwrap()
            .terminated
            .push(terminated.name.clone());
        Ok(terminated)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ── Remote shell ──

#[derive(Default)]
struct ShellState {
    log: Vec<String>,
    failing: HashSet<(String, String)>,
    replies: HashMap<String, String>,
    broken_teardown: bool,
}

/// Records every connect, command and disconnect as `machine: event`.
#[derive(Clone, Default)]
pub struct FakeShell {
    state: Arc<Mutex<ShellState>>,
    exec_delay: Duration,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every exec.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    pub fn fail(&self, machine: &str, command: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert((machine.to_string(), command.to_string()));
    }

    pub fn reply(&self, command: &str, stdout: &str) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(command.to_string(), stdout.to_string());
    }

    /// Make every session teardown fail after it is logged.
    pub fn break_teardown(&self) {
        self.state.lock().unwrap().broken_teardown = true;
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Only the executed commands, without session events.
    pub fn commands(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|line| !line.ends_with(" connect") && !line.ends_with(" disconnect"))
            .collect()
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn connect(&self, instance: &Instance) -> Result<Box<dyn Session>> {
        if instance.address().is_none() {
            return Err(Error::MissingAddress {
                instance: instance.name.clone(),
            });
        }
        self.state
            .lock()
            .unwrap()
            .log
            .push(format!("{}: connect", instance.name));
        Ok(Box::new(FakeSession {
            machine: instance.name.clone(),
            shell: self.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct FakeSession {
    machine: String,
    shell: FakeShell,
}

#[async_trait]
impl Session for FakeSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        if !self.shell.exec_delay.is_zero() {
            tokio::time::sleep(self.shell.exec_delay).await;
        }
        let mut state = self.shell.state.lock().unwrap();
        state.log.push(format!("{}: {command}", self.machine));
        let failed = state
            .failing
            .contains(&(self.machine.clone(), command.to_string()));
        Ok(CommandOutput {
            stdout: state.replies.get(command).cloned().unwrap_or_default(),
            stderr: String::new(),
            exit_code: Some(if failed { 1 } else { 0 }),
        })
    }

    async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.shell
            .state
            .lock()
            .unwrap()
            .log
            .push(format!("{}: put {} {remote}", self.machine, local.display()));
        Ok(())
    }

    async fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        self.shell
            .state
            .lock()
            .unwrap()
            .log
            .push(format!("{}: get {remote} {}", self.machine, local.display()));
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<()> {
        let mut state = self.shell.state.lock().unwrap();
        state.log.push(format!("{}: disconnect", self.machine));
        if state.broken_teardown {
            return Err(Error::Io(std::io::Error::other("control socket gone")));
        }
        Ok(())
    }
}

// ── Helpers ──

/// Engine config with instant retries.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        discovery: RetryPolicy::new(5, Duration::ZERO),
        connect: RetryPolicy::once(),
        ..EngineConfig::default()
    }
}

pub fn orchestrator(doc: Value, cloud: Arc<FakeCloud>, shell: FakeShell) -> Orchestrator {
    orchestrator_with(doc, cloud, shell, fast_config())
}

pub fn orchestrator_with(doc: Value, cloud: Arc<FakeCloud>, shell: FakeShell, config: EngineConfig) -> Orchestrator {
    let formation = Formation::from_value(doc).unwrap();
    Orchestrator::new(formation, cloud, Arc::new(shell), config)
}

/// The web / db0 / db1 formation used across scenarios.
pub fn three_machines() -> Value {
    json!({
        "config": { "keyName": "deploy" },
        "machines": {
            "web": { "__boot__": ["web-setup"] },
            "db": [
                { "__boot__": ["db-setup"] },
                { "__boot__": ["db-setup"] },
            ],
        },
        "scripts": {
            "default": ["echo hi"],
            "web-setup": ["echo upstream <% print(i.db0.ip) %>"],
            "db-setup": ["echo db <% print(this.name) %>", "echo ready"],
        },
    })
}

pub fn by_machine(log: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in log {
        if let Some((machine, event)) = line.split_once(": ") {
            out.entry(machine.to_string()).or_default().push(event.to_string());
        }
    }
    out
}
