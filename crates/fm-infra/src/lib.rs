pub mod docker;
pub mod entities;
pub mod mapper;
pub mod retry;
pub mod shell;
pub mod types;

use std::path::Path;

use async_trait::async_trait;
use types::{CommandOutput, Instance, InstanceFilter, InstanceId, LaunchSpec};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("docker provider error: {0}")]
    Docker(#[from] docker_api::Error),

    #[error("cannot map an empty {entity} record")]
    EmptyRecord { entity: &'static str },

    #[error("cannot decode {entity}: {reason}")]
    Decode { entity: &'static str, reason: String },

    #[error("expected exactly one instance matching {filter}, found {found}")]
    NotExactlyOne { filter: String, found: usize },

    #[error("instance {instance} has no routable address")]
    MissingAddress { instance: String },

    #[error("could not connect to {target} after {attempts} attempts: {reason}")]
    Connect {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("file transfer with {target} failed: {reason}")]
    Transfer { target: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("instance {instance} is not running")]
    NotRunning { instance: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Backend-agnostic interface for the provisioning collaborator.
///
/// Lifecycle calls return the instance as re-resolved from the provider
/// after the call.
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    /// Create and start an instance for one machine spec.
    async fn create(&self, spec: &LaunchSpec) -> Result<Instance>;

    /// List instances whose fields match every field set in `filter`.
    async fn find(&self, filter: &InstanceFilter) -> Result<Vec<Instance>>;

    async fn start(&self, id: &InstanceId) -> Result<Instance>;

    async fn stop(&self, id: &InstanceId) -> Result<Instance>;

    async fn terminate(&self, id: &InstanceId) -> Result<Instance>;

    /// Provider identifier.
    fn name(&self) -> &'static str;

    async fn find_one(&self, filter: &InstanceFilter) -> Result<Instance> {
        let mut found = self.find(filter).await?;
        if found.len() != 1 {
            return Err(Error::NotExactlyOne {
                filter: filter.to_string(),
                found: found.len(),
            });
        }
        Ok(found.remove(0))
    }

    async fn by_id(&self, id: &InstanceId) -> Result<Instance> {
        self.find_one(&InstanceFilter::id(id)).await
    }

    async fn by_name(&self, name: &str) -> Result<Vec<Instance>> {
        self.find(&InstanceFilter::named(name)).await
    }
}

/// Remote-execution collaborator: opens one session per machine.
#[async_trait]
pub trait RemoteShell: Send + Sync + 'static {
    /// Open a session, retrying the initial connection per the shell's
    /// connect policy.
    async fn connect(&self, instance: &Instance) -> Result<Box<dyn Session>>;

    fn name(&self) -> &'static str;
}

/// A live connection to one machine, reused for consecutive commands.
#[async_trait]
pub trait Session: Send {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    async fn put(&mut self, local: &Path, remote: &str) -> Result<()>;

    async fn get(&mut self, remote: &str, local: &Path) -> Result<()>;

    async fn disconnect(self: Box<Self>) -> Result<()>;
}
