pub mod config;
pub mod error;
pub mod eval;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod template;

pub use config::EngineConfig;
pub use error::{Error, MachineFailure, Result};
pub use orchestrator::{BootReport, MachineStatus, Orchestrator};
pub use registry::{Discovery, Registry};
pub use template::Formation;
