use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("template error: {0}")]
    Template(String),

    #[error("duplicate machine name \"{0}\" after expansion")]
    DuplicateMachine(String),

    #[error("script \"{script}\" booted by machine \"{machine}\" not found in formation")]
    MissingScript { machine: String, script: String },

    #[error("non-array \"__boot__\" found for machine \"{machine}\"")]
    InvalidBoot { machine: String },

    #[error("invalid evaluation context: {0}")]
    Context(String),

    #[error("invalid command {0}")]
    InvalidCommand(String),

    #[error("expression parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("expression error: {0}")]
    Eval(String),

    #[error("instance discovery failed after {attempts} attempts: {source}")]
    Discovery {
        attempts: u32,
        #[source]
        source: fm_infra::Error,
    },

    #[error("instance \"{machine}\" has no routable address")]
    MissingAddress { machine: String },

    #[error("no live instance for machine \"{0}\"")]
    UnknownMachine(String),

    #[error("command failed on \"{machine}\" (exit {}): {command}", display_code(.exit_code))]
    RemoteExecution {
        machine: String,
        command: String,
        exit_code: Option<i64>,
        output: String,
    },

    #[error("script \"{script}\" failed on machine \"{machine}\": {source}")]
    ScriptFailed {
        machine: String,
        script: String,
        #[source]
        source: Box<Error>,
    },

    #[error("default phase failed on {}", MachineFailure::summary(.0))]
    DefaultPhase(Vec<MachineFailure>),

    #[error("run failed on {}", MachineFailure::summary(.0))]
    Targets(Vec<MachineFailure>),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid config: {0}")]
    Config(String),

    #[error("infra error: {0}")]
    Infra(#[from] fm_infra::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One machine's failure inside a parallel batch.
#[derive(Debug)]
pub struct MachineFailure {
    pub machine: String,
    pub error: Error,
}

impl MachineFailure {
    fn summary(failures: &[MachineFailure]) -> String {
        failures
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for MachineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.machine, self.error)
    }
}

fn display_code(code: &Option<i64>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}
