use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Provision and boot a formation of machines from one template.
#[derive(Parser)]
#[command(name = "formation")]
#[command(version)]
pub struct Cli {
    /// Formation document, JSON or YAML
    #[arg(short, long, global = true, env = "FORMATION_TEMPLATE", default_value = "formation.json")]
    pub template: PathBuf,

    /// How commands reach the machines
    #[arg(long, global = true, env = "FORMATION_SHELL", value_enum, default_value = "docker")]
    pub shell: ShellKind,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShellKind {
    /// Exec into the container through the Docker Engine API
    Docker,
    /// OpenSSH with a control master per session
    Ssh,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check the template for duplicate names and missing boot scripts
    Lint,
    /// Show every declared machine with its live instance
    Status,
    /// Create missing machines, then boot them
    Deploy,
    /// Run a script, or a literal command, on live machines
    Run {
        /// Script name from the template, or a command line
        script: String,
        /// Target machines (every live machine when omitted)
        machines: Vec<String>,
    },
    /// Terminate every live machine of the formation
    Terminate,
    /// Start a stopped instance
    Start {
        /// Provider instance id
        id: String,
    },
    /// Stop a running instance
    Stop {
        /// Provider instance id
        id: String,
    },
    /// Terminate one instance, declared or not
    Rm {
        /// Provider instance id
        id: String,
    },
    /// List every instance the provider reports
    Ls,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_takes_script_then_targets() {
        let cli = Cli::try_parse_from(["formation", "run", "db-setup", "db0", "db1"]).unwrap();
        match cli.command {
            Command::Run { script, machines } => {
                assert_eq!(script, "db-setup");
                assert_eq!(machines, vec!["db0", "db1"]);
            }
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["formation", "status", "--shell", "ssh", "-t", "prod.yml", "--json"]).unwrap();
        assert_eq!(cli.shell, ShellKind::Ssh);
        assert_eq!(cli.template, PathBuf::from("prod.yml"));
        assert!(cli.json);
    }

    #[test]
    fn lifecycle_commands_take_an_instance_id() {
        let cli = Cli::try_parse_from(["formation", "rm", "c0ffee"]).unwrap();
        assert!(matches!(cli.command, Command::Rm { ref id } if id == "c0ffee"));
        assert!(Cli::try_parse_from(["formation", "start"]).is_err());
    }

    #[test]
    fn unknown_shell_is_rejected() {
        assert!(Cli::try_parse_from(["formation", "ls", "--shell", "telnet"]).is_err());
    }
}
