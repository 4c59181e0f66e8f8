mod cli;
mod config;
mod error;

use std::process::ExitCode;

use clap::Parser;
use fm_engine::orchestrator::{BootReport, MachineStatus};
use fm_engine::runner::RunResult;
use fm_engine::{Formation, Orchestrator};
use fm_infra::types::{Instance, InstanceId};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::config::CliConfig;
use crate::error::Result;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let mut chain = e.chain().into_iter();
            if let Some(head) = chain.next() {
                eprintln!("error: {head}");
            }
            for cause in chain {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = CliConfig::from_cli(&cli)?;
    let formation = Formation::load(&config.template)?;

    if let Command::Lint = cli.command {
        formation.lint()?;
        println!(
            "{}: {} machines, {} scripts",
            config.template.display(),
            formation.machines.len(),
            formation.scripts.len()
        );
        return Ok(());
    }

    let orch = config.orchestrator(formation)?;
    cancel_on_ctrl_c(&orch);

    match cli.command {
        Command::Lint => {}
        Command::Status => print_status(&orch.status().await?, cli.json)?,
        Command::Deploy => print_boot(&orch.deploy().await?),
        Command::Run { script, machines } => print_runs(&orch.run(&script, &machines).await?),
        Command::Terminate => {
            for instance in orch.terminate().await? {
                println!("terminated {} ({})", instance.name, instance.id);
            }
        }
        Command::Start { id } => print_instances(&[orch.start(&InstanceId(id)).await?], cli.json)?,
        Command::Stop { id } => print_instances(&[orch.stop(&InstanceId(id)).await?], cli.json)?,
        Command::Rm { id } => {
            let instance = orch.remove(&InstanceId(id)).await?;
            println!("terminated {} ({})", instance.name, instance.id);
        }
        Command::Ls => print_instances(&orch.ls().await?, cli.json)?,
    }
    Ok(())
}

/// First Ctrl-C stops the run at its next serial step.
fn cancel_on_ctrl_c(orch: &Orchestrator) {
    let cancel = orch.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });
}

fn print_status(machines: &[MachineStatus], as_json: bool) -> Result<()> {
    if as_json {
        let rows: Vec<_> = machines
            .iter()
            .map(|m| {
                json!({
                    "name": m.name,
                    "type": m.instance_type,
                    "region": m.region,
                    "keyName": m.key_name,
                    "instance": m.instance,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<16} {:<12} {:<12} {:<11} {:<16} ID", "NAME", "TYPE", "REGION", "STATE", "ADDRESS");
    for m in machines {
        let (state, address, id) = match &m.instance {
            Some(i) => (i.state.as_str(), i.address().unwrap_or("-"), i.id.0.as_str()),
            None => ("absent", "-", "-"),
        };
        println!(
            "{:<16} {:<12} {:<12} {:<11} {:<16} {id}",
            m.name, m.instance_type, m.region, state, address
        );
    }
    Ok(())
}

fn print_instances(instances: &[Instance], as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(instances)?);
        return Ok(());
    }

    println!("{:<16} {:<11} {:<16} ID", "NAME", "STATE", "ADDRESS");
    for i in instances {
        println!(
            "{:<16} {:<11} {:<16} {}",
            i.name,
            i.state.as_str(),
            i.address().unwrap_or("-"),
            i.id
        );
    }
    Ok(())
}

fn print_boot(report: &BootReport) {
    if report.default.is_empty() && report.scripts.is_empty() {
        println!("nothing to boot");
        return;
    }
    print_runs(&report.default);
    print_runs(&report.scripts);
    println!("boot {} finished", report.run_id);
}

fn print_runs(runs: &[RunResult]) {
    for run in runs {
        for line in &run.lines {
            for out in line.stdout.lines() {
                println!("[{}] {out}", run.machine);
            }
        }
        println!("{}: {} ok ({} commands)", run.machine, run.script, run.lines.len());
    }
}
