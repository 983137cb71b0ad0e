//! Configuration view and validation commands: `stagegate config`.

use anyhow::Result;
use std::path::Path;

use stagegate::gates::{EntityKind, GateKey};
use stagegate::settings::{CONFIG_FILE, DATABASE_ENV, Settings};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = project_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, project_dir.display());
                println!("Using default configuration.");
            }
            println!();

            let settings = Settings::load_or_default(project_dir)?;
            println!("[engine]");
            println!(
                "  auto_approve_empty_gates = {}",
                settings.engine.auto_approve_empty_gates
            );
            println!("  per_requirement = \"{}\"", settings.engine.per_requirement);
            println!("  allow_resubmission = {}", settings.engine.allow_resubmission);
            println!();

            println!("[storage]");
            println!("  database = \"{}\"", settings.storage.database.display());
            println!();

            println!("[logging]");
            println!("  level = \"{}\"", settings.logging.level);
            println!("  json = {}", settings.logging.json);
            if let Some(file) = &settings.logging.file {
                println!("  file = \"{}\"", file.display());
            }
            println!();

            if !settings.directory.roles.is_empty() {
                println!("[directory.roles]");
                for (role, accounts) in &settings.directory.roles {
                    println!("  {} = [{}]", role, accounts.join(", "));
                }
                println!();
            }

            for workstream in settings.workstreams()? {
                println!(
                    "{} ({})",
                    console::style(&workstream.name).bold(),
                    workstream.id
                );
                for gate in EntityKind::Initiative.gates() {
                    print_gate(*gate, workstream.gates.rounds(*gate).len());
                }
                println!();
            }

            println!("Effective values (with env overrides):");
            println!(
                "  database = \"{}\"",
                settings.database_path(project_dir).display()
            );
            if std::env::var(DATABASE_ENV).is_ok() {
                println!("  ({} is set)", DATABASE_ENV);
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let settings = Settings::load(&config_path)?;
            let warnings = settings.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}

fn print_gate(gate: GateKey, rounds: usize) {
    if rounds == 0 {
        println!("  {}: {}", gate, console::style("no rounds").dim());
    } else {
        println!("  {}: {} round(s)", gate, rounds);
    }
}
