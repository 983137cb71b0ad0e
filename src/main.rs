use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stagegate::decision::DecisionOutcome;
use stagegate::evaluation::InvitationStatus;
use stagegate::gates::GateKey;
use stagegate::settings::Settings;

mod cmd;

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(version, about = "Stage-gate approval engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory holding stagegate.toml (defaults to the current directory)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter stagegate.toml and create the database
    Init {
        /// Overwrite an existing stagegate.toml
        #[arg(long)]
        force: bool,
    },
    /// Create an initiative governed by a workstream
    CreateInitiative {
        title: String,
        #[arg(short, long)]
        workstream: String,
    },
    /// Create a candidate evaluation from a roster file
    CreateEvaluation {
        /// TOML file with candidate, criteria and interview rounds
        #[arg(long)]
        roster: PathBuf,
    },
    /// Submit (or resubmit) the entity's active gate
    Submit {
        entity: String,
        /// Version you last saw; defaults to the stored version
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Record a decision on the current round of a gate
    Decide {
        entity: String,
        gate: GateKey,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        outcome: DecisionOutcome,
        /// Required for return and reject
        #[arg(long)]
        comment: Option<String>,
        /// Criterion score as criterion=score[:note] (evaluations only)
        #[arg(long = "score")]
        scores: Vec<String>,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// List open approval tasks for an account
    Tasks { account: String },
    /// Show closed rounds of an entity
    History {
        entity: String,
        /// Only this gate
        gate: Option<GateKey>,
        /// Print the lossless JSON export
        #[arg(long)]
        json: bool,
    },
    /// Verify the digest chain of an entity's round history
    Verify { entity: String },
    /// Show an entity and its gates
    Show { entity: String },
    /// Show the open round of a gate
    Progress { entity: String, gate: GateKey },
    /// List all entities
    List,
    /// Record an interviewer's invitation status
    Invitation {
        entity: String,
        slot: String,
        status: InvitationStatus,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Delete an entity (its history is kept)
    Remove {
        entity: String,
        #[arg(long)]
        expected_version: u64,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    dotenvy::from_path(project_dir.join(".env")).ok();

    let settings = Settings::load_or_default(&project_dir)?;
    let mut logging = settings.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    let _log_guard = stagegate::logging::init(&logging)?;

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&project_dir, *force)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        command => {
            let handle = cmd::open_engine(&project_dir, &settings)?;
            match command {
                Commands::CreateInitiative { title, workstream } => {
                    cmd::cmd_create_initiative(&handle, title, workstream).await?
                }
                Commands::CreateEvaluation { roster } => {
                    cmd::cmd_create_evaluation(&handle, roster).await?
                }
                Commands::Submit {
                    entity,
                    expected_version,
                } => cmd::cmd_submit(&handle, entity, *expected_version).await?,
                Commands::Decide {
                    entity,
                    gate,
                    actor,
                    outcome,
                    comment,
                    scores,
                    expected_version,
                } => {
                    cmd::cmd_decide(
                        &handle,
                        cmd::DecideArgs {
                            entity: entity.clone(),
                            gate: *gate,
                            actor: actor.clone(),
                            outcome: *outcome,
                            comment: comment.clone(),
                            scores: scores.clone(),
                            expected_version: *expected_version,
                        },
                    )
                    .await?
                }
                Commands::Tasks { account } => cmd::cmd_tasks(&handle, account).await?,
                Commands::History { entity, gate, json } => {
                    cmd::cmd_history(&handle, entity, *gate, *json).await?
                }
                Commands::Verify { entity } => cmd::cmd_verify(&handle, entity).await?,
                Commands::Show { entity } => cmd::cmd_show(&handle, entity).await?,
                Commands::Progress { entity, gate } => {
                    cmd::cmd_progress(&handle, entity, *gate).await?
                }
                Commands::List => cmd::cmd_list(&handle).await?,
                Commands::Invitation {
                    entity,
                    slot,
                    status,
                    expected_version,
                } => cmd::cmd_invitation(&handle, entity, slot, *status, *expected_version).await?,
                Commands::Remove {
                    entity,
                    expected_version,
                } => cmd::cmd_remove(&handle, entity, *expected_version).await?,
                Commands::Init { .. } | Commands::Config { .. } => {}
            }
        }
    }

    Ok(())
}
