//! CLI command implementations.
//!
//! | Module     | Commands handled                                          |
//! |------------|-----------------------------------------------------------|
//! | `project`  | `Init`                                                    |
//! | `config`   | `Config`                                                  |
//! | `entity`   | `CreateInitiative`, `CreateEvaluation`, `Show`, `List`, `Invitation`, `Remove` |
//! | `gate`     | `Submit`, `Decide`, `Progress`                            |
//! | `tasks`    | `Tasks`                                                   |
//! | `history`  | `History`, `Verify`                                       |

pub mod config;
pub mod entity;
pub mod gate;
pub mod history;
pub mod project;
pub mod tasks;

pub use config::cmd_config;
pub use entity::{
    cmd_create_evaluation, cmd_create_initiative, cmd_invitation, cmd_list, cmd_remove, cmd_show,
};
pub use gate::{DecideArgs, cmd_decide, cmd_progress, cmd_submit};
pub use history::{cmd_history, cmd_verify};
pub use project::cmd_init;
pub use tasks::cmd_tasks;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use stagegate::engine::ApprovalEngine;
use stagegate::handle::EngineHandle;
use stagegate::notify::LogNotifier;
use stagegate::settings::Settings;
use stagegate::store::SqliteStore;
use stagegate::workstream::GateConfigResolver;

/// Build the engine over the project's SQLite database.
pub fn open_engine(project_dir: &Path, settings: &Settings) -> Result<EngineHandle> {
    let db_path = settings.database_path(project_dir);
    let store = SqliteStore::new(&db_path)?;
    let resolver = GateConfigResolver::new(settings.workstreams()?);
    tracing::debug!(database = %db_path.display(), "Engine opened");
    Ok(EngineHandle::new(ApprovalEngine::new(
        Arc::new(store),
        Arc::new(settings.directory()),
        Arc::new(LogNotifier),
        resolver,
        settings.engine_options(),
    )))
}

pub(crate) fn parse_entity_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("Invalid entity id '{}'", raw))
}

/// The caller's expected version, or the stored one when none was given.
pub(crate) async fn resolve_version(
    handle: &EngineHandle,
    id: Uuid,
    expected: Option<u64>,
) -> Result<u64> {
    match expected {
        Some(version) => Ok(version),
        None => {
            handle
                .call(move |engine| Ok(engine.load(id)?.version))
                .await
        }
    }
}
