//! Project setup: `stagegate init`.

use anyhow::{Context, Result};
use std::path::Path;

use stagegate::settings::{CONFIG_FILE, Settings};
use stagegate::store::SqliteStore;

pub fn cmd_init(project_dir: &Path, force: bool) -> Result<()> {
    let config_path = project_dir.join(CONFIG_FILE);
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite it.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(project_dir)
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;
    let settings = Settings::starter();
    settings.save(&config_path)?;

    let db_path = settings.database_path(project_dir);
    SqliteStore::new(&db_path)?;

    println!(
        "{} {}",
        console::style("Created").green().bold(),
        config_path.display()
    );
    println!("Database: {}", db_path.display());
    println!();
    println!("Edit [[workstreams]] and [directory.roles] to describe your approvers.");
    Ok(())
}
