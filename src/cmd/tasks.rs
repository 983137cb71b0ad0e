//! Approval queue: `stagegate tasks`.

use anyhow::Result;

use stagegate::handle::EngineHandle;

pub async fn cmd_tasks(handle: &EngineHandle, account: &str) -> Result<()> {
    let account_id = account.to_string();
    let tasks = handle
        .call(move |engine| Ok(engine.pending_tasks(&account_id)?))
        .await?;

    if tasks.is_empty() {
        println!("No pending tasks for {}", account);
        return Ok(());
    }
    println!("{}", console::style(format!("Pending tasks for {}", account)).bold());
    for task in tasks {
        println!(
            "  {}  {:<9} round {}  rule {:<8} v{}  ({})",
            task.entity_id,
            task.gate.as_str(),
            task.round_index + 1,
            task.rule.as_str(),
            task.entity_version,
            task.requirement_id
        );
    }
    Ok(())
}
