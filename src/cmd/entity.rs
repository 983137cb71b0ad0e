//! Entity lifecycle commands.

use anyhow::Result;
use std::path::Path;

use stagegate::entity::{GovernedEntity, Subject};
use stagegate::evaluation::InvitationStatus;
use stagegate::handle::EngineHandle;
use stagegate::settings::load_roster;
use stagegate::tracker::GateStatus;

use super::{parse_entity_id, resolve_version};

pub async fn cmd_create_initiative(
    handle: &EngineHandle,
    title: &str,
    workstream: &str,
) -> Result<()> {
    let title = title.to_string();
    let workstream = workstream.to_string();
    let entity = handle
        .call(move |engine| Ok(engine.create_initiative(&title, &workstream)?))
        .await?;
    println!(
        "Created initiative {} at version {}",
        entity.id, entity.version
    );
    Ok(())
}

pub async fn cmd_create_evaluation(handle: &EngineHandle, roster: &Path) -> Result<()> {
    let config = load_roster(roster)?;
    let entity = handle
        .call(move |engine| Ok(engine.create_evaluation(config)?))
        .await?;
    println!(
        "Created evaluation {} at version {}",
        entity.id, entity.version
    );
    Ok(())
}

pub async fn cmd_show(handle: &EngineHandle, entity: &str) -> Result<()> {
    let id = parse_entity_id(entity)?;
    let entity = handle.call(move |engine| Ok(engine.load(id)?)).await?;
    print_entity(&entity);
    Ok(())
}

pub async fn cmd_list(handle: &EngineHandle) -> Result<()> {
    let entities = handle.call(|engine| Ok(engine.list()?)).await?;
    if entities.is_empty() {
        println!("No entities.");
        return Ok(());
    }
    for entity in entities {
        let stage = entity
            .active_gate
            .map(|g| g.to_string())
            .unwrap_or_else(|| "complete".to_string());
        println!(
            "{}  {:<10} v{:<3} {:<9} {}",
            entity.id,
            entity.kind().as_str(),
            entity.version,
            stage,
            entity.label()
        );
    }
    Ok(())
}

pub async fn cmd_invitation(
    handle: &EngineHandle,
    entity: &str,
    slot: &str,
    status: InvitationStatus,
    expected_version: Option<u64>,
) -> Result<()> {
    let id = parse_entity_id(entity)?;
    let version = resolve_version(handle, id, expected_version).await?;
    let slot = slot.to_string();
    let entity = handle
        .call(move |engine| Ok(engine.update_invitation(id, version, &slot, status)?))
        .await?;
    println!("Invitation updated; {} is at version {}", entity.id, entity.version);
    Ok(())
}

pub async fn cmd_remove(handle: &EngineHandle, entity: &str, expected_version: u64) -> Result<()> {
    let id = parse_entity_id(entity)?;
    handle
        .call(move |engine| Ok(engine.remove(id, expected_version)?))
        .await?;
    println!("Removed {} (round history kept)", id);
    Ok(())
}

pub(crate) fn print_entity(entity: &GovernedEntity) {
    println!();
    println!(
        "{} {}",
        console::style(entity.label()).bold().cyan(),
        console::style(format!("({})", entity.kind())).dim()
    );
    println!("  id:      {}", entity.id);
    println!("  version: {}", entity.version);
    match &entity.subject {
        Subject::Initiative { workstream_id, .. } => {
            println!("  workstream: {}", workstream_id);
        }
        Subject::Evaluation(config) => {
            if let Some(position) = &config.position {
                println!("  position: {}", position);
            }
            println!("  process:  {}", config.process_status);
        }
    }
    match entity.active_gate {
        Some(gate) => println!("  stage:   {}", gate),
        None => println!("  stage:   {}", console::style("complete").green()),
    }
    println!();

    for state in &entity.gates {
        let status = match state.status {
            GateStatus::Approved => console::style(state.status.as_str()).green(),
            GateStatus::Rejected => console::style(state.status.as_str()).red(),
            GateStatus::Returned => console::style(state.status.as_str()).yellow(),
            GateStatus::Pending => console::style(state.status.as_str()).cyan(),
            GateStatus::Draft => console::style(state.status.as_str()).dim(),
        };
        print!("  {:<9} {}", state.gate.as_str(), status);
        if state.status == GateStatus::Pending {
            print!(
                "  round {} (execution {}, {} decision(s))",
                state.round_index + 1,
                state.execution,
                state.decisions.len()
            );
        }
        println!();
        if let Some(comment) = &state.comment {
            println!("            {}", console::style(comment).italic());
        }
    }
    println!();
}
