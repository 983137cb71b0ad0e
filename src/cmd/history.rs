//! Round history commands: `stagegate history`, `stagegate verify`.

use anyhow::Result;

use stagegate::gates::GateKey;
use stagegate::handle::EngineHandle;
use stagegate::history::{RoundSnapshot, SnapshotOutcome};

use super::parse_entity_id;

pub async fn cmd_history(
    handle: &EngineHandle,
    entity: &str,
    gate: Option<GateKey>,
    json: bool,
) -> Result<()> {
    let id = parse_entity_id(entity)?;

    if json && gate.is_none() {
        let export = handle
            .call(move |engine| Ok(engine.export_history(id)?))
            .await?;
        println!("{}", export);
        return Ok(());
    }

    let snapshots = handle
        .call(move |engine| {
            let snapshots = match gate {
                Some(gate) => engine.round_history(id, gate)?,
                None => {
                    let entity = engine.load(id)?;
                    let mut all = Vec::new();
                    for state in &entity.gates {
                        all.extend(engine.round_history(id, state.gate)?);
                    }
                    all
                }
            };
            Ok(snapshots)
        })
        .await?;

    if json {
        println!("{}", stagegate::history::export_json(&snapshots)?);
        return Ok(());
    }
    if snapshots.is_empty() {
        println!("No closed rounds.");
        return Ok(());
    }
    for snapshot in &snapshots {
        print_snapshot(snapshot);
    }
    Ok(())
}

pub async fn cmd_verify(handle: &EngineHandle, entity: &str) -> Result<()> {
    let id = parse_entity_id(entity)?;
    let intact = handle
        .call(move |engine| Ok(engine.verify_history(id)?))
        .await?;
    if intact {
        println!("{}", console::style("History chain intact").green());
        Ok(())
    } else {
        anyhow::bail!("History chain for {} is broken", id)
    }
}

fn print_snapshot(snapshot: &RoundSnapshot) {
    let outcome = match snapshot.outcome {
        SnapshotOutcome::Approved => console::style(snapshot.outcome.as_str()).green(),
        SnapshotOutcome::Returned => console::style(snapshot.outcome.as_str()).yellow(),
        SnapshotOutcome::Rejected => console::style(snapshot.outcome.as_str()).red(),
    };
    println!(
        "{} execution {} round {} ({}, rule {}): {}  closed {}",
        snapshot.gate,
        snapshot.execution,
        snapshot.round_index + 1,
        snapshot.round_id,
        snapshot.rule,
        outcome,
        snapshot.closed_at.format("%Y-%m-%d %H:%M:%S")
    );
    for decision in &snapshot.decisions {
        match &decision.comment {
            Some(comment) => println!(
                "    {:<12} {:<8} {}",
                decision.actor_id,
                decision.outcome.as_str(),
                comment
            ),
            None => println!("    {:<12} {}", decision.actor_id, decision.outcome.as_str()),
        }
    }
}
