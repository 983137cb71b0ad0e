//! Gate commands: submission, decisions, round progress.

use anyhow::{Context, Result};

use stagegate::decision::DecisionOutcome;
use stagegate::engine::DecisionRequest;
use stagegate::evaluation::CriterionScore;
use stagegate::gates::GateKey;
use stagegate::handle::EngineHandle;
use stagegate::tracker::GateStatus;

use super::{parse_entity_id, resolve_version};

pub struct DecideArgs {
    pub entity: String,
    pub gate: GateKey,
    pub actor: String,
    pub outcome: DecisionOutcome,
    pub comment: Option<String>,
    pub scores: Vec<String>,
    pub expected_version: Option<u64>,
}

pub async fn cmd_submit(
    handle: &EngineHandle,
    entity: &str,
    expected_version: Option<u64>,
) -> Result<()> {
    let id = parse_entity_id(entity)?;
    let version = resolve_version(handle, id, expected_version).await?;
    let state = handle
        .call(move |engine| Ok(engine.submit(id, version)?))
        .await?;
    println!(
        "Submitted {} gate {}: {} (execution {}), version {}",
        id,
        state.gate,
        state.status,
        state.execution,
        version + 1
    );
    Ok(())
}

pub async fn cmd_decide(handle: &EngineHandle, args: DecideArgs) -> Result<()> {
    let id = parse_entity_id(&args.entity)?;
    let scores = args
        .scores
        .iter()
        .map(|raw| parse_score(raw))
        .collect::<Result<Vec<_>>>()?;
    let version = resolve_version(handle, id, args.expected_version).await?;

    let mut request = DecisionRequest::new(id, version, args.gate, &args.actor, args.outcome)
        .with_scores(scores);
    if let Some(comment) = args.comment {
        request = request.with_comment(comment);
    }
    let gate = args.gate;
    let entity = handle
        .call(move |engine| Ok(engine.decide(request)?))
        .await?;

    let state = entity.gate(gate)?;
    let status = match state.status {
        GateStatus::Approved => console::style(state.status.as_str()).green().bold(),
        GateStatus::Rejected => console::style(state.status.as_str()).red().bold(),
        GateStatus::Returned => console::style(state.status.as_str()).yellow().bold(),
        _ => console::style(state.status.as_str()).cyan(),
    };
    println!(
        "Recorded {} by {} on {}: gate {} (round {}), version {}",
        args.outcome,
        args.actor,
        gate,
        status,
        state.round_index + 1,
        entity.version
    );
    match entity.active_gate {
        Some(active) if active != gate => println!("Stage advanced to {}", active),
        None => println!("All gates approved"),
        _ => {}
    }
    Ok(())
}

pub async fn cmd_progress(handle: &EngineHandle, entity: &str, gate: GateKey) -> Result<()> {
    let id = parse_entity_id(entity)?;
    let progress = handle
        .call(move |engine| Ok(engine.round_progress(id, gate)?))
        .await?;

    println!();
    println!(
        "{} {} ({})",
        console::style("Gate").bold(),
        progress.gate,
        progress.status
    );
    println!(
        "  round {} of {} (execution {})",
        progress.round_index + 1,
        progress.round_count,
        progress.execution
    );
    if let Some(rule) = progress.rule {
        println!("  rule:        {}", rule);
        println!("  approvals:   {}", progress.tally.approvals);
        println!("  objections:  {}", progress.tally.objections);
        println!("  outstanding: {}", progress.tally.outstanding());
    }
    if progress.is_stuck() {
        println!(
            "  {} no eligible approver is left to decide this round",
            console::style("stuck:").red().bold()
        );
    }
    println!();
    Ok(())
}

/// `criterion=score` or `criterion=score:note`.
fn parse_score(raw: &str) -> Result<CriterionScore> {
    let (criterion, rest) = raw
        .split_once('=')
        .with_context(|| format!("Invalid score '{}': expected criterion=score", raw))?;
    let (score, note) = match rest.split_once(':') {
        Some((score, note)) => (score, Some(note.trim().to_string())),
        None => (rest, None),
    };
    let score = score
        .trim()
        .parse::<u8>()
        .with_context(|| format!("Invalid score '{}': score must be a number", raw))?;
    Ok(CriterionScore {
        criterion: criterion.trim().to_string(),
        score,
        note: note.filter(|n| !n.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_score() {
        let score = parse_score("design=4").unwrap();
        assert_eq!(score.criterion, "design");
        assert_eq!(score.score, 4);
        assert!(score.note.is_none());

        let score = parse_score("coding = 3: solid tests").unwrap();
        assert_eq!(score.score, 3);
        assert_eq!(score.note.as_deref(), Some("solid tests"));

        assert!(parse_score("design").is_err());
        assert!(parse_score("design=high").is_err());
    }
}
