//! Approval tasks: the current round's seats projected onto concrete
//! accounts. Tasks are derived on demand and never stored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::ApproverDirectory;
use crate::entity::GovernedEntity;
use crate::gates::GateKey;
use crate::rule::{ApprovalRule, RequirementPolicy, seat_votes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    /// The account voted, or another holder of the same seat did.
    Decided,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub entity_id: Uuid,
    pub entity_version: u64,
    pub gate: GateKey,
    pub round_index: usize,
    pub rule: ApprovalRule,
    pub requirement_id: String,
    pub account_id: String,
    pub status: TaskStatus,
}

/// Tasks for every pending gate of `entity` with an open round.
pub fn materialize(
    entity: &GovernedEntity,
    directory: &dyn ApproverDirectory,
    policy: RequirementPolicy,
) -> Vec<ApprovalTask> {
    let mut tasks = Vec::new();
    for state in entity.pending_gates() {
        let Some(round) = &state.active_round else {
            continue;
        };
        let seats = entity.seats(round, directory, policy);
        let votes = seat_votes(&seats, &state.decisions);
        for (seat, vote) in seats.iter().zip(votes) {
            let seat_filled = vote.is_some();
            for account in &seat.accounts {
                let status = if seat_filled || state.has_decided(account) {
                    TaskStatus::Decided
                } else {
                    TaskStatus::Pending
                };
                tasks.push(ApprovalTask {
                    entity_id: entity.id,
                    entity_version: entity.version,
                    gate: state.gate,
                    round_index: state.round_index,
                    rule: round.rule,
                    requirement_id: seat.requirement_id.clone(),
                    account_id: account.clone(),
                    status,
                });
            }
        }
    }
    tasks
}
