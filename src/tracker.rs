//! Per-gate runtime state and its state machine.
//!
//! ```text
//!   draft ──submit──> pending ──satisfied, more rounds──> pending (round + 1)
//!                        │
//!                        ├──satisfied, last round──> approved
//!                        ├──rejected, any reject──> rejected ─┐
//!                        └──rejected, returns only──> returned ─┴─submit──> pending (round 0)
//! ```
//!
//! The tracker is pure state; the engine decides which round comes next and
//! persists the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decision::{Decision, DecisionOutcome};
use crate::errors::{EngineError, EngineResult};
use crate::gates::GateKey;
use crate::history::{RoundSnapshot, SnapshotOutcome};
use crate::rule::{RoundOutcome, Seat};
use crate::workstream::ApprovalRound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    #[default]
    Draft,
    Pending,
    Approved,
    Returned,
    Rejected,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Returned => "returned",
            Self::Rejected => "rejected",
        }
    }

    /// States from which a submission opens a fresh execution.
    pub fn is_submittable(&self) -> bool {
        matches!(self, Self::Draft | Self::Returned | Self::Rejected)
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRuntimeState {
    pub gate: GateKey,
    pub status: GateStatus,
    pub round_index: usize,
    pub comment: Option<String>,
    /// Number of times this gate has been submitted; 0 while still draft.
    pub execution: u32,
    /// Configuration of the open round, copied when it opened.
    pub active_round: Option<ApprovalRound>,
    pub round_opened_at: Option<DateTime<Utc>>,
    /// Decisions cast in the open round, in arrival order.
    pub decisions: Vec<Decision>,
}

/// What a round evaluation did to the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Round still open; only the decision was recorded.
    Recorded,
    RoundAdvanced { closed: RoundSnapshot },
    Approved { closed: RoundSnapshot },
    Closed {
        status: GateStatus,
        closed: RoundSnapshot,
    },
}

impl Transition {
    pub fn closed_round(&self) -> Option<&RoundSnapshot> {
        match self {
            Self::Recorded => None,
            Self::RoundAdvanced { closed }
            | Self::Approved { closed }
            | Self::Closed { closed, .. } => Some(closed),
        }
    }
}

impl GateRuntimeState {
    pub fn draft(gate: GateKey) -> Self {
        Self {
            gate,
            status: GateStatus::Draft,
            round_index: 0,
            comment: None,
            execution: 0,
            active_round: None,
            round_opened_at: None,
            decisions: Vec::new(),
        }
    }

    /// Start a new execution at round 0. Prior decisions are discarded (the
    /// closed rounds already live in history); a return comment is kept so
    /// approvers can see what was asked for.
    pub fn open(&mut self, first_round: Option<ApprovalRound>, now: DateTime<Utc>) {
        self.status = GateStatus::Pending;
        self.round_index = 0;
        self.execution += 1;
        self.decisions.clear();
        self.round_opened_at = first_round.as_ref().map(|_| now);
        self.active_round = first_round;
    }

    /// Open the current round lazily, for a gate that entered pending while
    /// its configuration had no rounds.
    pub fn open_round(&mut self, round: ApprovalRound, now: DateTime<Utc>) {
        self.active_round = Some(round);
        self.round_opened_at = Some(now);
    }

    /// Close a gate that has no rounds to run under the auto-approve policy.
    pub fn auto_approve(&mut self) {
        self.status = GateStatus::Approved;
        self.comment = None;
        self.active_round = None;
        self.round_opened_at = None;
    }

    pub fn has_decided(&self, actor: &str) -> bool {
        self.decisions.iter().any(|d| d.actor_id == actor)
    }

    pub fn record(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }

    /// Apply a round outcome. `next_round` is the configuration of the round
    /// after the current one, if the gate has one.
    pub fn apply(
        &mut self,
        entity_id: Uuid,
        outcome: RoundOutcome,
        seats: &[Seat],
        next_round: Option<ApprovalRound>,
        now: DateTime<Utc>,
    ) -> EngineResult<Transition> {
        if self.status != GateStatus::Pending {
            return Err(EngineError::InvalidState(format!(
                "gate {} is {}, not pending",
                self.gate, self.status
            )));
        }

        match outcome {
            RoundOutcome::Pending => Ok(Transition::Recorded),
            RoundOutcome::Satisfied => {
                let closed = self.snapshot(entity_id, SnapshotOutcome::Approved, seats, now)?;
                match next_round {
                    Some(round) => {
                        self.round_index += 1;
                        self.decisions.clear();
                        self.active_round = Some(round);
                        self.round_opened_at = Some(now);
                        Ok(Transition::RoundAdvanced { closed })
                    }
                    None => {
                        self.status = GateStatus::Approved;
                        self.comment = None;
                        Ok(Transition::Approved { closed })
                    }
                }
            }
            RoundOutcome::Rejected => {
                let any_reject = self
                    .decisions
                    .iter()
                    .any(|d| d.outcome == DecisionOutcome::Reject);
                let (status, snapshot_outcome) = if any_reject {
                    (GateStatus::Rejected, SnapshotOutcome::Rejected)
                } else {
                    (GateStatus::Returned, SnapshotOutcome::Returned)
                };
                let closed = self.snapshot(entity_id, snapshot_outcome, seats, now)?;
                self.comment = self
                    .decisions
                    .iter()
                    .rev()
                    .find(|d| !d.outcome.is_approval())
                    .and_then(|d| d.comment.clone());
                self.status = status;
                Ok(Transition::Closed { status, closed })
            }
        }
    }

    fn snapshot(
        &self,
        entity_id: Uuid,
        outcome: SnapshotOutcome,
        seats: &[Seat],
        now: DateTime<Utc>,
    ) -> EngineResult<RoundSnapshot> {
        let round = self.active_round.as_ref().ok_or_else(|| {
            EngineError::InvalidState(format!("gate {} has no open round", self.gate))
        })?;
        Ok(RoundSnapshot {
            entity_id,
            gate: self.gate,
            execution: self.execution,
            round_index: self.round_index,
            round_id: round.id.clone(),
            rule: round.rule,
            approvers: round.approvers.clone(),
            seats: seats.to_vec(),
            decisions: self.decisions.clone(),
            outcome,
            opened_at: self.round_opened_at,
            closed_at: now,
            previous_digest: None,
            digest: String::new(),
        })
    }
}
