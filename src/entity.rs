//! Versioned governed entities: initiatives and interview evaluations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::ApproverDirectory;
use crate::errors::{EngineError, EngineResult};
use crate::evaluation::EvaluationConfig;
use crate::gates::{EntityKind, GateKey};
use crate::rule::{RequirementPolicy, Seat, resolve_seats};
use crate::tracker::{GateRuntimeState, GateStatus};
use crate::workstream::ApprovalRound;

/// What is being governed. Fixes the entity's gate pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Initiative { title: String, workstream_id: String },
    Evaluation(EvaluationConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernedEntity {
    pub id: Uuid,
    /// Incremented by exactly one on every committed mutation.
    pub version: u64,
    pub subject: Subject,
    /// Gate currently being worked; `None` once the last gate is approved.
    pub active_gate: Option<GateKey>,
    /// One runtime state per gate in the pipeline, in pipeline order.
    pub gates: Vec<GateRuntimeState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GovernedEntity {
    fn with_subject(subject: Subject) -> Self {
        let kind = match &subject {
            Subject::Initiative { .. } => EntityKind::Initiative,
            Subject::Evaluation(_) => EntityKind::Evaluation,
        };
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            version: 1,
            subject,
            active_gate: Some(kind.first_gate()),
            gates: kind
                .gates()
                .iter()
                .map(|g| GateRuntimeState::draft(*g))
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn initiative(title: impl Into<String>, workstream_id: impl Into<String>) -> Self {
        Self::with_subject(Subject::Initiative {
            title: title.into(),
            workstream_id: workstream_id.into(),
        })
    }

    pub fn evaluation(config: EvaluationConfig) -> Self {
        Self::with_subject(Subject::Evaluation(config))
    }

    pub fn kind(&self) -> EntityKind {
        match &self.subject {
            Subject::Initiative { .. } => EntityKind::Initiative,
            Subject::Evaluation(_) => EntityKind::Evaluation,
        }
    }

    pub fn label(&self) -> &str {
        match &self.subject {
            Subject::Initiative { title, .. } => title,
            Subject::Evaluation(config) => &config.candidate,
        }
    }

    pub fn evaluation_config(&self) -> Option<&EvaluationConfig> {
        match &self.subject {
            Subject::Evaluation(config) => Some(config),
            Subject::Initiative { .. } => None,
        }
    }

    pub fn evaluation_config_mut(&mut self) -> Option<&mut EvaluationConfig> {
        match &mut self.subject {
            Subject::Evaluation(config) => Some(config),
            Subject::Initiative { .. } => None,
        }
    }

    pub fn gate(&self, gate: GateKey) -> EngineResult<&GateRuntimeState> {
        self.gates
            .iter()
            .find(|g| g.gate == gate)
            .ok_or(EngineError::GateNotFound { gate })
    }

    pub fn gate_mut(&mut self, gate: GateKey) -> EngineResult<&mut GateRuntimeState> {
        self.gates
            .iter_mut()
            .find(|g| g.gate == gate)
            .ok_or(EngineError::GateNotFound { gate })
    }

    /// Gates whose current round is awaiting decisions.
    pub fn pending_gates(&self) -> impl Iterator<Item = &GateRuntimeState> {
        self.gates.iter().filter(|g| g.status == GateStatus::Pending)
    }

    /// All gates approved and nothing left to work.
    pub fn is_complete(&self) -> bool {
        self.active_gate.is_none()
    }

    /// Seats of `round` for this entity. An interviewer who declined keeps
    /// their seat but no longer resolves to an account, so the round's size
    /// does not change under it.
    pub fn seats(
        &self,
        round: &ApprovalRound,
        directory: &dyn ApproverDirectory,
        policy: RequirementPolicy,
    ) -> Vec<Seat> {
        let mut seats = resolve_seats(round, directory, policy);
        if let Some(config) = self.evaluation_config() {
            for seat in seats.iter_mut() {
                if config.is_declined(&seat.requirement_id) {
                    seat.accounts.clear();
                }
            }
        }
        seats
    }

    pub fn ensure_version(&self, expected: u64) -> EngineResult<()> {
        if self.version != expected {
            return Err(EngineError::VersionConflict {
                expected,
                actual: self.version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_initiative_has_six_draft_gates() {
        let entity = GovernedEntity::initiative("New market", "growth");
        assert_eq!(entity.version, 1);
        assert_eq!(entity.kind(), EntityKind::Initiative);
        assert_eq!(entity.active_gate, Some(GateKey::L0));
        assert_eq!(entity.gates.len(), 6);
        assert!(entity.gates.iter().all(|g| g.status == GateStatus::Draft));
        assert_eq!(entity.pending_gates().count(), 0);
    }

    #[test]
    fn test_new_evaluation_has_interview_gate() {
        let entity = GovernedEntity::evaluation(EvaluationConfig::new("Grace"));
        assert_eq!(entity.kind(), EntityKind::Evaluation);
        assert_eq!(entity.label(), "Grace");
        assert!(entity.gate(GateKey::Interview).is_ok());
        assert!(matches!(
            entity.gate(GateKey::L0),
            Err(EngineError::GateNotFound { .. })
        ));
    }

    #[test]
    fn test_ensure_version() {
        let entity = GovernedEntity::initiative("x", "w");
        assert!(entity.ensure_version(1).is_ok());
        assert!(matches!(
            entity.ensure_version(0),
            Err(EngineError::VersionConflict {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_declined_interviewer_keeps_empty_seat() {
        use crate::directory::StaticDirectory;
        use crate::evaluation::{InterviewRound, InterviewerSlot, InvitationStatus};
        use crate::rule::ApprovalRule;

        let slot = |id: &str, account: &str| InterviewerSlot {
            id: id.into(),
            account_id: account.into(),
            invitation: InvitationStatus::Accepted,
        };
        let mut entity = GovernedEntity::evaluation(EvaluationConfig::new("Grace").with_round(
            InterviewRound {
                id: "tech".into(),
                name: None,
                rule: ApprovalRule::All,
                interviewers: vec![slot("s1", "ivan"), slot("s2", "judy")],
            },
        ));
        let round = entity.evaluation_config().unwrap().approval_rounds().remove(0);
        entity
            .evaluation_config_mut()
            .unwrap()
            .set_invitation("s2", InvitationStatus::Declined)
            .unwrap();

        let seats = entity.seats(&round, &StaticDirectory::new(), RequirementPolicy::AnyOf);
        assert_eq!(seats.len(), 2);
        assert!(seats[0].holds("ivan"));
        assert!(!seats[1].is_resolvable());
    }

    #[test]
    fn test_subject_serializes_with_kind_tag() {
        let entity = GovernedEntity::initiative("x", "growth");
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["subject"]["kind"], "initiative");
        assert_eq!(json["subject"]["workstream_id"], "growth");
        let back: GovernedEntity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
    }
}
