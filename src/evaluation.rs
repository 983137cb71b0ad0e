//! Interview evaluations: a candidate, the criteria they are scored on, and
//! the roster of interview rounds that form the single interview gate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{EngineError, EngineResult};
use crate::rule::ApprovalRule;
use crate::workstream::{ApprovalRound, ApproverRequirement};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Delivery state of an interviewer invitation, reported by the invitation
/// collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            _ => Err(format!("Invalid invitation status: {}", s)),
        }
    }
}

/// Hiring progress of an evaluation, derived from its interview gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    #[default]
    Draft,
    InProgress,
    Hired,
    NotHired,
    OnHold,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Hired => "hired",
            Self::NotHired => "not_hired",
            Self::OnHold => "on_hold",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub key: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    pub score: u8,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewerSlot {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub invitation: InvitationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewRound {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub rule: ApprovalRule,
    #[serde(default)]
    pub interviewers: Vec<InterviewerSlot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub candidate: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub rounds: Vec<InterviewRound>,
    #[serde(default)]
    pub process_status: ProcessStatus,
}

impl EvaluationConfig {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            position: None,
            criteria: Vec::new(),
            rounds: Vec::new(),
            process_status: ProcessStatus::Draft,
        }
    }

    pub fn with_criterion(mut self, key: impl Into<String>, label: impl Into<String>) -> Self {
        self.criteria.push(Criterion {
            key: key.into(),
            label: label.into(),
        });
        self
    }

    pub fn with_round(mut self, round: InterviewRound) -> Self {
        self.rounds.push(round);
        self
    }

    /// Roster rounds as approval rounds. Interviewers who declined their
    /// invitation are left out.
    pub fn approval_rounds(&self) -> Vec<ApprovalRound> {
        self.rounds
            .iter()
            .map(|round| ApprovalRound {
                id: round.id.clone(),
                rule: round.rule,
                approvers: round
                    .interviewers
                    .iter()
                    .filter(|slot| slot.invitation != InvitationStatus::Declined)
                    .map(|slot| ApproverRequirement::account(&slot.id, &slot.account_id))
                    .collect(),
            })
            .collect()
    }

    pub fn is_declined(&self, slot_id: &str) -> bool {
        self.rounds
            .iter()
            .flat_map(|r| r.interviewers.iter())
            .any(|s| s.id == slot_id && s.invitation == InvitationStatus::Declined)
    }

    pub fn set_invitation(&mut self, slot_id: &str, status: InvitationStatus) -> EngineResult<()> {
        let slot = self
            .rounds
            .iter_mut()
            .flat_map(|r| r.interviewers.iter_mut())
            .find(|s| s.id == slot_id)
            .ok_or_else(|| EngineError::NotFound {
                what: "interviewer slot",
                id: slot_id.to_string(),
            })?;
        slot.invitation = status;
        Ok(())
    }

    /// Scores must name known criteria, at most once each, within range.
    pub fn validate_scores(&self, scores: &[CriterionScore]) -> EngineResult<()> {
        let mut seen = Vec::new();
        for score in scores {
            if !self.criteria.iter().any(|c| c.key == score.criterion) {
                return Err(EngineError::InvalidInput(format!(
                    "unknown criterion '{}'",
                    score.criterion
                )));
            }
            if seen.contains(&score.criterion.as_str()) {
                return Err(EngineError::InvalidInput(format!(
                    "criterion '{}' scored twice",
                    score.criterion
                )));
            }
            if !(MIN_SCORE..=MAX_SCORE).contains(&score.score) {
                return Err(EngineError::InvalidInput(format!(
                    "score {} for '{}' is outside {}..={}",
                    score.score, score.criterion, MIN_SCORE, MAX_SCORE
                )));
            }
            seen.push(score.criterion.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> EvaluationConfig {
        EvaluationConfig::new("Ada Lovelace")
            .with_criterion("coding", "Coding")
            .with_criterion("design", "System design")
            .with_round(InterviewRound {
                id: "tech".into(),
                name: Some("Technical".into()),
                rule: ApprovalRule::All,
                interviewers: vec![
                    InterviewerSlot {
                        id: "tech-1".into(),
                        account_id: "ivan".into(),
                        invitation: InvitationStatus::Accepted,
                    },
                    InterviewerSlot {
                        id: "tech-2".into(),
                        account_id: "judy".into(),
                        invitation: InvitationStatus::Declined,
                    },
                ],
            })
    }

    #[test]
    fn test_declined_interviewers_are_not_approvers() {
        let rounds = roster().approval_rounds();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].approvers.len(), 1);
        assert_eq!(rounds[0].approvers[0].account_id.as_deref(), Some("ivan"));
    }

    #[test]
    fn test_is_declined() {
        let config = roster();
        assert!(config.is_declined("tech-2"));
        assert!(!config.is_declined("tech-1"));
        assert!(!config.is_declined("nope"));
    }

    #[test]
    fn test_set_invitation_unknown_slot() {
        let mut config = roster();
        assert!(config.set_invitation("tech-2", InvitationStatus::Accepted).is_ok());
        assert_eq!(config.approval_rounds()[0].approvers.len(), 2);
        assert!(config.set_invitation("nope", InvitationStatus::Accepted).unwrap_err().is_not_found());
    }

    #[test]
    fn test_validate_scores() {
        let config = roster();
        let ok = vec![CriterionScore {
            criterion: "coding".into(),
            score: 4,
            note: None,
        }];
        assert!(config.validate_scores(&ok).is_ok());

        let unknown = vec![CriterionScore {
            criterion: "charisma".into(),
            score: 3,
            note: None,
        }];
        assert!(config.validate_scores(&unknown).is_err());

        let out_of_range = vec![CriterionScore {
            criterion: "design".into(),
            score: 9,
            note: None,
        }];
        assert!(config.validate_scores(&out_of_range).is_err());

        let twice = vec![ok[0].clone(), ok[0].clone()];
        assert!(config.validate_scores(&twice).is_err());
    }
}
