//! A single approver's vote within a round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{EngineError, EngineResult};
use crate::evaluation::CriterionScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    /// Blocks the round like a reject, but asks the submitter to fix and resubmit.
    Return,
    Reject,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Return => "return",
            Self::Reject => "reject",
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, Self::Approve)
    }

    pub fn requires_comment(&self) -> bool {
        matches!(self, Self::Return | Self::Reject)
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "return" => Ok(Self::Return),
            "reject" => Ok(Self::Reject),
            _ => Err(format!(
                "Invalid outcome '{}'. Valid values: approve, return, reject",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub actor_id: String,
    pub outcome: DecisionOutcome,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
    /// Per-criterion scores; only evaluations carry them.
    #[serde(default)]
    pub scores: Vec<CriterionScore>,
}

impl Decision {
    pub fn new(actor_id: impl Into<String>, outcome: DecisionOutcome) -> Self {
        Self {
            actor_id: actor_id.into(),
            outcome,
            comment: None,
            decided_at: Utc::now(),
            scores: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_scores(mut self, scores: Vec<CriterionScore>) -> Self {
        self.scores = scores;
        self
    }

    pub fn has_comment(&self) -> bool {
        self.comment
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }

    /// Return and reject must explain themselves.
    pub fn validate(&self) -> EngineResult<()> {
        if self.actor_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("decision has no actor".into()));
        }
        if self.outcome.requires_comment() && !self.has_comment() {
            return Err(EngineError::InvalidInput(format!(
                "a {} decision requires a non-empty comment",
                self.outcome
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_without_comment_is_invalid() {
        let d = Decision::new("alice", DecisionOutcome::Reject);
        assert!(matches!(d.validate(), Err(EngineError::InvalidInput(_))));

        let blank = Decision::new("alice", DecisionOutcome::Return).with_comment("   ");
        assert!(matches!(blank.validate(), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_approve_needs_no_comment() {
        assert!(Decision::new("alice", DecisionOutcome::Approve).validate().is_ok());
    }

    #[test]
    fn test_commented_return_is_valid() {
        let d = Decision::new("bob", DecisionOutcome::Return).with_comment("needs numbers");
        assert!(d.validate().is_ok());
        assert!(d.has_comment());
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!(
            "Reject".parse::<DecisionOutcome>().unwrap(),
            DecisionOutcome::Reject
        );
        assert!("maybe".parse::<DecisionOutcome>().is_err());
    }
}
