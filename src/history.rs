//! Round history: immutable snapshots of closed rounds.
//!
//! Snapshots are appended by the store in the same atomic write that moves
//! the entity's version forward, and are never updated afterwards. Each
//! snapshot is sealed with a SHA-256 digest chained to the entity's previous
//! snapshot, so an audit replay can detect a rewritten or dropped record.
//!
//! Optional fields always serialize (as `null` when absent) so the JSON form
//! is lossless.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::decision::Decision;
use crate::gates::GateKey;
use crate::rule::{ApprovalRule, Seat};
use crate::workstream::ApproverRequirement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOutcome {
    Approved,
    Returned,
    Rejected,
}

impl SnapshotOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Returned => "returned",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub entity_id: Uuid,
    pub gate: GateKey,
    /// Which submission of the gate this round belonged to (1-based).
    pub execution: u32,
    pub round_index: usize,
    pub round_id: String,
    pub rule: ApprovalRule,
    pub approvers: Vec<ApproverRequirement>,
    /// Accounts each requirement resolved to when the round closed.
    pub seats: Vec<Seat>,
    pub decisions: Vec<Decision>,
    pub outcome: SnapshotOutcome,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: DateTime<Utc>,
    pub previous_digest: Option<String>,
    pub digest: String,
}

impl RoundSnapshot {
    /// Compute and set the chained digest. `previous` is the digest of the
    /// entity's latest snapshot, if any.
    pub fn seal(mut self, previous: Option<&str>) -> Result<Self> {
        self.previous_digest = previous.map(str::to_string);
        self.digest = self.compute_digest()?;
        Ok(self)
    }

    fn compute_digest(&self) -> Result<String> {
        let mut unsealed = self.clone();
        unsealed.digest = String::new();
        let body = serde_json::to_vec(&unsealed).context("Failed to serialize round snapshot")?;
        let hash = Sha256::digest(&body);
        Ok(format!("{:x}", hash))
    }

    pub fn key(&self) -> (Uuid, GateKey, u32, usize) {
        (self.entity_id, self.gate, self.execution, self.round_index)
    }
}

/// Check that every snapshot's digest is intact and links to its predecessor.
/// `snapshots` must be one entity's full history in append order.
pub fn verify_chain(snapshots: &[RoundSnapshot]) -> Result<bool> {
    let mut previous: Option<&str> = None;
    for snapshot in snapshots {
        if snapshot.previous_digest.as_deref() != previous {
            return Ok(false);
        }
        if snapshot.compute_digest()? != snapshot.digest {
            return Ok(false);
        }
        previous = Some(snapshot.digest.as_str());
    }
    Ok(true)
}

/// Pretty JSON export of a history for audit replay.
pub fn export_json(snapshots: &[RoundSnapshot]) -> Result<String> {
    serde_json::to_string_pretty(snapshots).context("Failed to serialize round history")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionOutcome;

    fn snapshot(round_index: usize) -> RoundSnapshot {
        RoundSnapshot {
            entity_id: Uuid::nil(),
            gate: GateKey::L2,
            execution: 1,
            round_index,
            round_id: format!("l2-r{}", round_index + 1),
            rule: ApprovalRule::Majority,
            approvers: vec![ApproverRequirement::account("a1", "alice")],
            seats: vec![Seat {
                requirement_id: "a1".into(),
                accounts: vec!["alice".into()],
            }],
            decisions: vec![Decision::new("alice", DecisionOutcome::Approve)],
            outcome: SnapshotOutcome::Approved,
            opened_at: None,
            closed_at: Utc::now(),
            previous_digest: None,
            digest: String::new(),
        }
    }

    #[test]
    fn test_chain_verifies_and_detects_tampering() {
        let first = snapshot(0).seal(None).unwrap();
        let second = snapshot(1).seal(Some(&first.digest)).unwrap();
        let mut chain = vec![first, second];
        assert!(verify_chain(&chain).unwrap());

        chain[0].decisions[0].comment = Some("edited later".into());
        assert!(!verify_chain(&chain).unwrap());
    }

    #[test]
    fn test_chain_detects_dropped_record() {
        let first = snapshot(0).seal(None).unwrap();
        let second = snapshot(1).seal(Some(&first.digest)).unwrap();
        assert!(!verify_chain(&[second]).unwrap());
    }

    #[test]
    fn test_export_keeps_absent_fields_as_null() {
        let sealed = snapshot(0).seal(None).unwrap();
        let json = export_json(&[sealed]).unwrap();
        assert!(json.contains("\"opened_at\": null"));
        assert!(json.contains("\"previous_digest\": null"));
        assert!(json.contains("\"comment\": null"));

        let back: Vec<RoundSnapshot> = serde_json::from_str(&json).unwrap();
        assert!(verify_chain(&back).unwrap());
    }
}
