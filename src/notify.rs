//! Notification collaborator. Delivery is fire-and-forget from the engine's
//! point of view: a failed notification is logged and never undoes a
//! committed decision.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::decision::DecisionOutcome;
use crate::gates::GateKey;
use crate::tracker::GateStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNotice {
    pub entity_id: Uuid,
    pub gate: GateKey,
    pub actor_id: String,
    pub outcome: DecisionOutcome,
    /// Gate status after the decision was applied.
    pub gate_status: GateStatus,
    pub round_index: usize,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
}

pub trait Notifier: Send + Sync {
    fn notify_decision_recorded(&self, notice: &DecisionNotice) -> DeliveryStatus;
}

/// Writes notices to the log. Used by the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_decision_recorded(&self, notice: &DecisionNotice) -> DeliveryStatus {
        tracing::info!(
            entity_id = %notice.entity_id,
            gate = %notice.gate,
            actor = %notice.actor_id,
            outcome = %notice.outcome,
            status = %notice.gate_status,
            "Decision recorded"
        );
        DeliveryStatus::Delivered
    }
}

/// Keeps every notice in memory; can be told to report failures.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<DecisionNotice>>,
    fail_with: Option<String>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            fail_with: Some(reason.into()),
        }
    }

    pub fn notices(&self) -> Vec<DecisionNotice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify_decision_recorded(&self, notice: &DecisionNotice) -> DeliveryStatus {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice.clone());
        }
        match &self.fail_with {
            Some(reason) => DeliveryStatus::Failed(reason.clone()),
            None => DeliveryStatus::Delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> DecisionNotice {
        DecisionNotice {
            entity_id: Uuid::nil(),
            gate: GateKey::L0,
            actor_id: "alice".into(),
            outcome: DecisionOutcome::Approve,
            gate_status: GateStatus::Pending,
            round_index: 0,
            version: 2,
        }
    }

    #[test]
    fn test_memory_notifier_records_even_when_failing() {
        let notifier = MemoryNotifier::failing("smtp down");
        let status = notifier.notify_decision_recorded(&notice());
        assert_eq!(status, DeliveryStatus::Failed("smtp down".into()));
        assert_eq!(notifier.notices().len(), 1);
    }

    #[test]
    fn test_log_notifier_delivers() {
        assert_eq!(
            LogNotifier.notify_decision_recorded(&notice()),
            DeliveryStatus::Delivered
        );
    }
}
