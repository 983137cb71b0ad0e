//! Workstream-owned gate configuration and the resolver that turns an
//! `(entity, gate)` pair into its ordered approval rounds.
//!
//! Initiatives read rounds from their owning workstream. Evaluations read
//! them from their own interview roster. The resolver is only consulted when
//! a round is about to open; rounds already open keep the copy stored on the
//! gate's runtime state, so edits here never reach an in-flight round.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::entity::{GovernedEntity, Subject};
use crate::errors::{EngineError, EngineResult};
use crate::gates::GateKey;
use crate::rule::ApprovalRule;

/// One approver slot in a round. At least one of `account_id` / `role`
/// should be set; a slot that resolves to nobody blocks the round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverRequirement {
    pub id: String,
    pub account_id: Option<String>,
    pub role: Option<String>,
}

impl ApproverRequirement {
    pub fn account(id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_id: Some(account_id.into()),
            role: None,
        }
    }

    pub fn role(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_id: None,
            role: Some(role.into()),
        }
    }

    pub fn is_addressable(&self) -> bool {
        self.account_id.is_some() || self.role.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRound {
    pub id: String,
    pub rule: ApprovalRule,
    pub approvers: Vec<ApproverRequirement>,
}

impl ApprovalRound {
    pub fn new(id: impl Into<String>, rule: ApprovalRule) -> Self {
        Self {
            id: id.into(),
            rule,
            approvers: Vec::new(),
        }
    }

    pub fn with_approver(mut self, requirement: ApproverRequirement) -> Self {
        self.approvers.push(requirement);
        self
    }
}

/// Ordered rounds per gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateConfiguration {
    gates: BTreeMap<GateKey, Vec<ApprovalRound>>,
}

impl GateConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(mut self, gate: GateKey, rounds: Vec<ApprovalRound>) -> Self {
        self.gates.insert(gate, rounds);
        self
    }

    pub fn set_gate(&mut self, gate: GateKey, rounds: Vec<ApprovalRound>) {
        self.gates.insert(gate, rounds);
    }

    /// Rounds for `gate`; an unconfigured gate has zero rounds.
    pub fn rounds(&self, gate: GateKey) -> &[ApprovalRound] {
        self.gates.get(&gate).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn configured_gates(&self) -> impl Iterator<Item = (&GateKey, &Vec<ApprovalRound>)> {
        self.gates.iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Workstream {
    pub id: String,
    pub name: String,
    pub gates: GateConfiguration,
}

impl Workstream {
    pub fn new(id: impl Into<String>, name: impl Into<String>, gates: GateConfiguration) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            gates,
        }
    }
}

/// Resolves the approval rounds for a given entity and gate.
#[derive(Debug, Default)]
pub struct GateConfigResolver {
    workstreams: RwLock<HashMap<String, Workstream>>,
}

impl GateConfigResolver {
    pub fn new(workstreams: impl IntoIterator<Item = Workstream>) -> Self {
        let map = workstreams
            .into_iter()
            .map(|w| (w.id.clone(), w))
            .collect::<HashMap<_, _>>();
        Self {
            workstreams: RwLock::new(map),
        }
    }

    /// Insert or replace a workstream. Rounds that are already open keep
    /// the configuration they started with.
    pub fn upsert(&self, workstream: Workstream) -> EngineResult<()> {
        let mut guard = self.workstreams.write().map_err(|e| {
            EngineError::storage(anyhow::anyhow!("workstream lock poisoned: {}", e))
        })?;
        guard.insert(workstream.id.clone(), workstream);
        Ok(())
    }

    pub fn workstream(&self, id: &str) -> EngineResult<Workstream> {
        let guard = self.workstreams.read().map_err(|e| {
            EngineError::storage(anyhow::anyhow!("workstream lock poisoned: {}", e))
        })?;
        guard.get(id).cloned().ok_or_else(|| EngineError::NotFound {
            what: "workstream",
            id: id.to_string(),
        })
    }

    /// Ordered rounds for `gate` on `entity`, freshly read from configuration.
    pub fn rounds_for(
        &self,
        entity: &GovernedEntity,
        gate: GateKey,
    ) -> EngineResult<Vec<ApprovalRound>> {
        if !entity.kind().contains(gate) {
            return Err(EngineError::GateNotFound { gate });
        }
        match &entity.subject {
            Subject::Initiative { workstream_id, .. } => {
                let workstream = self.workstream(workstream_id)?;
                Ok(workstream.gates.rounds(gate).to_vec())
            }
            Subject::Evaluation(config) => Ok(config.approval_rounds()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::GovernedEntity;

    fn growth() -> Workstream {
        let config = GateConfiguration::new().with_gate(
            GateKey::L0,
            vec![
                ApprovalRound::new("l0-r1", ApprovalRule::Any)
                    .with_approver(ApproverRequirement::account("a1", "alice")),
                ApprovalRound::new("l0-r2", ApprovalRule::All)
                    .with_approver(ApproverRequirement::role("a2", "finance")),
            ],
        );
        Workstream::new("growth", "Growth", config)
    }

    #[test]
    fn test_rounds_for_initiative_come_from_workstream() {
        let resolver = GateConfigResolver::new(vec![growth()]);
        let entity = GovernedEntity::initiative("Launch", "growth");
        let rounds = resolver.rounds_for(&entity, GateKey::L0).unwrap();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[1].id, "l0-r2");
        assert!(resolver.rounds_for(&entity, GateKey::L1).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_workstream_is_not_found() {
        let resolver = GateConfigResolver::new(vec![]);
        let entity = GovernedEntity::initiative("Launch", "missing");
        let err = resolver.rounds_for(&entity, GateKey::L0).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_foreign_gate_is_rejected() {
        let resolver = GateConfigResolver::new(vec![growth()]);
        let entity = GovernedEntity::initiative("Launch", "growth");
        assert!(matches!(
            resolver.rounds_for(&entity, GateKey::Interview),
            Err(EngineError::GateNotFound { .. })
        ));
    }

    #[test]
    fn test_upsert_replaces_configuration() {
        let resolver = GateConfigResolver::new(vec![growth()]);
        resolver
            .upsert(Workstream::new("growth", "Growth v2", GateConfiguration::new()))
            .unwrap();
        let ws = resolver.workstream("growth").unwrap();
        assert_eq!(ws.name, "Growth v2");
        assert!(ws.gates.rounds(GateKey::L0).is_empty());
    }

    #[test]
    fn test_requirement_addressability() {
        assert!(ApproverRequirement::role("r", "legal").is_addressable());
        let empty = ApproverRequirement {
            id: "x".into(),
            account_id: None,
            role: None,
        };
        assert!(!empty.is_addressable());
    }
}
