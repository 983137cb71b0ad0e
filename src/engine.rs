//! Transition orchestrator: the engine's public boundary.
//!
//! Every mutating operation follows the same shape:
//!
//! 1. load the entity and check `expected_version`
//! 2. compute the next state in memory (nothing is written on any error)
//! 3. commit it at `version + 1` together with any closed-round snapshots
//!
//! Step 3 is a compare-and-swap in the store, so two callers that loaded the
//! same version cannot both win. Notification happens after the commit and
//! can never undo it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::decision::{Decision, DecisionOutcome};
use crate::directory::ApproverDirectory;
use crate::entity::GovernedEntity;
use crate::errors::{EngineError, EngineResult};
use crate::evaluation::{CriterionScore, EvaluationConfig, InvitationStatus, ProcessStatus};
use crate::gates::GateKey;
use crate::history::{self, RoundSnapshot};
use crate::notify::{DecisionNotice, DeliveryStatus, Notifier};
use crate::rule::{
    ApprovalRule, RequirementPolicy, RoundOutcome, Seat, Tally, evaluate, has_open_seat,
};
use crate::store::EntityStore;
use crate::tasks::{ApprovalTask, TaskStatus, materialize};
use crate::tracker::{GateRuntimeState, GateStatus, Transition};
use crate::workstream::{GateConfigResolver, Workstream};

/// Policy switches the engine does not decide on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Pass gates with zero configured rounds instead of failing.
    pub auto_approve_empty_gates: bool,
    pub per_requirement: RequirementPolicy,
    /// When false, `rejected` is terminal. `returned` can always be resubmitted.
    pub allow_resubmission: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            auto_approve_empty_gates: false,
            per_requirement: RequirementPolicy::AnyOf,
            allow_resubmission: true,
        }
    }
}

/// A vote bound to the entity version the caller observed.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    pub entity_id: Uuid,
    pub expected_version: u64,
    pub gate: GateKey,
    pub actor_id: String,
    pub outcome: DecisionOutcome,
    pub comment: Option<String>,
    pub scores: Vec<CriterionScore>,
}

impl DecisionRequest {
    pub fn new(
        entity_id: Uuid,
        expected_version: u64,
        gate: GateKey,
        actor_id: impl Into<String>,
        outcome: DecisionOutcome,
    ) -> Self {
        Self {
            entity_id,
            expected_version,
            gate,
            actor_id: actor_id.into(),
            outcome,
            comment: None,
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

    fn to_decision(&self) -> Decision {
        let decision =
            Decision::new(self.actor_id.as_str(), self.outcome).with_scores(self.scores.clone());
        match &self.comment {
            Some(comment) => decision.with_comment(comment.as_str()),
            None => decision,
        }
    }
}

/// Where the open round of a gate stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundProgress {
    pub gate: GateKey,
    pub status: GateStatus,
    pub execution: u32,
    pub round_index: usize,
    pub round_count: usize,
    /// `None` while no round is open.
    pub rule: Option<ApprovalRule>,
    pub tally: Tally,
    /// Seats whose requirement resolves to nobody.
    pub unresolved_seats: usize,
}

impl RoundProgress {
    /// Pending, but no eligible account is left who could move the round.
    pub fn is_stuck(&self) -> bool {
        if self.status != GateStatus::Pending {
            return false;
        }
        match self.rule {
            None => true,
            Some(_) => {
                self.unresolved_seats > 0 && self.tally.outstanding() == self.unresolved_seats
            }
        }
    }
}

pub struct ApprovalEngine {
    store: Arc<dyn EntityStore>,
    directory: Arc<dyn ApproverDirectory>,
    notifier: Arc<dyn Notifier>,
    resolver: GateConfigResolver,
    options: EngineOptions,
}

impl ApprovalEngine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        directory: Arc<dyn ApproverDirectory>,
        notifier: Arc<dyn Notifier>,
        resolver: GateConfigResolver,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            resolver,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn load(&self, entity_id: Uuid) -> EngineResult<GovernedEntity> {
        self.store.load(entity_id)
    }

    pub fn list(&self) -> EngineResult<Vec<GovernedEntity>> {
        self.store.list()
    }

    pub fn create_initiative(
        &self,
        title: &str,
        workstream_id: &str,
    ) -> EngineResult<GovernedEntity> {
        if title.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "initiative title must not be empty".into(),
            ));
        }
        self.resolver.workstream(workstream_id)?;

        let entity = GovernedEntity::initiative(title.trim(), workstream_id);
        self.store.insert(&entity)?;
        info!(
            entity_id = %entity.id,
            workstream = %workstream_id,
            "Initiative created"
        );
        Ok(entity)
    }

    pub fn create_evaluation(&self, config: EvaluationConfig) -> EngineResult<GovernedEntity> {
        validate_roster(&config)?;
        let entity = GovernedEntity::evaluation(config);
        self.store.insert(&entity)?;
        info!(
            entity_id = %entity.id,
            candidate = %entity.label(),
            "Evaluation created"
        );
        Ok(entity)
    }

    /// Delete an entity. Its round history stays readable.
    pub fn remove(&self, entity_id: Uuid, expected_version: u64) -> EngineResult<()> {
        self.store.remove(entity_id, expected_version)?;
        info!(entity_id = %entity_id, "Entity removed");
        Ok(())
    }

    /// Submit (or resubmit) the entity's active gate, opening round 0 of a
    /// new execution.
    pub fn submit(&self, entity_id: Uuid, expected_version: u64) -> EngineResult<GateRuntimeState> {
        let mut entity = self.store.load(entity_id)?;
        entity.ensure_version(expected_version)?;

        let gate = entity.active_gate.ok_or_else(|| {
            EngineError::InvalidState(format!("entity {} has passed every gate", entity_id))
        })?;
        let status = entity.gate(gate)?.status;
        if !status.is_submittable() {
            return Err(EngineError::InvalidState(format!(
                "gate {} is {}; only draft, returned or rejected gates can be submitted",
                gate, status
            )));
        }
        if status == GateStatus::Rejected && !self.options.allow_resubmission {
            return Err(EngineError::InvalidState(format!(
                "gate {} was rejected and resubmission is disabled",
                gate
            )));
        }

        let first_round = self.resolver.rounds_for(&entity, gate)?.into_iter().next();
        if first_round.is_none() && !self.options.auto_approve_empty_gates {
            return Err(self.configuration_error(
                entity_id,
                gate,
                "gate has no configured rounds and auto-approve is off",
            ));
        }

        if let Some(config) = entity.evaluation_config_mut() {
            config.process_status = ProcessStatus::InProgress;
        }
        let now = Utc::now();
        let auto_approve = first_round.is_none();
        let state = entity.gate_mut(gate)?;
        state.open(first_round, now);
        let execution = state.execution;
        if auto_approve {
            state.auto_approve();
            info!(entity_id = %entity_id, gate = %gate, "Empty gate auto-approved");
            self.advance_stage(&mut entity, gate, now)?;
        }

        self.persist(&mut entity, expected_version, &[], now)?;
        info!(
            entity_id = %entity_id,
            gate = %gate,
            execution,
            version = entity.version,
            "Gate submitted"
        );
        Ok(entity.gate(gate)?.clone())
    }

    /// Record one approver's decision on the current round of `gate`.
    ///
    /// Checks run in a fixed order and stop at the first failure: entity
    /// exists, version matches, gate is pending, the round has resolvable
    /// approvers, the actor holds an open seat, the payload is well formed.
    pub fn decide(&self, request: DecisionRequest) -> EngineResult<GovernedEntity> {
        let mut entity = self.store.load(request.entity_id)?;
        entity.ensure_version(request.expected_version)?;

        let gate = request.gate;
        let state = entity.gate(gate)?;
        if state.status != GateStatus::Pending {
            return Err(EngineError::InvalidState(format!(
                "gate {} is {}, not pending",
                gate, state.status
            )));
        }

        let round_index = state.round_index;
        let (round, opened_lazily) = match &state.active_round {
            Some(round) => (round.clone(), false),
            None => {
                let round = self
                    .resolver
                    .rounds_for(&entity, gate)?
                    .into_iter()
                    .nth(round_index)
                    .ok_or_else(|| {
                        self.configuration_error(entity.id, gate, "gate has no configured rounds")
                    })?;
                (round, true)
            }
        };

        let seats = entity.seats(&round, self.directory.as_ref(), self.options.per_requirement);
        if !seats.iter().any(Seat::is_resolvable) {
            return Err(self.configuration_error(
                entity.id,
                gate,
                "current round has no resolvable approvers",
            ));
        }

        if !seats.iter().any(|s| s.holds(&request.actor_id)) {
            warn!(
                entity_id = %entity.id,
                gate = %gate,
                actor = %request.actor_id,
                "Decision refused: actor is not an approver of the current round"
            );
            return Err(EngineError::Forbidden {
                actor: request.actor_id.clone(),
                gate,
            });
        }
        if state.has_decided(&request.actor_id) {
            return Err(EngineError::InvalidState(format!(
                "{} already decided round {} of {}",
                request.actor_id, round_index, gate
            )));
        }
        if !has_open_seat(&seats, &state.decisions, &request.actor_id) {
            return Err(EngineError::InvalidState(format!(
                "every seat {} holds in round {} of {} is already filled",
                request.actor_id, round_index, gate
            )));
        }

        let decision = request.to_decision();
        decision.validate()?;
        match entity.evaluation_config() {
            Some(config) => config.validate_scores(&decision.scores)?,
            None if !decision.scores.is_empty() => {
                return Err(EngineError::InvalidInput(
                    "criterion scores only apply to evaluations".into(),
                ));
            }
            None => {}
        }

        let mut decisions = state.decisions.clone();
        decisions.push(decision.clone());
        let outcome = evaluate(gate, round.rule, &seats, &decisions)?;
        let next_round = match outcome {
            RoundOutcome::Satisfied => self
                .resolver
                .rounds_for(&entity, gate)?
                .into_iter()
                .nth(round_index + 1),
            _ => None,
        };

        let now = Utc::now();
        let entity_id = entity.id;
        let state = entity.gate_mut(gate)?;
        if opened_lazily {
            state.open_round(round, now);
        }
        state.record(decision);
        let transition = state.apply(entity_id, outcome, &seats, next_round, now)?;
        let gate_status = state.status;
        let round_after = state.round_index;

        match &transition {
            Transition::Recorded => {
                debug!(
                    entity_id = %entity_id,
                    gate = %gate,
                    actor = %request.actor_id,
                    outcome = %request.outcome,
                    "Decision recorded, round still open"
                );
            }
            Transition::RoundAdvanced { closed } => {
                info!(
                    entity_id = %entity_id,
                    gate = %gate,
                    closed_round = closed.round_index,
                    round = round_after,
                    "Round satisfied, next round opened"
                );
            }
            Transition::Approved { .. } => {
                info!(entity_id = %entity_id, gate = %gate, "Gate approved");
                self.advance_stage(&mut entity, gate, now)?;
            }
            Transition::Closed { status, .. } => {
                info!(entity_id = %entity_id, gate = %gate, status = %status, "Gate closed");
                if let Some(config) = entity.evaluation_config_mut() {
                    config.process_status = match status {
                        GateStatus::Rejected => ProcessStatus::NotHired,
                        _ => ProcessStatus::OnHold,
                    };
                }
            }
        }

        let snapshots = match transition.closed_round() {
            Some(closed) => {
                let previous = self
                    .store
                    .history(entity_id)?
                    .last()
                    .map(|s| s.digest.clone());
                vec![
                    closed
                        .clone()
                        .seal(previous.as_deref())
                        .map_err(EngineError::storage)?,
                ]
            }
            None => Vec::new(),
        };

        self.persist(&mut entity, request.expected_version, &snapshots, now)?;
        self.notify(DecisionNotice {
            entity_id,
            gate,
            actor_id: request.actor_id,
            outcome: request.outcome,
            gate_status,
            round_index: round_after,
            version: entity.version,
        });
        Ok(entity)
    }

    /// Record an interviewer's invitation status. Rounds that are already
    /// open keep the roster they started with.
    pub fn update_invitation(
        &self,
        entity_id: Uuid,
        expected_version: u64,
        slot_id: &str,
        status: InvitationStatus,
    ) -> EngineResult<GovernedEntity> {
        let mut entity = self.store.load(entity_id)?;
        entity.ensure_version(expected_version)?;
        entity
            .evaluation_config_mut()
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("entity {} is not an evaluation", entity_id))
            })?
            .set_invitation(slot_id, status)?;

        self.persist(&mut entity, expected_version, &[], Utc::now())?;
        info!(
            entity_id = %entity_id,
            slot = %slot_id,
            status = ?status,
            "Invitation status updated"
        );
        Ok(entity)
    }

    /// Replace a workstream's gate configuration. Only rounds that have not
    /// started yet see the change.
    pub fn update_workstream(&self, workstream: Workstream) -> EngineResult<()> {
        let id = workstream.id.clone();
        self.resolver.upsert(workstream)?;
        info!(workstream = %id, "Workstream configuration updated");
        Ok(())
    }

    /// Actionable tasks for `account_id` across every entity.
    pub fn pending_tasks(&self, account_id: &str) -> EngineResult<Vec<ApprovalTask>> {
        let mut tasks = Vec::new();
        for entity in self.store.list()? {
            let entity = self.with_current_rounds(entity);
            tasks.extend(
                materialize(&entity, self.directory.as_ref(), self.options.per_requirement)
                    .into_iter()
                    .filter(|t| t.account_id == account_id && t.status == TaskStatus::Pending),
            );
        }
        Ok(tasks)
    }

    /// Every task of one entity's open rounds, decided ones included.
    pub fn tasks_for_entity(&self, entity_id: Uuid) -> EngineResult<Vec<ApprovalTask>> {
        let entity = self.with_current_rounds(self.store.load(entity_id)?);
        Ok(materialize(
            &entity,
            self.directory.as_ref(),
            self.options.per_requirement,
        ))
    }

    /// Closed rounds of one gate, in the order they closed. Works after the
    /// entity itself has been removed.
    pub fn round_history(&self, entity_id: Uuid, gate: GateKey) -> EngineResult<Vec<RoundSnapshot>> {
        let history = self.store.gate_history(entity_id, gate)?;
        if history.is_empty() {
            self.store.load(entity_id)?;
        }
        Ok(history)
    }

    /// Lossless JSON of the entity's full history.
    pub fn export_history(&self, entity_id: Uuid) -> EngineResult<String> {
        let history = self.full_history(entity_id)?;
        history::export_json(&history).map_err(EngineError::storage)
    }

    /// True if the entity's snapshot digests are intact and correctly chained.
    pub fn verify_history(&self, entity_id: Uuid) -> EngineResult<bool> {
        let history = self.full_history(entity_id)?;
        history::verify_chain(&history).map_err(EngineError::storage)
    }

    pub fn round_progress(&self, entity_id: Uuid, gate: GateKey) -> EngineResult<RoundProgress> {
        let entity = self.with_current_rounds(self.store.load(entity_id)?);
        let state = entity.gate(gate)?;
        let round_count = self.resolver.rounds_for(&entity, gate)?.len();

        let mut progress = RoundProgress {
            gate,
            status: state.status,
            execution: state.execution,
            round_index: state.round_index,
            round_count,
            rule: None,
            tally: Tally::default(),
            unresolved_seats: 0,
        };
        if let (GateStatus::Pending, Some(round)) = (state.status, &state.active_round) {
            let seats = entity.seats(round, self.directory.as_ref(), self.options.per_requirement);
            progress.rule = Some(round.rule);
            progress.tally = Tally::count(&seats, &state.decisions);
            progress.unresolved_seats = seats.iter().filter(|s| !s.is_resolvable()).count();
        }
        Ok(progress)
    }

    fn full_history(&self, entity_id: Uuid) -> EngineResult<Vec<RoundSnapshot>> {
        let history = self.store.history(entity_id)?;
        if history.is_empty() {
            self.store.load(entity_id)?;
        }
        Ok(history)
    }

    /// Move past an approved gate and open the next one. Gates with no rounds
    /// are passed straight through when auto-approve is on.
    fn advance_stage(
        &self,
        entity: &mut GovernedEntity,
        approved: GateKey,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let kind = entity.kind();
        let entity_id = entity.id;
        let mut current = approved;
        loop {
            let Some(next) = kind.next_gate(current) else {
                entity.active_gate = None;
                if let Some(config) = entity.evaluation_config_mut() {
                    config.process_status = ProcessStatus::Hired;
                }
                info!(entity_id = %entity_id, "All gates approved");
                return Ok(());
            };

            entity.active_gate = Some(next);
            let first_round = self.resolver.rounds_for(entity, next)?.into_iter().next();
            let empty = first_round.is_none();
            let state = entity.gate_mut(next)?;
            state.open(first_round, now);
            if !empty {
                info!(entity_id = %entity_id, gate = %next, "Stage advanced");
                return Ok(());
            }
            if !self.options.auto_approve_empty_gates {
                error!(
                    entity_id = %entity_id,
                    gate = %next,
                    "Stage advanced to a gate with no configured rounds; it stays pending"
                );
                return Ok(());
            }
            state.auto_approve();
            info!(entity_id = %entity_id, gate = %next, "Empty gate auto-approved");
            current = next;
        }
    }

    /// Pending gates that opened before their round was configured get the
    /// round they are waiting on. Nothing is persisted.
    fn with_current_rounds(&self, mut entity: GovernedEntity) -> GovernedEntity {
        let waiting: Vec<(GateKey, usize)> = entity
            .pending_gates()
            .filter(|g| g.active_round.is_none())
            .map(|g| (g.gate, g.round_index))
            .collect();
        for (gate, round_index) in waiting {
            let round = match self.resolver.rounds_for(&entity, gate) {
                Ok(rounds) => rounds.into_iter().nth(round_index),
                Err(e) => {
                    warn!(entity_id = %entity.id, gate = %gate, error = %e, "Cannot resolve rounds");
                    None
                }
            };
            if let (Some(round), Ok(state)) = (round, entity.gate_mut(gate)) {
                state.active_round = Some(round);
            }
        }
        entity
    }

    fn persist(
        &self,
        entity: &mut GovernedEntity,
        expected_version: u64,
        snapshots: &[RoundSnapshot],
        now: DateTime<Utc>,
    ) -> EngineResult<u64> {
        entity.version = expected_version + 1;
        entity.updated_at = now;
        self.store.commit(entity, expected_version, snapshots)
    }

    fn notify(&self, notice: DecisionNotice) {
        if let DeliveryStatus::Failed(reason) = self.notifier.notify_decision_recorded(&notice) {
            warn!(
                entity_id = %notice.entity_id,
                gate = %notice.gate,
                reason = %reason,
                "Decision notification failed; decision stands"
            );
        }
    }

    fn configuration_error(&self, entity_id: Uuid, gate: GateKey, message: &str) -> EngineError {
        error!(entity_id = %entity_id, gate = %gate, "{}", message);
        EngineError::Configuration {
            gate,
            message: message.to_string(),
        }
    }
}

fn validate_roster(config: &EvaluationConfig) -> EngineResult<()> {
    if config.candidate.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "evaluation candidate must not be empty".into(),
        ));
    }
    let mut criteria = Vec::new();
    for criterion in &config.criteria {
        if criteria.contains(&criterion.key.as_str()) {
            return Err(EngineError::InvalidInput(format!(
                "criterion '{}' defined twice",
                criterion.key
            )));
        }
        criteria.push(criterion.key.as_str());
    }
    let mut slots = Vec::new();
    for slot in config.rounds.iter().flat_map(|r| r.interviewers.iter()) {
        if slots.contains(&slot.id.as_str()) {
            return Err(EngineError::InvalidInput(format!(
                "interviewer slot '{}' defined twice",
                slot.id
            )));
        }
        slots.push(slot.id.as_str());
    }
    Ok(())
}
