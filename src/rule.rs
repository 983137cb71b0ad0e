//! Vote counting for a single approval round.
//!
//! A round's approver requirements are first *seated*: each requirement is
//! resolved to concrete accounts and turned into one or more seats. A seat
//! is one vote. Decisions are bound to seats in arrival order and each one
//! fills exactly one seat, so an account listed under several requirements
//! still casts a single vote. The rule then looks only at seat votes:
//!
//! | Rule       | Satisfied                    | Rejected                                  |
//! |------------|------------------------------|-------------------------------------------|
//! | `any`      | at least one approve         | every seat voted and none approved        |
//! | `all`      | every seat approved          | any seat returned or rejected             |
//! | `majority` | approvals > seats / 2        | seats - objections <= seats / 2           |
//!
//! A seat whose requirement resolves to nobody can never vote, so it blocks
//! `all`, keeps `any` from ever rejecting, and counts toward the `majority`
//! denominator. A round where *every* seat is empty is a configuration error.
//!
//! A `majority` round whose seats all voted and split evenly is rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::decision::{Decision, DecisionOutcome};
use crate::directory::ApproverDirectory;
use crate::errors::{EngineError, EngineResult};
use crate::gates::GateKey;
use crate::workstream::ApprovalRound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalRule {
    Any,
    All,
    Majority,
}

impl ApprovalRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::All => "all",
            Self::Majority => "majority",
        }
    }

    /// Decide the round from a tally of seat votes.
    pub fn outcome(&self, tally: &Tally) -> RoundOutcome {
        let total = tally.seats;
        match self {
            Self::Any => {
                if tally.approvals >= 1 {
                    RoundOutcome::Satisfied
                } else if tally.decided() == total {
                    RoundOutcome::Rejected
                } else {
                    RoundOutcome::Pending
                }
            }
            Self::All => {
                if tally.objections >= 1 {
                    RoundOutcome::Rejected
                } else if tally.approvals == total {
                    RoundOutcome::Satisfied
                } else {
                    RoundOutcome::Pending
                }
            }
            Self::Majority => {
                // Integer form of approvals > total / 2 and
                // (total - objections) <= total / 2.
                if tally.approvals * 2 > total {
                    RoundOutcome::Satisfied
                } else if (total - tally.objections) * 2 <= total {
                    RoundOutcome::Rejected
                } else {
                    RoundOutcome::Pending
                }
            }
        }
    }
}

impl fmt::Display for ApprovalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "all" => Ok(Self::All),
            "majority" => Ok(Self::Majority),
            _ => Err(format!(
                "Invalid rule '{}'. Valid values: any, all, majority",
                s
            )),
        }
    }
}

/// How a role requirement that resolves to several accounts is seated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequirementPolicy {
    /// One seat per requirement; whichever member decides first fills it.
    #[default]
    AnyOf,
    /// One seat per resolved account.
    AllOf,
}

impl fmt::Display for RequirementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyOf => f.write_str("any-of"),
            Self::AllOf => f.write_str("all-of"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    Satisfied,
    Rejected,
    Pending,
}

/// One vote in a round, held by one or more interchangeable accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub requirement_id: String,
    pub accounts: Vec<String>,
}

impl Seat {
    pub fn is_resolvable(&self) -> bool {
        !self.accounts.is_empty()
    }

    pub fn holds(&self, account: &str) -> bool {
        self.accounts.iter().any(|a| a == account)
    }
}

/// Bind decisions to seats in arrival order, one seat per decision. A
/// decision takes the open seat its actor holds with the fewest members, so
/// a direct seat is used before a shared role seat. Index `i` of the result
/// is the vote filling `seats[i]`.
pub fn seat_votes<'a>(seats: &[Seat], decisions: &'a [Decision]) -> Vec<Option<&'a Decision>> {
    let mut votes: Vec<Option<&'a Decision>> = vec![None; seats.len()];
    for decision in decisions {
        let open = seats
            .iter()
            .enumerate()
            .filter(|(i, seat)| votes[*i].is_none() && seat.holds(&decision.actor_id))
            .min_by_key(|(_, seat)| seat.accounts.len())
            .map(|(i, _)| i);
        if let Some(i) = open {
            votes[i] = Some(decision);
        }
    }
    votes
}

/// True if `account` holds a seat that no decision has filled yet.
pub fn has_open_seat(seats: &[Seat], decisions: &[Decision], account: &str) -> bool {
    seats
        .iter()
        .zip(seat_votes(seats, decisions))
        .any(|(seat, vote)| vote.is_none() && seat.holds(account))
}

/// Resolve every requirement in `round` to concrete seats.
///
/// A direct account id takes precedence over a role lookup. Requirements
/// that resolve to nobody still produce an (empty) seat. An account gets at
/// most one seat of its own: a later single-account seat for the same
/// account is dropped.
pub fn resolve_seats(
    round: &ApprovalRound,
    directory: &dyn ApproverDirectory,
    policy: RequirementPolicy,
) -> Vec<Seat> {
    let mut seats = Vec::new();
    for requirement in &round.approvers {
        let accounts: Vec<String> = match (&requirement.account_id, &requirement.role) {
            (Some(account), _) => vec![account.clone()],
            (None, Some(role)) => {
                let mut seen = BTreeSet::new();
                directory
                    .resolve_approvers(role)
                    .into_iter()
                    .filter(|a| seen.insert(a.clone()))
                    .collect()
            }
            (None, None) => Vec::new(),
        };

        if accounts.is_empty() {
            tracing::warn!(
                round = %round.id,
                requirement = %requirement.id,
                "Approver requirement resolves to no account"
            );
        }

        match policy {
            RequirementPolicy::AllOf if accounts.len() > 1 => {
                seats.extend(accounts.into_iter().map(|account| Seat {
                    requirement_id: requirement.id.clone(),
                    accounts: vec![account],
                }));
            }
            _ => seats.push(Seat {
                requirement_id: requirement.id.clone(),
                accounts,
            }),
        }
    }

    let mut seated = BTreeSet::new();
    seats.retain(|seat| match seat.accounts.as_slice() {
        [account] if !seated.insert(account.clone()) => {
            tracing::debug!(
                round = %round.id,
                requirement = %seat.requirement_id,
                account = %account,
                "Account already holds a seat in this round"
            );
            false
        }
        _ => true,
    });
    seats
}

/// Seat-level vote counts for one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub seats: usize,
    pub approvals: usize,
    /// Seats filled by a return or reject.
    pub objections: usize,
}

impl Tally {
    pub fn count(seats: &[Seat], decisions: &[Decision]) -> Self {
        let mut tally = Tally {
            seats: seats.len(),
            ..Default::default()
        };
        for vote in seat_votes(seats, decisions) {
            match vote.map(|d| d.outcome) {
                Some(DecisionOutcome::Approve) => tally.approvals += 1,
                Some(DecisionOutcome::Return | DecisionOutcome::Reject) => tally.objections += 1,
                None => {}
            }
        }
        tally
    }

    pub fn decided(&self) -> usize {
        self.approvals + self.objections
    }

    pub fn outstanding(&self) -> usize {
        self.seats - self.decided()
    }

    /// An even split with every seat voted: no deciding vote can remain.
    pub fn is_even_split(&self) -> bool {
        self.seats > 0 && self.approvals == self.objections && self.outstanding() == 0
    }
}

/// Evaluate a round. Fails closed on a round nobody can vote in and on any
/// return/reject decision that slipped in without a comment.
pub fn evaluate(
    gate: GateKey,
    rule: ApprovalRule,
    seats: &[Seat],
    decisions: &[Decision],
) -> EngineResult<RoundOutcome> {
    if !seats.iter().any(Seat::is_resolvable) {
        return Err(EngineError::Configuration {
            gate,
            message: "current round has no resolvable approvers".into(),
        });
    }
    for decision in decisions {
        decision.validate()?;
    }
    Ok(rule.outcome(&Tally::count(seats, decisions)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::workstream::ApproverRequirement;

    fn seats(names: &[&str]) -> Vec<Seat> {
        names
            .iter()
            .map(|n| Seat {
                requirement_id: format!("req-{}", n),
                accounts: vec![n.to_string()],
            })
            .collect()
    }

    fn approve(actor: &str) -> Decision {
        Decision::new(actor, DecisionOutcome::Approve)
    }

    fn reject(actor: &str) -> Decision {
        Decision::new(actor, DecisionOutcome::Reject).with_comment("no")
    }

    fn ret(actor: &str) -> Decision {
        Decision::new(actor, DecisionOutcome::Return).with_comment("fix it")
    }

    fn eval(rule: ApprovalRule, s: &[Seat], d: &[Decision]) -> RoundOutcome {
        evaluate(GateKey::L1, rule, s, d).unwrap()
    }

    #[test]
    fn test_all_requires_every_approval() {
        let s = seats(&["a", "b", "c"]);
        assert_eq!(eval(ApprovalRule::All, &s, &[approve("a")]), RoundOutcome::Pending);
        assert_eq!(
            eval(ApprovalRule::All, &s, &[approve("a"), approve("b")]),
            RoundOutcome::Pending
        );
        assert_eq!(
            eval(ApprovalRule::All, &s, &[approve("a"), approve("b"), approve("c")]),
            RoundOutcome::Satisfied
        );
    }

    #[test]
    fn test_all_short_circuits_on_first_objection() {
        let s = seats(&["a", "b", "c"]);
        assert_eq!(eval(ApprovalRule::All, &s, &[ret("b")]), RoundOutcome::Rejected);
        assert_eq!(
            eval(ApprovalRule::All, &s, &[approve("a"), reject("c")]),
            RoundOutcome::Rejected
        );
    }

    #[test]
    fn test_any_satisfied_by_first_approval() {
        let s = seats(&["a", "b", "c"]);
        assert_eq!(eval(ApprovalRule::Any, &s, &[]), RoundOutcome::Pending);
        assert_eq!(
            eval(ApprovalRule::Any, &s, &[reject("a"), approve("b")]),
            RoundOutcome::Satisfied
        );
    }

    #[test]
    fn test_any_rejects_only_when_everyone_objected() {
        let s = seats(&["a", "b", "c"]);
        assert_eq!(
            eval(ApprovalRule::Any, &s, &[reject("a"), ret("b")]),
            RoundOutcome::Pending
        );
        assert_eq!(
            eval(ApprovalRule::Any, &s, &[reject("a"), ret("b"), reject("c")]),
            RoundOutcome::Rejected
        );
    }

    #[test]
    fn test_majority_of_five() {
        let s = seats(&["a", "b", "c", "d", "e"]);
        let three_yes = [approve("a"), approve("b"), approve("c")];
        assert_eq!(eval(ApprovalRule::Majority, &s, &three_yes), RoundOutcome::Satisfied);

        let two_yes = [approve("a"), approve("b")];
        assert_eq!(eval(ApprovalRule::Majority, &s, &two_yes), RoundOutcome::Pending);

        let three_no = [reject("a"), ret("b"), reject("c")];
        assert_eq!(eval(ApprovalRule::Majority, &s, &three_no), RoundOutcome::Rejected);
    }

    #[test]
    fn test_majority_of_three_rejects_at_two_objections() {
        let s = seats(&["a", "b", "c"]);
        assert_eq!(
            eval(ApprovalRule::Majority, &s, &[reject("a")]),
            RoundOutcome::Pending
        );
        assert_eq!(
            eval(ApprovalRule::Majority, &s, &[reject("a"), reject("b")]),
            RoundOutcome::Rejected
        );
    }

    #[test]
    fn test_majority_partial_tie_stays_pending() {
        let s = seats(&["a", "b", "c", "d"]);
        let tie = [approve("a"), reject("b")];
        assert_eq!(eval(ApprovalRule::Majority, &s, &tie), RoundOutcome::Pending);
        assert!(!Tally::count(&s, &tie).is_even_split());

        let full_tie = [approve("a"), reject("b"), approve("c"), reject("d")];
        assert!(Tally::count(&s, &full_tie).is_even_split());
        assert_eq!(
            eval(ApprovalRule::Majority, &s, &full_tie),
            RoundOutcome::Rejected
        );
    }

    #[test]
    fn test_zero_resolvable_approvers_is_configuration_error() {
        let empty = vec![Seat {
            requirement_id: "r".into(),
            accounts: vec![],
        }];
        let err = evaluate(GateKey::L2, ApprovalRule::Any, &empty, &[]).unwrap_err();
        assert!(err.is_operator_facing());
        assert!(evaluate(GateKey::L2, ApprovalRule::Any, &[], &[]).is_err());
    }

    #[test]
    fn test_unresolved_seat_blocks_all_rule() {
        let mut s = seats(&["a"]);
        s.push(Seat {
            requirement_id: "ghost".into(),
            accounts: vec![],
        });
        assert_eq!(eval(ApprovalRule::All, &s, &[approve("a")]), RoundOutcome::Pending);
    }

    #[test]
    fn test_evaluate_fails_closed_on_uncommented_rejection() {
        let s = seats(&["a"]);
        let bad = Decision::new("a", DecisionOutcome::Reject);
        assert!(matches!(
            evaluate(GateKey::L0, ApprovalRule::Any, &s, &[bad]),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_first_member_vote_fills_shared_seat() {
        let shared = vec![Seat {
            requirement_id: "finance".into(),
            accounts: vec!["carol".into(), "dave".into()],
        }];
        let decisions = [approve("dave"), reject("carol")];
        let tally = Tally::count(&shared, &decisions);
        assert_eq!(tally.approvals, 1);
        assert_eq!(tally.objections, 0);
    }

    #[test]
    fn test_one_decision_fills_one_seat() {
        let overlapping = vec![
            Seat {
                requirement_id: "finance".into(),
                accounts: vec!["alice".into(), "carol".into()],
            },
            Seat {
                requirement_id: "lead".into(),
                accounts: vec!["alice".into()],
            },
            Seat {
                requirement_id: "ops".into(),
                accounts: vec!["bob".into()],
            },
        ];
        let cast = [approve("alice")];
        let votes = seat_votes(&overlapping, &cast);
        assert!(votes[0].is_none());
        assert_eq!(votes[1].map(|d| d.actor_id.as_str()), Some("alice"));

        let tally = Tally::count(&overlapping, &[approve("alice")]);
        assert_eq!(tally.approvals, 1);
        assert_eq!(
            eval(ApprovalRule::Majority, &overlapping, &[approve("alice")]),
            RoundOutcome::Pending
        );
        assert!(!has_open_seat(&overlapping, &[approve("alice")], "alice"));
        assert!(has_open_seat(&overlapping, &[approve("alice")], "carol"));
        assert_eq!(
            eval(
                ApprovalRule::Majority,
                &overlapping,
                &[approve("alice"), approve("carol")]
            ),
            RoundOutcome::Satisfied
        );
    }

    #[test]
    fn test_overlapping_requirements_seat_account_once() {
        let directory = StaticDirectory::new().with_role("finance", ["alice", "carol"]);
        let round = ApprovalRound::new("r1", ApprovalRule::Majority)
            .with_approver(ApproverRequirement::account("a1", "alice"))
            .with_approver(ApproverRequirement::role("a2", "finance"))
            .with_approver(ApproverRequirement::account("a3", "bob"));

        let any_of = resolve_seats(&round, &directory, RequirementPolicy::AnyOf);
        assert_eq!(any_of.len(), 3);
        assert_eq!(
            eval(ApprovalRule::Majority, &any_of, &[approve("alice")]),
            RoundOutcome::Pending
        );

        let all_of = resolve_seats(&round, &directory, RequirementPolicy::AllOf);
        let accounts: Vec<&str> = all_of.iter().map(|s| s.accounts[0].as_str()).collect();
        assert_eq!(accounts, vec!["alice", "carol", "bob"]);
        assert_eq!(
            eval(ApprovalRule::Majority, &all_of, &[approve("alice")]),
            RoundOutcome::Pending
        );
        assert_eq!(
            eval(ApprovalRule::All, &all_of, &[approve("alice"), approve("bob")]),
            RoundOutcome::Pending
        );
    }

    #[test]
    fn test_resolve_seats_by_policy() {
        let directory = StaticDirectory::new().with_role("finance", ["carol", "dave", "carol"]);
        let round = ApprovalRound::new("r1", ApprovalRule::All)
            .with_approver(ApproverRequirement::account("a1", "alice"))
            .with_approver(ApproverRequirement::role("a2", "finance"))
            .with_approver(ApproverRequirement::role("a3", "legal"));

        let any_of = resolve_seats(&round, &directory, RequirementPolicy::AnyOf);
        assert_eq!(any_of.len(), 3);
        assert_eq!(any_of[1].accounts, vec!["carol", "dave"]);
        assert!(!any_of[2].is_resolvable());

        let all_of = resolve_seats(&round, &directory, RequirementPolicy::AllOf);
        assert_eq!(all_of.len(), 4);
        assert_eq!(all_of[1].accounts, vec!["carol"]);
        assert_eq!(all_of[2].accounts, vec!["dave"]);
    }

    #[test]
    fn test_direct_account_wins_over_role() {
        let directory = StaticDirectory::new().with_role("finance", ["carol"]);
        let round = ApprovalRound::new("r1", ApprovalRule::Any).with_approver(ApproverRequirement {
            id: "a1".into(),
            account_id: Some("alice".into()),
            role: Some("finance".into()),
        });
        let seats = resolve_seats(&round, &directory, RequirementPolicy::AnyOf);
        assert_eq!(seats[0].accounts, vec!["alice"]);
    }

    #[test]
    fn test_rule_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&ApprovalRule::Majority).unwrap(), "\"majority\"");
        assert_eq!(
            serde_json::to_string(&RequirementPolicy::AllOf).unwrap(),
            "\"all-of\""
        );
    }
}
