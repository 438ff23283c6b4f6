use crate::domain::event::DomainEventType;
use crate::domain::mandate::MandateState;
use crate::domain::payment::PaymentState;
use crate::error::{EngineError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use DomainEventType::*;

/// Immutable directed graph of legal state transitions for one entity type.
///
/// Nodes are states, edges are labeled by the triggering event. Built once at
/// startup and shared read-only; there is exactly one outgoing edge per
/// (state, event) pair.
#[derive(Debug)]
pub struct StateGraph<S> {
    edges: HashMap<(S, DomainEventType), S>,
}

impl<S> StateGraph<S>
where
    S: Copy + Eq + Hash + Display,
{
    /// Builds a graph from an edge list. Two edges for the same
    /// (state, event) pair are a construction error.
    pub fn build(edges: impl IntoIterator<Item = (S, DomainEventType, S)>) -> Result<Self> {
        let mut map = HashMap::new();
        for (from, event, to) in edges {
            if map.insert((from, event), to).is_some() {
                return Err(EngineError::GraphConstruction {
                    state: from.to_string(),
                    event,
                });
            }
        }
        Ok(Self { edges: map })
    }

    /// The unique next state for (current, event), or `None` if the edge does
    /// not exist. The transition validator turns `None` into an
    /// `IllegalTransition` error carrying the subject's identity.
    pub fn next_state(&self, current: S, event: DomainEventType) -> Option<S> {
        self.edges.get(&(current, event)).copied()
    }

    /// All states with a directed path to `target` (transitive closure over
    /// reversed edges). Used to select "not yet reached `target`" sets for
    /// reconciliation queries.
    pub fn prior_states(&self, target: S) -> HashSet<S> {
        let mut reverse: HashMap<S, Vec<S>> = HashMap::new();
        for ((from, _), to) in &self.edges {
            reverse.entry(*to).or_default().push(*from);
        }

        let mut seen = HashSet::new();
        let mut queue: VecDeque<S> = VecDeque::from([target]);
        while let Some(state) = queue.pop_front() {
            for &prior in reverse.get(&state).into_iter().flatten() {
                if prior != target && seen.insert(prior) {
                    queue.push_back(prior);
                }
            }
        }
        seen
    }
}

/// The payment transition graph.
///
/// ```text
/// NEW -> { CANCELLED, USER_CANCEL_NOT_ELIGIBLE, EXPIRED, PENDING }
/// PENDING -> { FAILED, SUCCESS }
/// ```
pub fn payment_states() -> StateGraph<PaymentState> {
    use PaymentState::*;
    StateGraph::build([
        (New, PaymentCancelledByUser, Cancelled),
        (New, PaymentCancelledByUserNotEligible, UserCancelNotEligible),
        (New, PaymentExpiredBySystem, Expired),
        (New, PaymentSubmittedToProvider, Pending),
        (Pending, PaymentFailed, Failed),
        (Pending, PaidOut, Success),
    ])
    .expect("payment graph edge list is fixed and duplicate-free")
}

/// The mandate transition graph.
///
/// Setup runs CREATED -> AWAITING_DIRECT_DEBIT_DETAILS ->
/// SUBMITTED_TO_PROVIDER; from there the provider drives the mandate to
/// PENDING, ACTIVE or a terminal outcome. The user can abandon setup from
/// either pre-submission state, and the reconciliation sweep expires any
/// mandate stuck before PENDING.
pub fn mandate_states() -> StateGraph<MandateState> {
    use MandateState::*;
    StateGraph::build([
        (Created, MandateTokenExchanged, AwaitingDirectDebitDetails),
        (Created, MandateUserSetupCancelled, UserSetupCancelled),
        (
            Created,
            MandateUserSetupCancelledNotEligible,
            UserSetupCancelledNotEligible,
        ),
        (Created, MandateExpiredBySystem, Expired),
        (
            AwaitingDirectDebitDetails,
            MandateSubmittedToProvider,
            SubmittedToProvider,
        ),
        (
            AwaitingDirectDebitDetails,
            MandateUserSetupCancelled,
            UserSetupCancelled,
        ),
        (
            AwaitingDirectDebitDetails,
            MandateUserSetupCancelledNotEligible,
            UserSetupCancelledNotEligible,
        ),
        (AwaitingDirectDebitDetails, MandateExpiredBySystem, Expired),
        (SubmittedToProvider, MandatePending, Pending),
        (SubmittedToProvider, MandateActive, Active),
        (SubmittedToProvider, MandateFailed, Failed),
        (SubmittedToProvider, MandateCancelled, Cancelled),
        (SubmittedToProvider, MandateExpired, Expired),
        (SubmittedToProvider, MandateExpiredBySystem, Expired),
        (Pending, MandateActive, Active),
        (Pending, MandateFailed, Failed),
        (Pending, MandateCancelled, Cancelled),
        (Active, MandateFailed, Failed),
        (Active, MandateCancelled, Cancelled),
    ])
    .expect("mandate graph edge list is fixed and duplicate-free")
}
