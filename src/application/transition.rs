use crate::domain::event::{DomainEvent, DomainEventType};
use crate::domain::graph::StateGraph;
use crate::domain::mandate::MandateState;
use crate::domain::payment::PaymentState;
use crate::error::{EngineError, Result};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

/// Resolves (current state, event) against a state graph, failing explicitly
/// when no edge exists. Used identically for user actions, provider-derived
/// recalculations and system-generated timeout events.
#[derive(Clone)]
pub struct TransitionValidator<S> {
    graph: Arc<StateGraph<S>>,
}

impl<S> TransitionValidator<S>
where
    S: Copy + Eq + Hash + Display,
{
    pub fn new(graph: Arc<StateGraph<S>>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &StateGraph<S> {
        &self.graph
    }

    /// The state reached by applying `event` from `current`, or
    /// `IllegalTransition` carrying the subject's identity. The caller
    /// persists the new state together with the domain event in one atomic
    /// unit.
    pub fn apply(&self, subject: &str, current: S, event: DomainEventType) -> Result<S> {
        self.graph
            .next_state(current, event)
            .ok_or_else(|| EngineError::IllegalTransition {
                subject: subject.to_string(),
                state: current.to_string(),
                event,
            })
    }
}

/// Folds a mandate's ledger history back through the graph. The first event
/// must be the creation event, which establishes the initial CREATED state;
/// every later event must have an edge. Used to check the invariant that a
/// stored state is always reproducible from its history.
pub fn replay_mandate(
    validator: &TransitionValidator<MandateState>,
    subject: &str,
    events: &[DomainEvent],
) -> Result<MandateState> {
    let mut iter = events.iter();
    let first = iter.next().ok_or_else(|| EngineError::Validation(format!(
        "mandate {subject} has no ledger history"
    )))?;
    if first.event_type != DomainEventType::MandateCreated {
        return Err(EngineError::Validation(format!(
            "mandate {subject} history does not start with MANDATE_CREATED"
        )));
    }
    let mut state = MandateState::Created;
    for event in iter {
        state = validator.apply(subject, state, event.event_type)?;
    }
    Ok(state)
}

/// Payment counterpart of [`replay_mandate`]; history opens with
/// PAYMENT_CREATED and the initial NEW state.
pub fn replay_payment(
    validator: &TransitionValidator<PaymentState>,
    subject: &str,
    events: &[DomainEvent],
) -> Result<PaymentState> {
    let mut iter = events.iter();
    let first = iter.next().ok_or_else(|| EngineError::Validation(format!(
        "payment {subject} has no ledger history"
    )))?;
    if first.event_type != DomainEventType::PaymentCreated {
        return Err(EngineError::Validation(format!(
            "payment {subject} history does not start with PAYMENT_CREATED"
        )));
    }
    let mut state = PaymentState::New;
    for event in iter {
        state = validator.apply(subject, state, event.event_type)?;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::SubjectType;
    use crate::domain::graph::{mandate_states, payment_states};

    fn payment_validator() -> TransitionValidator<PaymentState> {
        TransitionValidator::new(Arc::new(payment_states()))
    }

    #[test]
    fn test_apply_legal_transition() {
        let validator = payment_validator();
        let next = validator
            .apply(
                "payment-1",
                PaymentState::New,
                DomainEventType::PaymentSubmittedToProvider,
            )
            .unwrap();
        assert_eq!(next, PaymentState::Pending);
    }

    #[test]
    fn test_apply_illegal_transition_carries_context() {
        let validator = payment_validator();
        let err = validator
            .apply(
                "payment-7",
                PaymentState::Success,
                DomainEventType::PaymentFailed,
            )
            .unwrap_err();
        match err {
            EngineError::IllegalTransition {
                subject,
                state,
                event,
            } => {
                assert_eq!(subject, "payment-7");
                assert_eq!(state, "SUCCESS");
                assert_eq!(event, DomainEventType::PaymentFailed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_replay_mandate_history() {
        let validator = TransitionValidator::new(Arc::new(mandate_states()));
        let events: Vec<_> = [
            DomainEventType::MandateCreated,
            DomainEventType::MandateTokenExchanged,
            DomainEventType::MandateSubmittedToProvider,
            DomainEventType::MandateActive,
        ]
        .into_iter()
        .map(|event_type| DomainEvent::now(1, SubjectType::Mandate, event_type))
        .collect();

        let state = replay_mandate(&validator, "mandate-1", &events).unwrap();
        assert_eq!(state, MandateState::Active);
    }

    #[test]
    fn test_replay_rejects_history_without_creation_event() {
        let validator = TransitionValidator::new(Arc::new(mandate_states()));
        let events = vec![DomainEvent::now(
            1,
            SubjectType::Mandate,
            DomainEventType::MandateActive,
        )];
        assert!(replay_mandate(&validator, "mandate-1", &events).is_err());
    }

    #[test]
    fn test_replay_payment_history() {
        let validator = payment_validator();
        let events: Vec<_> = [
            DomainEventType::PaymentCreated,
            DomainEventType::PaymentSubmittedToProvider,
            DomainEventType::PaidOut,
        ]
        .into_iter()
        .map(|event_type| DomainEvent::now(1, SubjectType::Payment, event_type))
        .collect();

        let state = replay_payment(&validator, "payment-1", &events).unwrap();
        assert_eq!(state, PaymentState::Success);
    }
}
