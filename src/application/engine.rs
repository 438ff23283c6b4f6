use crate::application::calculator::CalculatorRegistry;
use crate::application::transition::{replay_mandate, replay_payment, TransitionValidator};
use crate::domain::event::{DomainEvent, DomainEventType, Provider, SubjectType};
use crate::domain::graph::{mandate_states, payment_states};
use crate::domain::mandate::{Mandate, MandateState, MandateType, StateDetails};
use crate::domain::payment::{Amount, Payment, PaymentState};
use crate::domain::ports::{
    DomainEventStore, DomainEventStoreRef, GatewayAccountLookup, GatewayAccountLookupRef,
    MandateStore, MandateStoreRef, NotificationSender, NotificationSenderRef, PaymentStore,
    PaymentStoreRef, ProviderClient, ProviderClientRef, ProviderEventStoreRef,
};
use crate::error::{EngineError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROVIDER_RETRY_ATTEMPTS: u32 = 3;
const PROVIDER_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Everything the engine depends on. Stores and collaborators are injected as
/// trait objects so tests and the CLI can wire in-memory or persistent
/// implementations alike.
pub struct EngineDeps {
    pub mandates: MandateStoreRef,
    pub payments: PaymentStoreRef,
    pub domain_events: DomainEventStoreRef,
    pub provider_events: ProviderEventStoreRef,
    pub accounts: GatewayAccountLookupRef,
    pub notifier: NotificationSenderRef,
    pub provider_clients: HashMap<Provider, ProviderClientRef>,
}

pub struct CreateMandateRequest {
    pub account_external_id: String,
    pub mandate_type: MandateType,
    pub external_id: Option<String>,
    pub service_reference: Option<String>,
    pub description: Option<String>,
}

pub struct CreatePaymentRequest {
    pub mandate_external_id: String,
    pub amount: Amount,
    pub external_id: Option<String>,
}

/// The main entry point for mandate and payment lifecycle management.
///
/// All state changes, whether user-driven, provider-driven or system-driven,
/// funnel through the transition validators here. Each mutation holds a
/// per-entity lock around read-validate-write plus the domain-event append, so
/// a racing webhook and user action cannot lose updates.
pub struct LifecycleEngine {
    mandates: MandateStoreRef,
    payments: PaymentStoreRef,
    domain_events: DomainEventStoreRef,
    provider_events: ProviderEventStoreRef,
    accounts: GatewayAccountLookupRef,
    notifier: NotificationSenderRef,
    provider_clients: HashMap<Provider, ProviderClientRef>,
    calculators: CalculatorRegistry,
    mandate_validator: TransitionValidator<MandateState>,
    payment_validator: TransitionValidator<PaymentState>,
    locks: Mutex<HashMap<(SubjectType, u64), Arc<Mutex<()>>>>,
    id_seq: AtomicU64,
}

impl LifecycleEngine {
    /// Builds the engine with the two state graphs constructed once and the
    /// standard calculator registry.
    pub fn new(deps: EngineDeps) -> Self {
        let calculators = CalculatorRegistry::standard(deps.provider_events.clone());
        Self {
            mandates: deps.mandates,
            payments: deps.payments,
            domain_events: deps.domain_events,
            provider_events: deps.provider_events,
            accounts: deps.accounts,
            notifier: deps.notifier,
            provider_clients: deps.provider_clients,
            calculators,
            mandate_validator: TransitionValidator::new(Arc::new(mandate_states())),
            payment_validator: TransitionValidator::new(Arc::new(payment_states())),
            locks: Mutex::new(HashMap::new()),
            id_seq: AtomicU64::new(1),
        }
    }

    pub fn provider_events(&self) -> &ProviderEventStoreRef {
        &self.provider_events
    }

    pub fn mandate_store(&self) -> &MandateStoreRef {
        &self.mandates
    }

    pub fn payment_store(&self) -> &PaymentStoreRef {
        &self.payments
    }

    // ---- mandate operations -------------------------------------------------

    /// Creates a mandate in CREATED against an existing gateway account and
    /// opens its ledger with MANDATE_CREATED.
    pub async fn create_mandate(&self, request: CreateMandateRequest) -> Result<Mandate> {
        let account = self.accounts.find(&request.account_external_id).await?;

        let external_id = request
            .external_id
            .unwrap_or_else(|| self.next_external_id("mandate"));
        let mut mandate = Mandate::new(
            external_id,
            request.mandate_type,
            account.external_id,
            account.provider,
        );
        mandate.service_reference = request.service_reference;
        mandate.description = request.description;

        let mandate = self.mandates.insert(mandate).await?;
        self.domain_events
            .append(DomainEvent::now(
                mandate.id,
                SubjectType::Mandate,
                DomainEventType::MandateCreated,
            ))
            .await?;
        info!(mandate = %mandate.external_id, "mandate created");
        Ok(mandate)
    }

    /// The one-time token has been exchanged; the user is now entering direct
    /// debit details.
    pub async fn token_exchanged(&self, mandate_external_id: &str) -> Result<Mandate> {
        self.apply_mandate_event(
            mandate_external_id,
            DomainEventType::MandateTokenExchanged,
            None,
            |_| {},
        )
        .await
    }

    /// Confirms direct debit details: sets the mandate up with the provider,
    /// records the provider-assigned ids and submits it. For a one-off
    /// mandate the single pending payment is collected in the same step;
    /// any other payment count violates the one-off cardinality invariant.
    pub async fn confirm_mandate(&self, mandate_external_id: &str) -> Result<Mandate> {
        let mandate = self.find_mandate(mandate_external_id).await?;
        let account = self.accounts.find(&mandate.gateway_account_id).await?;

        let one_off_payment = match mandate.mandate_type {
            MandateType::OneOff => {
                let payments = self.payments.find_by_mandate_id(mandate.id).await?;
                if payments.len() != 1 {
                    return Err(EngineError::Cardinality {
                        mandate: mandate.external_id.clone(),
                        found: payments.len(),
                    });
                }
                payments.into_iter().next()
            }
            MandateType::OnDemand => None,
        };

        let client = self.provider_client(account.provider)?;
        let provider_mandate = with_retry("set_up_mandate", || {
            client.set_up_mandate(&account, &mandate)
        })
        .await?;

        let mandate = self
            .apply_mandate_event(
                mandate_external_id,
                DomainEventType::MandateSubmittedToProvider,
                None,
                |m| {
                    m.provider_mandate_id = Some(provider_mandate.provider_mandate_id.clone());
                    m.bank_statement_reference =
                        provider_mandate.bank_statement_reference.clone();
                },
            )
            .await?;

        if let Some(payment) = one_off_payment {
            self.submit_payment(&payment.external_id).await?;
        }

        if let Err(e) = self.notifier.mandate_created(&mandate).await {
            warn!(mandate = %mandate.external_id, error = %e, "mandate created notification failed");
        }
        Ok(mandate)
    }

    /// User abandoned setup from the service side.
    pub async fn cancel_mandate_setup(&self, mandate_external_id: &str) -> Result<Mandate> {
        self.apply_mandate_event(
            mandate_external_id,
            DomainEventType::MandateUserSetupCancelled,
            None,
            |_| {},
        )
        .await
    }

    /// User chose a different payment method during setup.
    pub async fn change_payment_method(&self, mandate_external_id: &str) -> Result<Mandate> {
        self.apply_mandate_event(
            mandate_external_id,
            DomainEventType::MandateUserSetupCancelledNotEligible,
            None,
            |_| {},
        )
        .await
    }

    pub async fn find_mandate(&self, external_id: &str) -> Result<Mandate> {
        self.mandates
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                resource: "mandate",
                id: external_id.to_string(),
            })
    }

    /// Recomputes the mandate's state from its provider-event ledger and, if
    /// it differs from the stored state, applies the matching transition.
    pub async fn recalculate_mandate(&self, mandate_id: u64) -> Result<()> {
        let lock = self.entity_lock(SubjectType::Mandate, mandate_id).await;
        let _guard = lock.lock().await;

        let mandate = self.get_mandate(mandate_id).await?;
        let account = self.accounts.find(&mandate.gateway_account_id).await?;
        let calculator = self.calculators.mandate_calculator(account.provider)?;

        match calculator.calculate(&mandate, &account).await? {
            None => {
                debug!(mandate = %mandate.external_id, "no events stored that require a state update");
                Ok(())
            }
            Some(calculated) if calculated.state == mandate.state => {
                debug!(mandate = %mandate.external_id, state = %mandate.state, "state already up to date");
                Ok(())
            }
            Some(calculated) => match mandate_event_for(calculated.state) {
                Some(event) => {
                    self.transition_mandate(mandate, event, calculated.details, |_| {})
                        .await?;
                    Ok(())
                }
                None => {
                    debug!(mandate = %mandate.external_id, state = %calculated.state,
                        "calculated state has no inbound transition, leaving as is");
                    Ok(())
                }
            },
        }
    }

    // ---- payment operations -------------------------------------------------

    /// Creates a NEW payment against a mandate and opens its ledger with
    /// PAYMENT_CREATED.
    pub async fn create_payment(&self, request: CreatePaymentRequest) -> Result<Payment> {
        let mandate = self.find_mandate(&request.mandate_external_id).await?;
        let external_id = request
            .external_id
            .unwrap_or_else(|| self.next_external_id("payment"));

        let payment = Payment::new(external_id, mandate.id, request.amount, mandate.provider);
        let payment = self.payments.insert(payment).await?;
        self.domain_events
            .append(DomainEvent::now(
                payment.id,
                SubjectType::Payment,
                DomainEventType::PaymentCreated,
            ))
            .await?;
        info!(payment = %payment.external_id, mandate = %mandate.external_id, "payment created");
        Ok(payment)
    }

    /// Submits a collection to the provider and moves the payment to PENDING.
    pub async fn submit_payment(&self, payment_external_id: &str) -> Result<Payment> {
        let payment = self.find_payment(payment_external_id).await?;
        let mandate = self.get_mandate(payment.mandate_id).await?;
        let account = self.accounts.find(&mandate.gateway_account_id).await?;

        let client = self.provider_client(account.provider)?;
        let provider_payment_id = with_retry("collect_payment", || {
            client.collect_payment(&account, &mandate, &payment)
        })
        .await?;

        self.apply_payment_event(
            payment_external_id,
            DomainEventType::PaymentSubmittedToProvider,
            |p| p.provider_payment_id = Some(provider_payment_id.clone()),
        )
        .await
    }

    pub async fn cancel_payment(&self, payment_external_id: &str) -> Result<Payment> {
        self.apply_payment_event(
            payment_external_id,
            DomainEventType::PaymentCancelledByUser,
            |_| {},
        )
        .await
    }

    pub async fn cancel_payment_not_eligible(&self, payment_external_id: &str) -> Result<Payment> {
        self.apply_payment_event(
            payment_external_id,
            DomainEventType::PaymentCancelledByUserNotEligible,
            |_| {},
        )
        .await
    }

    pub async fn find_payment(&self, external_id: &str) -> Result<Payment> {
        self.payments
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                resource: "payment",
                id: external_id.to_string(),
            })
    }

    /// Payment counterpart of [`recalculate_mandate`](Self::recalculate_mandate).
    pub async fn recalculate_payment(&self, payment_id: u64) -> Result<()> {
        let lock = self.entity_lock(SubjectType::Payment, payment_id).await;
        let _guard = lock.lock().await;

        let payment = self.get_payment(payment_id).await?;
        let mandate = self.get_mandate(payment.mandate_id).await?;
        let account = self.accounts.find(&mandate.gateway_account_id).await?;
        let calculator = self.calculators.payment_calculator(account.provider)?;

        match calculator.calculate(&payment, &account).await? {
            None => {
                debug!(payment = %payment.external_id, "no events stored that require a state update");
                Ok(())
            }
            Some(calculated) if calculated.state == payment.state => {
                debug!(payment = %payment.external_id, state = %payment.state, "state already up to date");
                Ok(())
            }
            Some(calculated) => match payment_event_for(calculated.state) {
                Some(event) => {
                    self.transition_payment(payment, event, |_| {}).await?;
                    Ok(())
                }
                None => {
                    debug!(payment = %payment.external_id, state = %calculated.state,
                        "calculated state has no inbound transition, leaving as is");
                    Ok(())
                }
            },
        }
    }

    // ---- reconciliation sweep ----------------------------------------------

    /// Expires mandates stuck in a pre-PENDING state since before `cutoff`.
    /// Per-mandate failures are logged and do not abort the rest of the
    /// sweep. Returns how many mandates were expired.
    pub async fn expire_stuck_mandates(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let states = self
            .mandate_validator
            .graph()
            .prior_states(MandateState::Pending);
        let stuck = self.mandates.find_stuck(&states, cutoff).await?;

        let mut expired = 0;
        for mandate in stuck {
            let lock = self.entity_lock(SubjectType::Mandate, mandate.id).await;
            let _guard = lock.lock().await;
            // State may have moved since the query; reload under the lock.
            let attempt = async {
                let current = self.get_mandate(mandate.id).await?;
                self.transition_mandate(current, DomainEventType::MandateExpiredBySystem, None, |_| {})
                    .await
            };
            match attempt.await {
                Ok(_) => expired += 1,
                Err(e) => {
                    warn!(mandate = %mandate.external_id, error = %e, "could not expire mandate")
                }
            }
        }
        Ok(expired)
    }

    /// Payment counterpart of [`expire_stuck_mandates`](Self::expire_stuck_mandates).
    pub async fn expire_stuck_payments(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let states = self
            .payment_validator
            .graph()
            .prior_states(PaymentState::Pending);
        let stuck = self.payments.find_stuck(&states, cutoff).await?;

        let mut expired = 0;
        for payment in stuck {
            let lock = self.entity_lock(SubjectType::Payment, payment.id).await;
            let _guard = lock.lock().await;
            let attempt = async {
                let current = self.get_payment(payment.id).await?;
                self.transition_payment(current, DomainEventType::PaymentExpiredBySystem, |_| {})
                    .await
            };
            match attempt.await {
                Ok(_) => expired += 1,
                Err(e) => {
                    warn!(payment = %payment.external_id, error = %e, "could not expire payment")
                }
            }
        }
        Ok(expired)
    }

    // ---- audit --------------------------------------------------------------

    /// Replays the mandate's ledger through the graph, as a consistency check
    /// against the stored state.
    pub async fn replayed_mandate_state(&self, external_id: &str) -> Result<MandateState> {
        let mandate = self.find_mandate(external_id).await?;
        let events = self
            .domain_events
            .find_for_subject(SubjectType::Mandate, mandate.id)
            .await?;
        replay_mandate(&self.mandate_validator, external_id, &events)
    }

    pub async fn replayed_payment_state(&self, external_id: &str) -> Result<PaymentState> {
        let payment = self.find_payment(external_id).await?;
        let events = self
            .domain_events
            .find_for_subject(SubjectType::Payment, payment.id)
            .await?;
        replay_payment(&self.payment_validator, external_id, &events)
    }

    // ---- internals ----------------------------------------------------------

    fn provider_client(&self, provider: Provider) -> Result<&dyn ProviderClient> {
        self.provider_clients
            .get(&provider)
            .map(Arc::as_ref)
            .ok_or(EngineError::UnknownProvider(provider))
    }

    async fn get_mandate(&self, id: u64) -> Result<Mandate> {
        self.mandates
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                resource: "mandate",
                id: id.to_string(),
            })
    }

    async fn get_payment(&self, id: u64) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                resource: "payment",
                id: id.to_string(),
            })
    }

    async fn entity_lock(&self, subject_type: SubjectType, id: u64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((subject_type, id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn next_external_id(&self, prefix: &str) -> String {
        let seq = self.id_seq.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{:x}-{seq}", Utc::now().timestamp())
    }

    async fn apply_mandate_event(
        &self,
        external_id: &str,
        event: DomainEventType,
        details: Option<StateDetails>,
        mutate: impl FnOnce(&mut Mandate),
    ) -> Result<Mandate> {
        let mandate = self.find_mandate(external_id).await?;
        let lock = self.entity_lock(SubjectType::Mandate, mandate.id).await;
        let _guard = lock.lock().await;
        let current = self.get_mandate(mandate.id).await?;
        self.transition_mandate(current, event, details, mutate).await
    }

    async fn apply_payment_event(
        &self,
        external_id: &str,
        event: DomainEventType,
        mutate: impl FnOnce(&mut Payment),
    ) -> Result<Payment> {
        let payment = self.find_payment(external_id).await?;
        let lock = self.entity_lock(SubjectType::Payment, payment.id).await;
        let _guard = lock.lock().await;
        let current = self.get_payment(payment.id).await?;
        self.transition_payment(current, event, mutate).await
    }

    /// Validate, mutate and persist the mandate together with its domain
    /// event. Caller holds the entity lock.
    async fn transition_mandate(
        &self,
        mut mandate: Mandate,
        event: DomainEventType,
        details: Option<StateDetails>,
        mutate: impl FnOnce(&mut Mandate),
    ) -> Result<Mandate> {
        let next = self
            .mandate_validator
            .apply(&mandate.external_id, mandate.state, event)?;
        mutate(&mut mandate);
        mandate.state = next;
        if details.is_some() {
            mandate.state_details = details;
        }
        self.mandates.update(&mandate).await?;
        self.domain_events
            .append(DomainEvent::now(mandate.id, SubjectType::Mandate, event))
            .await?;
        info!(mandate = %mandate.external_id, state = %mandate.state, event = ?event, "mandate transitioned");

        match event {
            DomainEventType::MandateFailed => {
                if let Err(e) = self.notifier.mandate_failed(&mandate).await {
                    warn!(mandate = %mandate.external_id, error = %e, "mandate failed notification failed");
                }
            }
            DomainEventType::MandateCancelled => {
                if let Err(e) = self.notifier.mandate_cancelled(&mandate).await {
                    warn!(mandate = %mandate.external_id, error = %e, "mandate cancelled notification failed");
                }
            }
            _ => {}
        }
        Ok(mandate)
    }

    async fn transition_payment(
        &self,
        mut payment: Payment,
        event: DomainEventType,
        mutate: impl FnOnce(&mut Payment),
    ) -> Result<Payment> {
        let next = self
            .payment_validator
            .apply(&payment.external_id, payment.state, event)?;
        mutate(&mut payment);
        payment.state = next;
        self.payments.update(&payment).await?;
        self.domain_events
            .append(DomainEvent::now(payment.id, SubjectType::Payment, event))
            .await?;
        info!(payment = %payment.external_id, state = %payment.state, event = ?event, "payment transitioned");

        if event == DomainEventType::PaymentFailed {
            if let Err(e) = self.notifier.payment_failed(&payment).await {
                warn!(payment = %payment.external_id, error = %e, "payment failed notification failed");
            }
        }
        Ok(payment)
    }
}

/// The transition event that enters each provider-derived mandate state.
/// CREATED has no inbound edge; a recalculation landing on it is a no-op.
fn mandate_event_for(state: MandateState) -> Option<DomainEventType> {
    match state {
        MandateState::SubmittedToProvider => Some(DomainEventType::MandateSubmittedToProvider),
        MandateState::Pending => Some(DomainEventType::MandatePending),
        MandateState::Active => Some(DomainEventType::MandateActive),
        MandateState::Failed => Some(DomainEventType::MandateFailed),
        MandateState::Cancelled => Some(DomainEventType::MandateCancelled),
        MandateState::Expired => Some(DomainEventType::MandateExpired),
        _ => None,
    }
}

fn payment_event_for(state: PaymentState) -> Option<DomainEventType> {
    match state {
        PaymentState::Pending => Some(DomainEventType::PaymentSubmittedToProvider),
        PaymentState::Success => Some(DomainEventType::PaidOut),
        PaymentState::Failed => Some(DomainEventType::PaymentFailed),
        _ => None,
    }
}

/// Retries transient provider failures with doubling delay, up to a fixed
/// attempt budget. Permanent errors are surfaced immediately.
async fn with_retry<T, F, Fut>(operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = PROVIDER_RETRY_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e @ EngineError::ProviderCall(_)) if attempt < PROVIDER_RETRY_ATTEMPTS => {
                warn!(operation, attempt, error = %e, "provider call failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Cutoff timestamp for a sweep timeout.
pub fn cutoff_before(timeout: Duration) -> DateTime<Utc> {
    Utc::now() - TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::{
        InMemoryDomainEventStore, InMemoryGatewayAccounts, InMemoryMandateStore,
        InMemoryPaymentStore, InMemoryProviderEventStore, LoggingNotificationSender,
    };
    use crate::infrastructure::sandbox::SandboxProviderClient;
    use crate::domain::account::GatewayAccount;
    use rust_decimal_macros::dec;

    fn sandbox_engine() -> LifecycleEngine {
        let accounts = InMemoryGatewayAccounts::new();
        accounts.register(GatewayAccount::sandbox("account-1"));

        let mut provider_clients: HashMap<Provider, ProviderClientRef> = HashMap::new();
        provider_clients.insert(Provider::Sandbox, Arc::new(SandboxProviderClient::new()));

        LifecycleEngine::new(EngineDeps {
            mandates: Arc::new(InMemoryMandateStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            domain_events: Arc::new(InMemoryDomainEventStore::new()),
            provider_events: Arc::new(InMemoryProviderEventStore::new()),
            accounts: Arc::new(accounts),
            notifier: Arc::new(LoggingNotificationSender),
            provider_clients,
        })
    }

    fn create_request(external_id: &str, mandate_type: MandateType) -> CreateMandateRequest {
        CreateMandateRequest {
            account_external_id: "account-1".to_string(),
            mandate_type,
            external_id: Some(external_id.to_string()),
            service_reference: Some("ref-1".to_string()),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_create_mandate_requires_account() {
        let engine = sandbox_engine();
        let request = CreateMandateRequest {
            account_external_id: "no-such-account".to_string(),
            mandate_type: MandateType::OnDemand,
            external_id: None,
            service_reference: None,
            description: None,
        };
        let err = engine.create_mandate(request).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { resource: "gateway account", .. }));
    }

    #[tokio::test]
    async fn test_on_demand_setup_flow() {
        let engine = sandbox_engine();
        let mandate = engine
            .create_mandate(create_request("mandate-1", MandateType::OnDemand))
            .await
            .unwrap();
        assert_eq!(mandate.state, MandateState::Created);

        engine.token_exchanged("mandate-1").await.unwrap();
        let mandate = engine.confirm_mandate("mandate-1").await.unwrap();
        assert_eq!(mandate.state, MandateState::SubmittedToProvider);
        assert!(mandate.provider_mandate_id.is_some());
        assert!(mandate.bank_statement_reference.is_some());

        // The ledger replays to the stored state.
        let replayed = engine.replayed_mandate_state("mandate-1").await.unwrap();
        assert_eq!(replayed, mandate.state);
    }

    #[tokio::test]
    async fn test_one_off_confirm_requires_exactly_one_payment() {
        let engine = sandbox_engine();
        engine
            .create_mandate(create_request("mandate-1", MandateType::OneOff))
            .await
            .unwrap();
        engine.token_exchanged("mandate-1").await.unwrap();

        // No payment yet: cardinality violation.
        let err = engine.confirm_mandate("mandate-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Cardinality { found: 0, .. }));

        engine
            .create_payment(CreatePaymentRequest {
                mandate_external_id: "mandate-1".to_string(),
                amount: Amount::new(dec!(15.00)).unwrap(),
                external_id: Some("payment-1".to_string()),
            })
            .await
            .unwrap();

        engine.confirm_mandate("mandate-1").await.unwrap();
        let payment = engine.find_payment("payment-1").await.unwrap();
        assert_eq!(payment.state, PaymentState::Pending);
        assert!(payment.provider_payment_id.is_some());
    }

    #[tokio::test]
    async fn test_cancel_setup_is_terminal() {
        let engine = sandbox_engine();
        engine
            .create_mandate(create_request("mandate-1", MandateType::OnDemand))
            .await
            .unwrap();
        let mandate = engine.cancel_mandate_setup("mandate-1").await.unwrap();
        assert_eq!(mandate.state, MandateState::UserSetupCancelled);

        // No further transition is legal from a terminal state.
        let err = engine.token_exchanged("mandate-1").await.unwrap_err();
        assert!(matches!(err, EngineError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_expire_stuck_mandates_respects_cutoff() {
        let engine = sandbox_engine();
        engine
            .create_mandate(create_request("mandate-old", MandateType::OnDemand))
            .await
            .unwrap();

        // A cutoff in the past catches nothing; one in the future catches the
        // freshly created mandate.
        let expired = engine
            .expire_stuck_mandates(Utc::now() - TimeDelta::minutes(90))
            .await
            .unwrap();
        assert_eq!(expired, 0);

        let expired = engine
            .expire_stuck_mandates(Utc::now() + TimeDelta::seconds(1))
            .await
            .unwrap();
        assert_eq!(expired, 1);
        let mandate = engine.find_mandate("mandate-old").await.unwrap();
        assert_eq!(mandate.state, MandateState::Expired);

        // A second sweep finds nothing: terminal states fall out of the
        // pre-PENDING filter.
        let expired = engine
            .expire_stuck_mandates(Utc::now() + TimeDelta::seconds(1))
            .await
            .unwrap();
        assert_eq!(expired, 0);
    }

    #[tokio::test]
    async fn test_expire_stuck_payments() {
        let engine = sandbox_engine();
        engine
            .create_mandate(create_request("mandate-1", MandateType::OnDemand))
            .await
            .unwrap();
        engine
            .create_payment(CreatePaymentRequest {
                mandate_external_id: "mandate-1".to_string(),
                amount: Amount::new(dec!(10)).unwrap(),
                external_id: Some("payment-1".to_string()),
            })
            .await
            .unwrap();

        let expired = engine
            .expire_stuck_payments(Utc::now() + TimeDelta::seconds(1))
            .await
            .unwrap();
        assert_eq!(expired, 1);
        let payment = engine.find_payment("payment-1").await.unwrap();
        assert_eq!(payment.state, PaymentState::Expired);
    }

    #[tokio::test]
    async fn test_sandbox_recalculation_never_moves_state() {
        let engine = sandbox_engine();
        let mandate = engine
            .create_mandate(create_request("mandate-1", MandateType::OnDemand))
            .await
            .unwrap();

        engine.recalculate_mandate(mandate.id).await.unwrap();
        let after = engine.find_mandate("mandate-1").await.unwrap();
        assert_eq!(after.state, MandateState::Created);
    }
}
