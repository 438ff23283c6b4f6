use crate::domain::account::GatewayAccount;
use crate::domain::event::{Provider, ProviderEvent, ResourceType};
use crate::domain::mandate::{Mandate, MandateState, StateDetails};
use crate::domain::payment::{Payment, PaymentState};
use crate::domain::ports::{ProviderEventStore, ProviderEventStoreRef};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A lifecycle state derived from provider events, with the provider-supplied
/// reason when one was given.
#[derive(Debug, Clone, PartialEq)]
pub struct StateWithDetails<S> {
    pub state: S,
    pub details: Option<StateDetails>,
}

/// Derives the latest applicable mandate state from the provider-event ledger.
/// `Ok(None)` means no derivable state yet, which is not an error.
#[async_trait]
pub trait MandateStateCalculator: Send + Sync {
    async fn calculate(
        &self,
        mandate: &Mandate,
        account: &GatewayAccount,
    ) -> Result<Option<StateWithDetails<MandateState>>>;
}

#[async_trait]
pub trait PaymentStateCalculator: Send + Sync {
    async fn calculate(
        &self,
        payment: &Payment,
        account: &GatewayAccount,
    ) -> Result<Option<StateWithDetails<PaymentState>>>;
}

/// GoCardless actions that change mandate state. Events whose action is
/// outside this map never affect a mandate.
const GOCARDLESS_MANDATE_ACTIONS: &[(&str, MandateState)] = &[
    ("created", MandateState::Created),
    ("submitted", MandateState::SubmittedToProvider),
    ("active", MandateState::Active),
    ("cancelled", MandateState::Cancelled),
    ("failed", MandateState::Failed),
];

/// GoCardless actions that change payment state.
const GOCARDLESS_PAYMENT_ACTIONS: &[(&str, PaymentState)] = &[
    ("created", PaymentState::Pending),
    ("submitted", PaymentState::Pending),
    ("confirmed", PaymentState::Success),
    ("paid_out", PaymentState::Success),
    ("failed", PaymentState::Failed),
];

fn details_of(event: &ProviderEvent) -> Option<StateDetails> {
    if event.details_cause.is_none() && event.details_description.is_none() {
        return None;
    }
    Some(StateDetails {
        cause: event.details_cause.clone(),
        description: event.details_description.clone(),
    })
}

/// GoCardless requires organisation-scoped lookups; an account without an
/// organisation id is misconfigured, not merely eventless.
fn organisation_of(account: &GatewayAccount) -> Result<&str> {
    account
        .organisation_id
        .as_deref()
        .ok_or_else(|| EngineError::MissingOrganisationId {
            account: account.external_id.clone(),
        })
}

pub struct GoCardlessMandateStateCalculator {
    provider_events: ProviderEventStoreRef,
}

impl GoCardlessMandateStateCalculator {
    pub fn new(provider_events: ProviderEventStoreRef) -> Self {
        Self { provider_events }
    }
}

#[async_trait]
impl MandateStateCalculator for GoCardlessMandateStateCalculator {
    async fn calculate(
        &self,
        mandate: &Mandate,
        account: &GatewayAccount,
    ) -> Result<Option<StateWithDetails<MandateState>>> {
        let Some(provider_mandate_id) = mandate.provider_mandate_id.as_deref() else {
            return Ok(None);
        };
        let organisation_id = organisation_of(account)?;

        let actions: Vec<&str> = GOCARDLESS_MANDATE_ACTIONS.iter().map(|(a, _)| *a).collect();
        let latest = self
            .provider_events
            .latest_applicable(
                Provider::GoCardless,
                ResourceType::Mandates,
                provider_mandate_id,
                Some(organisation_id),
                &actions,
            )
            .await?;

        Ok(latest.and_then(|event| {
            GOCARDLESS_MANDATE_ACTIONS
                .iter()
                .find(|(action, _)| *action == event.action)
                .map(|(_, state)| StateWithDetails {
                    state: *state,
                    details: details_of(&event),
                })
        }))
    }
}

pub struct GoCardlessPaymentStateCalculator {
    provider_events: ProviderEventStoreRef,
}

impl GoCardlessPaymentStateCalculator {
    pub fn new(provider_events: ProviderEventStoreRef) -> Self {
        Self { provider_events }
    }
}

#[async_trait]
impl PaymentStateCalculator for GoCardlessPaymentStateCalculator {
    async fn calculate(
        &self,
        payment: &Payment,
        account: &GatewayAccount,
    ) -> Result<Option<StateWithDetails<PaymentState>>> {
        let Some(provider_payment_id) = payment.provider_payment_id.as_deref() else {
            return Ok(None);
        };
        let organisation_id = organisation_of(account)?;

        let actions: Vec<&str> = GOCARDLESS_PAYMENT_ACTIONS.iter().map(|(a, _)| *a).collect();
        let latest = self
            .provider_events
            .latest_applicable(
                Provider::GoCardless,
                ResourceType::Payments,
                provider_payment_id,
                Some(organisation_id),
                &actions,
            )
            .await?;

        Ok(latest.and_then(|event| {
            GOCARDLESS_PAYMENT_ACTIONS
                .iter()
                .find(|(action, _)| *action == event.action)
                .map(|(_, state)| StateWithDetails {
                    state: *state,
                    details: details_of(&event),
                })
        }))
    }
}

/// Sandbox entities never derive state from provider events; they move only
/// through direct transitions. The calculator always returns nothing.
pub struct SandboxMandateStateCalculator;

#[async_trait]
impl MandateStateCalculator for SandboxMandateStateCalculator {
    async fn calculate(
        &self,
        _mandate: &Mandate,
        _account: &GatewayAccount,
    ) -> Result<Option<StateWithDetails<MandateState>>> {
        Ok(None)
    }
}

pub struct SandboxPaymentStateCalculator;

#[async_trait]
impl PaymentStateCalculator for SandboxPaymentStateCalculator {
    async fn calculate(
        &self,
        _payment: &Payment,
        _account: &GatewayAccount,
    ) -> Result<Option<StateWithDetails<PaymentState>>> {
        Ok(None)
    }
}

/// Strategy registry keyed by provider, populated once at startup. Adding a
/// provider is adding an entry here, not branching in the ingestion path.
pub struct CalculatorRegistry {
    mandates: HashMap<Provider, Arc<dyn MandateStateCalculator>>,
    payments: HashMap<Provider, Arc<dyn PaymentStateCalculator>>,
}

impl CalculatorRegistry {
    pub fn new() -> Self {
        Self {
            mandates: HashMap::new(),
            payments: HashMap::new(),
        }
    }

    /// The standard wiring: GoCardless backed by the provider-event ledger,
    /// Sandbox as the inert double.
    pub fn standard(provider_events: ProviderEventStoreRef) -> Self {
        let mut registry = Self::new();
        registry.register_mandate(
            Provider::GoCardless,
            Arc::new(GoCardlessMandateStateCalculator::new(provider_events.clone())),
        );
        registry.register_payment(
            Provider::GoCardless,
            Arc::new(GoCardlessPaymentStateCalculator::new(provider_events)),
        );
        registry.register_mandate(Provider::Sandbox, Arc::new(SandboxMandateStateCalculator));
        registry.register_payment(Provider::Sandbox, Arc::new(SandboxPaymentStateCalculator));
        registry
    }

    pub fn register_mandate(
        &mut self,
        provider: Provider,
        calculator: Arc<dyn MandateStateCalculator>,
    ) {
        self.mandates.insert(provider, calculator);
    }

    pub fn register_payment(
        &mut self,
        provider: Provider,
        calculator: Arc<dyn PaymentStateCalculator>,
    ) {
        self.payments.insert(provider, calculator);
    }

    pub fn mandate_calculator(&self, provider: Provider) -> Result<&dyn MandateStateCalculator> {
        self.mandates
            .get(&provider)
            .map(Arc::as_ref)
            .ok_or(EngineError::UnknownProvider(provider))
    }

    pub fn payment_calculator(&self, provider: Provider) -> Result<&dyn PaymentStateCalculator> {
        self.payments
            .get(&provider)
            .map(Arc::as_ref)
            .ok_or(EngineError::UnknownProvider(provider))
    }
}

impl Default for CalculatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
