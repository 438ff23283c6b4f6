use crate::domain::account::GatewayAccount;
use crate::domain::event::{DomainEvent, Provider, ProviderEvent, ResourceType, SubjectType};
use crate::domain::mandate::{Mandate, MandateState};
use crate::domain::payment::{Payment, PaymentState};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

#[async_trait]
pub trait MandateStore: Send + Sync {
    /// Persists a new mandate and returns it with its assigned internal id.
    async fn insert(&self, mandate: Mandate) -> Result<Mandate>;
    async fn update(&self, mandate: &Mandate) -> Result<()>;
    async fn get(&self, id: u64) -> Result<Option<Mandate>>;
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Mandate>>;
    async fn find_by_provider_mandate_id(
        &self,
        provider: Provider,
        provider_mandate_id: &str,
    ) -> Result<Option<Mandate>>;
    /// Mandates still in one of `states` that were created before `cutoff`.
    async fn find_stuck(
        &self,
        states: &HashSet<MandateState>,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Mandate>>;
    async fn all(&self) -> Result<Vec<Mandate>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: Payment) -> Result<Payment>;
    async fn update(&self, payment: &Payment) -> Result<()>;
    async fn get(&self, id: u64) -> Result<Option<Payment>>;
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Payment>>;
    async fn find_by_mandate_id(&self, mandate_id: u64) -> Result<Vec<Payment>>;
    async fn find_by_provider_payment_id(
        &self,
        provider: Provider,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>>;
    async fn find_stuck(
        &self,
        states: &HashSet<PaymentState>,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Payment>>;
    async fn all(&self) -> Result<Vec<Payment>>;
}

/// Append-only audit ledger of lifecycle events.
#[async_trait]
pub trait DomainEventStore: Send + Sync {
    async fn append(&self, event: DomainEvent) -> Result<()>;
    /// All events for a subject, ordered by occurred-at and tie-broken by
    /// insertion sequence.
    async fn find_for_subject(
        &self,
        subject_type: SubjectType,
        subject_id: u64,
    ) -> Result<Vec<DomainEvent>>;
}

/// Append-only ledger of raw webhook events, one partition per provider,
/// deduplicated by provider-assigned event identity.
#[async_trait]
pub trait ProviderEventStore: Send + Sync {
    /// Appends the event unless its (provider, event id) identity is already
    /// present. Returns whether the event was actually stored.
    async fn append(&self, event: ProviderEvent) -> Result<bool>;
    /// The event with the greatest provider timestamp among those scoped to
    /// (provider, resource, organisation) whose action is in `actions`.
    /// Insertion order is irrelevant.
    async fn latest_applicable(
        &self,
        provider: Provider,
        resource_type: ResourceType,
        resource_id: &str,
        organisation_id: Option<&str>,
        actions: &[&str],
    ) -> Result<Option<ProviderEvent>>;
    async fn count(&self, provider: Provider) -> Result<usize>;
}

#[async_trait]
pub trait GatewayAccountLookup: Send + Sync {
    /// Fails with `NotFound` if the account does not exist.
    async fn find(&self, external_id: &str) -> Result<GatewayAccount>;
}

/// Fire-and-forget user notifications. Send failures are logged by callers,
/// never propagated into a transition.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn mandate_created(&self, mandate: &Mandate) -> Result<()>;
    async fn mandate_failed(&self, mandate: &Mandate) -> Result<()>;
    async fn mandate_cancelled(&self, mandate: &Mandate) -> Result<()>;
    async fn payment_failed(&self, payment: &Payment) -> Result<()>;
}

/// Result of setting up a mandate on the provider's side.
#[derive(Debug, Clone)]
pub struct ProviderMandate {
    pub provider_mandate_id: String,
    pub bank_statement_reference: Option<String>,
}

/// Outbound boundary to one payment rail. Implementations are expected to be
/// bounded and cancellable; the engine retries transient failures with capped
/// backoff.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn set_up_mandate(
        &self,
        account: &GatewayAccount,
        mandate: &Mandate,
    ) -> Result<ProviderMandate>;
    /// Submits a collection and returns the provider-assigned payment id.
    async fn collect_payment(
        &self,
        account: &GatewayAccount,
        mandate: &Mandate,
        payment: &Payment,
    ) -> Result<String>;
}

pub type MandateStoreRef = Arc<dyn MandateStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type DomainEventStoreRef = Arc<dyn DomainEventStore>;
pub type ProviderEventStoreRef = Arc<dyn ProviderEventStore>;
pub type GatewayAccountLookupRef = Arc<dyn GatewayAccountLookup>;
pub type NotificationSenderRef = Arc<dyn NotificationSender>;
pub type ProviderClientRef = Arc<dyn ProviderClient>;
