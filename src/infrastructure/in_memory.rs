use crate::domain::account::GatewayAccount;
use crate::domain::event::{DomainEvent, Provider, ProviderEvent, ResourceType, SubjectType};
use crate::domain::mandate::{Mandate, MandateState};
use crate::domain::payment::{Payment, PaymentState};
use crate::domain::ports::{
    DomainEventStore, GatewayAccountLookup, MandateStore, NotificationSender, PaymentStore,
    ProviderEventStore,
};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Thread-safe in-memory mandate store.
///
/// Uses `Arc<RwLock<HashMap>>` for shared concurrent access; internal ids are
/// assigned from an atomic sequence on insert. Suitable for tests and the CLI
/// driver where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryMandateStore {
    mandates: Arc<RwLock<HashMap<u64, Mandate>>>,
    seq: Arc<AtomicU64>,
}

impl InMemoryMandateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MandateStore for InMemoryMandateStore {
    async fn insert(&self, mut mandate: Mandate) -> Result<Mandate> {
        mandate.id = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut mandates = self.mandates.write().await;
        mandates.insert(mandate.id, mandate.clone());
        Ok(mandate)
    }

    async fn update(&self, mandate: &Mandate) -> Result<()> {
        let mut mandates = self.mandates.write().await;
        mandates.insert(mandate.id, mandate.clone());
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Mandate>> {
        let mandates = self.mandates.read().await;
        Ok(mandates.get(&id).cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Mandate>> {
        let mandates = self.mandates.read().await;
        Ok(mandates
            .values()
            .find(|m| m.external_id == external_id)
            .cloned())
    }

    async fn find_by_provider_mandate_id(
        &self,
        provider: Provider,
        provider_mandate_id: &str,
    ) -> Result<Option<Mandate>> {
        let mandates = self.mandates.read().await;
        // Provider scoping keeps colliding native ids from different rails apart.
        Ok(mandates
            .values()
            .find(|m| {
                m.provider == provider
                    && m.provider_mandate_id.as_deref() == Some(provider_mandate_id)
            })
            .cloned())
    }

    async fn find_stuck(
        &self,
        states: &HashSet<MandateState>,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Mandate>> {
        let mandates = self.mandates.read().await;
        Ok(mandates
            .values()
            .filter(|m| states.contains(&m.state) && m.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Mandate>> {
        let mandates = self.mandates.read().await;
        let mut all: Vec<_> = mandates.values().cloned().collect();
        all.sort_by_key(|m| m.id);
        Ok(all)
    }
}

/// Thread-safe in-memory payment store.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<u64, Payment>>>,
    seq: Arc<AtomicU64>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, mut payment: Payment) -> Result<Payment> {
        payment.id = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut payments = self.payments.write().await;
        payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let mut payments = self.payments.write().await;
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.get(&id).cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .find(|p| p.external_id == external_id)
            .cloned())
    }

    async fn find_by_mandate_id(&self, mandate_id: u64) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut found: Vec<_> = payments
            .values()
            .filter(|p| p.mandate_id == mandate_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.id);
        Ok(found)
    }

    async fn find_by_provider_payment_id(
        &self,
        provider: Provider,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .find(|p| {
                p.provider == provider
                    && p.provider_payment_id.as_deref() == Some(provider_payment_id)
            })
            .cloned())
    }

    async fn find_stuck(
        &self,
        states: &HashSet<PaymentState>,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .filter(|p| states.contains(&p.state) && p.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut all: Vec<_> = payments.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }
}

/// Append-only in-memory domain-event ledger.
///
/// Rows carry an insertion sequence used as the occurred-at tie-breaker on
/// reads; nothing is ever updated or removed.
#[derive(Default, Clone)]
pub struct InMemoryDomainEventStore {
    rows: Arc<RwLock<Vec<(u64, DomainEvent)>>>,
    seq: Arc<AtomicU64>,
}

impl InMemoryDomainEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DomainEventStore for InMemoryDomainEventStore {
    async fn append(&self, event: DomainEvent) -> Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.rows.write().await;
        rows.push((seq, event));
        Ok(())
    }

    async fn find_for_subject(
        &self,
        subject_type: SubjectType,
        subject_id: u64,
    ) -> Result<Vec<DomainEvent>> {
        let rows = self.rows.read().await;
        let mut found: Vec<_> = rows
            .iter()
            .filter(|(_, e)| e.subject_type == subject_type && e.subject_id == subject_id)
            .cloned()
            .collect();
        found.sort_by_key(|(seq, e)| (e.occurred_at, *seq));
        Ok(found.into_iter().map(|(_, e)| e).collect())
    }
}

/// Append-only in-memory provider-event ledger, one partition per provider,
/// with a dedup index over (provider, event id).
#[derive(Default, Clone)]
pub struct InMemoryProviderEventStore {
    partitions: Arc<RwLock<HashMap<Provider, Vec<ProviderEvent>>>>,
    seen: Arc<RwLock<HashSet<(Provider, String)>>>,
}

impl InMemoryProviderEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderEventStore for InMemoryProviderEventStore {
    async fn append(&self, event: ProviderEvent) -> Result<bool> {
        let mut seen = self.seen.write().await;
        if !seen.insert((event.provider, event.event_id.clone())) {
            return Ok(false);
        }
        let mut partitions = self.partitions.write().await;
        partitions.entry(event.provider).or_default().push(event);
        Ok(true)
    }

    async fn latest_applicable(
        &self,
        provider: Provider,
        resource_type: ResourceType,
        resource_id: &str,
        organisation_id: Option<&str>,
        actions: &[&str],
    ) -> Result<Option<ProviderEvent>> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(&provider)
            .into_iter()
            .flatten()
            .filter(|e| {
                e.resource_type == resource_type
                    && e.resource_id == resource_id
                    && (organisation_id.is_none() || e.organisation_id.as_deref() == organisation_id)
                    && actions.contains(&e.action.as_str())
            })
            .max_by_key(|e| e.occurred_at)
            .cloned())
    }

    async fn count(&self, provider: Provider) -> Result<usize> {
        let partitions = self.partitions.read().await;
        Ok(partitions.get(&provider).map_or(0, Vec::len))
    }
}

/// In-memory gateway account registry used by tests and the CLI driver.
#[derive(Default, Clone)]
pub struct InMemoryGatewayAccounts {
    accounts: Arc<std::sync::RwLock<HashMap<String, GatewayAccount>>>,
}

impl InMemoryGatewayAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account: GatewayAccount) {
        let mut accounts = self.accounts.write().expect("account registry poisoned");
        accounts.insert(account.external_id.clone(), account);
    }
}

#[async_trait]
impl GatewayAccountLookup for InMemoryGatewayAccounts {
    async fn find(&self, external_id: &str) -> Result<GatewayAccount> {
        let accounts = self.accounts.read().expect("account registry poisoned");
        accounts
            .get(external_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                resource: "gateway account",
                id: external_id.to_string(),
            })
    }
}

/// Notification sink that only logs. Real deployments put an email gateway
/// behind this port; failures are the caller's to log, never to propagate.
pub struct LoggingNotificationSender;

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn mandate_created(&self, mandate: &Mandate) -> Result<()> {
        info!(mandate = %mandate.external_id, "notify: mandate created");
        Ok(())
    }

    async fn mandate_failed(&self, mandate: &Mandate) -> Result<()> {
        info!(mandate = %mandate.external_id, "notify: mandate failed");
        Ok(())
    }

    async fn mandate_cancelled(&self, mandate: &Mandate) -> Result<()> {
        info!(mandate = %mandate.external_id, "notify: mandate cancelled");
        Ok(())
    }

    async fn payment_failed(&self, payment: &Payment) -> Result<()> {
        info!(payment = %payment.external_id, "notify: payment failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mandate::MandateType;
    use chrono::TimeZone;

    fn mandate(external_id: &str) -> Mandate {
        Mandate::new(
            external_id.to_string(),
            MandateType::OnDemand,
            "account-1".to_string(),
            Provider::GoCardless,
        )
    }

    #[tokio::test]
    async fn test_mandate_store_assigns_ids() {
        let store = InMemoryMandateStore::new();
        let first = store.insert(mandate("mandate-1")).await.unwrap();
        let second = store.insert(mandate("mandate-2")).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(
            store.get(first.id).await.unwrap().unwrap().external_id,
            "mandate-1"
        );
    }

    #[tokio::test]
    async fn test_provider_mandate_lookup_is_provider_scoped() {
        let store = InMemoryMandateStore::new();
        let mut m = mandate("mandate-1");
        m.provider_mandate_id = Some("MD1".to_string());
        store.insert(m).await.unwrap();

        assert!(store
            .find_by_provider_mandate_id(Provider::GoCardless, "MD1")
            .await
            .unwrap()
            .is_some());
        // Same native id under a different provider does not match.
        assert!(store
            .find_by_provider_mandate_id(Provider::Sandbox, "MD1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_domain_event_ordering_uses_insertion_as_tiebreak() {
        let store = InMemoryDomainEventStore::new();
        let at = Utc.with_ymd_and_hms(2019, 7, 1, 10, 0, 0).unwrap();
        for event_type in [
            crate::domain::event::DomainEventType::MandateCreated,
            crate::domain::event::DomainEventType::MandateTokenExchanged,
        ] {
            store
                .append(DomainEvent {
                    subject_id: 1,
                    subject_type: SubjectType::Mandate,
                    event_type,
                    occurred_at: at,
                    details: None,
                })
                .await
                .unwrap();
        }

        let events = store
            .find_for_subject(SubjectType::Mandate, 1)
            .await
            .unwrap();
        assert_eq!(
            events[0].event_type,
            crate::domain::event::DomainEventType::MandateCreated
        );
        assert_eq!(
            events[1].event_type,
            crate::domain::event::DomainEventType::MandateTokenExchanged
        );
    }

    #[tokio::test]
    async fn test_provider_event_dedup() {
        let store = InMemoryProviderEventStore::new();
        let event = ProviderEvent {
            provider: Provider::GoCardless,
            event_id: "EV1".to_string(),
            action: "created".to_string(),
            resource_type: ResourceType::Mandates,
            resource_id: "MD1".to_string(),
            organisation_id: Some("OR1".to_string()),
            occurred_at: Utc::now(),
            details_cause: None,
            details_description: None,
        };

        assert!(store.append(event.clone()).await.unwrap());
        assert!(!store.append(event).await.unwrap());
        assert_eq!(store.count(Provider::GoCardless).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_account_lookup_not_found() {
        let accounts = InMemoryGatewayAccounts::new();
        let err = accounts.find("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
