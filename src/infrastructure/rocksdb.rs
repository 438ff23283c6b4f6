use crate::domain::event::{DomainEvent, Provider, ProviderEvent, ResourceType, SubjectType};
use crate::domain::mandate::{Mandate, MandateState};
use crate::domain::payment::{Payment, PaymentState};
use crate::domain::ports::{DomainEventStore, MandateStore, PaymentStore, ProviderEventStore};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Column family for mandate rows, keyed by internal id.
pub const CF_MANDATES: &str = "mandates";
/// Column family for payment rows, keyed by internal id.
pub const CF_PAYMENTS: &str = "payments";
/// Column family for the append-only domain-event ledger, keyed by insertion
/// sequence.
pub const CF_DOMAIN_EVENTS: &str = "domain_events";
/// Column family for the provider-event ledger, keyed by
/// `<provider>/<event id>` so dedup is a plain key lookup.
pub const CF_PROVIDER_EVENTS: &str = "provider_events";

fn provider_tag(provider: Provider) -> &'static str {
    match provider {
        Provider::Sandbox => "sandbox",
        Provider::GoCardless => "gocardless",
    }
}

/// Persistent store implementation using RocksDB.
///
/// One column family per entity/ledger; values are serde_json encoded. The
/// struct is thread-safe, `Clone` shares the underlying `Arc<DB>`, and the
/// same instance backs all four store ports.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    mandate_seq: Arc<AtomicU64>,
    payment_seq: Arc<AtomicU64>,
    event_seq: Arc<AtomicU64>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at `path`, ensuring all column
    /// families exist and restoring the id sequences from the stored maxima.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_MANDATES, CF_PAYMENTS, CF_DOMAIN_EVENTS, CF_PROVIDER_EVENTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        let store = Self {
            mandate_seq: Arc::new(AtomicU64::new(Self::max_key(&db, CF_MANDATES)?)),
            payment_seq: Arc::new(AtomicU64::new(Self::max_key(&db, CF_PAYMENTS)?)),
            event_seq: Arc::new(AtomicU64::new(Self::max_key(&db, CF_DOMAIN_EVENTS)?)),
            db: Arc::new(db),
        };
        Ok(store)
    }

    fn max_key(db: &DB, cf_name: &str) -> Result<u64> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| EngineError::Internal(format!("column family {cf_name} missing")))?;
        let mut max = 0u64;
        for item in db.iterator_cf(cf, IteratorMode::End) {
            let (key, _) = item?;
            if key.len() == 8 {
                max = u64::from_be_bytes(key.as_ref().try_into().expect("length checked"));
            }
            break;
        }
        Ok(max)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::Internal(format!("column family {name} missing")))
    }

    fn put_json<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<(Box<[u8]>, T)>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            rows.push((key, serde_json::from_slice(&value)?));
        }
        Ok(rows)
    }
}

#[async_trait]
impl MandateStore for RocksDbStore {
    async fn insert(&self, mut mandate: Mandate) -> Result<Mandate> {
        mandate.id = self.mandate_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.put_json(CF_MANDATES, &mandate.id.to_be_bytes(), &mandate)?;
        Ok(mandate)
    }

    async fn update(&self, mandate: &Mandate) -> Result<()> {
        self.put_json(CF_MANDATES, &mandate.id.to_be_bytes(), mandate)
    }

    async fn get(&self, id: u64) -> Result<Option<Mandate>> {
        self.get_json(CF_MANDATES, &id.to_be_bytes())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Mandate>> {
        Ok(self
            .scan::<Mandate>(CF_MANDATES)?
            .into_iter()
            .map(|(_, m)| m)
            .find(|m| m.external_id == external_id))
    }

    async fn find_by_provider_mandate_id(
        &self,
        provider: Provider,
        provider_mandate_id: &str,
    ) -> Result<Option<Mandate>> {
        Ok(self
            .scan::<Mandate>(CF_MANDATES)?
            .into_iter()
            .map(|(_, m)| m)
            .find(|m| {
                m.provider == provider
                    && m.provider_mandate_id.as_deref() == Some(provider_mandate_id)
            }))
    }

    async fn find_stuck(
        &self,
        states: &HashSet<MandateState>,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Mandate>> {
        Ok(self
            .scan::<Mandate>(CF_MANDATES)?
            .into_iter()
            .map(|(_, m)| m)
            .filter(|m| states.contains(&m.state) && m.created_at < cutoff)
            .collect())
    }

    async fn all(&self) -> Result<Vec<Mandate>> {
        Ok(self
            .scan::<Mandate>(CF_MANDATES)?
            .into_iter()
            .map(|(_, m)| m)
            .collect())
    }
}

#[async_trait]
impl PaymentStore for RocksDbStore {
    async fn insert(&self, mut payment: Payment) -> Result<Payment> {
        payment.id = self.payment_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.put_json(CF_PAYMENTS, &payment.id.to_be_bytes(), &payment)?;
        Ok(payment)
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        self.put_json(CF_PAYMENTS, &payment.id.to_be_bytes(), payment)
    }

    async fn get(&self, id: u64) -> Result<Option<Payment>> {
        self.get_json(CF_PAYMENTS, &id.to_be_bytes())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .map(|(_, p)| p)
            .find(|p| p.external_id == external_id))
    }

    async fn find_by_mandate_id(&self, mandate_id: u64) -> Result<Vec<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| p.mandate_id == mandate_id)
            .collect())
    }

    async fn find_by_provider_payment_id(
        &self,
        provider: Provider,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .map(|(_, p)| p)
            .find(|p| {
                p.provider == provider
                    && p.provider_payment_id.as_deref() == Some(provider_payment_id)
            }))
    }

    async fn find_stuck(
        &self,
        states: &HashSet<PaymentState>,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| states.contains(&p.state) && p.created_at < cutoff)
            .collect())
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .map(|(_, p)| p)
            .collect())
    }
}

#[async_trait]
impl DomainEventStore for RocksDbStore {
    async fn append(&self, event: DomainEvent) -> Result<()> {
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.put_json(CF_DOMAIN_EVENTS, &seq.to_be_bytes(), &event)
    }

    async fn find_for_subject(
        &self,
        subject_type: SubjectType,
        subject_id: u64,
    ) -> Result<Vec<DomainEvent>> {
        // Keys are the insertion sequence, so the scan is already in
        // insertion order; a stable sort by occurred-at keeps it as the
        // tie-breaker.
        let mut events: Vec<DomainEvent> = self
            .scan::<DomainEvent>(CF_DOMAIN_EVENTS)?
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| e.subject_type == subject_type && e.subject_id == subject_id)
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }
}

#[async_trait]
impl ProviderEventStore for RocksDbStore {
    async fn append(&self, event: ProviderEvent) -> Result<bool> {
        let key = format!("{}/{}", provider_tag(event.provider), event.event_id);
        let cf = self.cf(CF_PROVIDER_EVENTS)?;
        if self.db.get_pinned_cf(cf, key.as_bytes())?.is_some() {
            return Ok(false);
        }
        self.put_json(CF_PROVIDER_EVENTS, key.as_bytes(), &event)?;
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
        Ok(self
            .scan::<ProviderEvent>(CF_PROVIDER_EVENTS)?
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| {
                e.provider == provider
                    && e.resource_type == resource_type
                    && e.resource_id == resource_id
                    && (organisation_id.is_none() || e.organisation_id.as_deref() == organisation_id)
                    && actions.contains(&e.action.as_str())
            })
            .max_by_key(|e| e.occurred_at))
    }

    async fn count(&self, provider: Provider) -> Result<usize> {
        let prefix = format!("{}/", provider_tag(provider));
        let cf = self.cf(CF_PROVIDER_EVENTS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if key.starts_with(prefix.as_bytes()) {
                count += 1;
            }
        }
        Ok(count)
    }
}
