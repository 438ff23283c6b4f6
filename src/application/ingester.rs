use crate::application::engine::LifecycleEngine;
use crate::domain::event::{ProviderEvent, ResourceType};
use crate::domain::ports::{MandateStore, PaymentStore, ProviderEventStore};
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Idempotent entry point for validated provider webhooks.
///
/// Dedup by provider event identity happens before anything else, so
/// at-least-once delivery never double-applies. After a fresh append the
/// owning entity's state is recalculated from the ledger.
pub struct WebhookIngester {
    engine: Arc<LifecycleEngine>,
}

impl WebhookIngester {
    pub fn new(engine: Arc<LifecycleEngine>) -> Self {
        Self { engine }
    }

    pub async fn ingest(&self, event: ProviderEvent) -> Result<()> {
        let stored = self.engine.provider_events().append(event.clone()).await?;
        if !stored {
            debug!(provider = ?event.provider, event_id = %event.event_id, "duplicate provider event ignored");
            return Ok(());
        }
        debug!(provider = ?event.provider, event_id = %event.event_id, action = %event.action, "provider event stored");

        match event.resource_type {
            ResourceType::Mandates => {
                let mandate = self
                    .engine
                    .mandate_store()
                    .find_by_provider_mandate_id(event.provider, &event.resource_id)
                    .await?;
                match mandate {
                    Some(mandate) => self.engine.recalculate_mandate(mandate.id).await,
                    None => {
                        warn!(provider = ?event.provider, resource_id = %event.resource_id,
                            "provider event does not match any mandate");
                        Ok(())
                    }
                }
            }
            ResourceType::Payments => {
                let payment = self
                    .engine
                    .payment_store()
                    .find_by_provider_payment_id(event.provider, &event.resource_id)
                    .await?;
                match payment {
                    Some(payment) => self.engine.recalculate_payment(payment.id).await,
                    None => {
                        warn!(provider = ?event.provider, resource_id = %event.resource_id,
                            "provider event does not match any payment");
                        Ok(())
                    }
                }
            }
        }
    }
}
