use crate::domain::account::GatewayAccount;
use crate::domain::mandate::Mandate;
use crate::domain::payment::Payment;
use crate::domain::ports::{ProviderClient, ProviderMandate};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Deterministic provider double. Assigns predictable provider-side ids and
/// never fails, so sandbox accounts can run the full setup and collection
/// flows without an external rail.
#[derive(Default)]
pub struct SandboxProviderClient {
    seq: AtomicU64,
}

impl SandboxProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl ProviderClient for SandboxProviderClient {
    async fn set_up_mandate(
        &self,
        _account: &GatewayAccount,
        mandate: &Mandate,
    ) -> Result<ProviderMandate> {
        Ok(ProviderMandate {
            provider_mandate_id: format!("sandbox-mandate-{}", self.next()),
            bank_statement_reference: Some(format!("SANDBOX-{}", mandate.id)),
        })
    }

    async fn collect_payment(
        &self,
        _account: &GatewayAccount,
        _mandate: &Mandate,
        _payment: &Payment,
    ) -> Result<String> {
        Ok(format!("sandbox-payment-{}", self.next()))
    }
}
