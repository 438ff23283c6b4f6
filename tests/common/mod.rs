use debitflow::application::engine::{EngineDeps, LifecycleEngine};
use debitflow::domain::account::GatewayAccount;
use debitflow::domain::event::Provider;
use debitflow::domain::ports::ProviderClientRef;
use debitflow::infrastructure::in_memory::{
    InMemoryDomainEventStore, InMemoryGatewayAccounts, InMemoryMandateStore, InMemoryPaymentStore,
    InMemoryProviderEventStore, LoggingNotificationSender,
};
use debitflow::infrastructure::sandbox::SandboxProviderClient;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory engine with the given accounts registered. Every provider is
/// backed by the deterministic sandbox client so provider-assigned ids are
/// predictable in assertions.
pub fn engine_with_accounts(accounts: &[GatewayAccount]) -> Arc<LifecycleEngine> {
    let registry = InMemoryGatewayAccounts::new();
    for account in accounts {
        registry.register(account.clone());
    }

    let mut provider_clients: HashMap<Provider, ProviderClientRef> = HashMap::new();
    provider_clients.insert(Provider::Sandbox, Arc::new(SandboxProviderClient::new()));
    provider_clients.insert(Provider::GoCardless, Arc::new(SandboxProviderClient::new()));

    Arc::new(LifecycleEngine::new(EngineDeps {
        mandates: Arc::new(InMemoryMandateStore::new()),
        payments: Arc::new(InMemoryPaymentStore::new()),
        domain_events: Arc::new(InMemoryDomainEventStore::new()),
        provider_events: Arc::new(InMemoryProviderEventStore::new()),
        accounts: Arc::new(registry),
        notifier: Arc::new(LoggingNotificationSender),
        provider_clients,
    }))
}
