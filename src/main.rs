use clap::Parser;
use debitflow::application::engine::{
    CreateMandateRequest, CreatePaymentRequest, EngineDeps, LifecycleEngine,
};
use debitflow::application::ingester::WebhookIngester;
use debitflow::application::reconciliation::{ReconciliationConfig, ReconciliationScheduler};
use debitflow::domain::event::Provider;
use debitflow::domain::payment::Amount;
use debitflow::domain::ports::{MandateStore, PaymentStore, ProviderClientRef};
use debitflow::infrastructure::in_memory::{
    InMemoryDomainEventStore, InMemoryGatewayAccounts, InMemoryMandateStore, InMemoryPaymentStore,
    InMemoryProviderEventStore, LoggingNotificationSender,
};
use debitflow::infrastructure::sandbox::SandboxProviderClient;
use debitflow::interfaces::json::scenario::{ScenarioReader, ScenarioStep};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input scenario file (JSON lines)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Seconds a mandate may sit in a pre-PENDING state before a sweep
    /// expires it
    #[arg(long, default_value_t = 90 * 60)]
    mandate_timeout_secs: u64,

    /// Same for payments still in NEW
    #[arg(long, default_value_t = 90 * 60)]
    payment_timeout_secs: u64,
}

#[derive(Serialize)]
struct FinalState {
    mandates: Vec<debitflow::domain::mandate::Mandate>,
    payments: Vec<debitflow::domain::payment::Payment>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let accounts = InMemoryGatewayAccounts::new();

    // Scenario replay runs every provider against the local deterministic
    // client; provider-side effects arrive as webhook lines instead.
    let local_client: ProviderClientRef = Arc::new(SandboxProviderClient::new());
    let mut provider_clients: HashMap<Provider, ProviderClientRef> = HashMap::new();
    provider_clients.insert(Provider::Sandbox, local_client.clone());
    provider_clients.insert(Provider::GoCardless, local_client);

    let deps = match cli.db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(db_path) => {
            let store =
                debitflow::infrastructure::rocksdb::RocksDbStore::open(db_path).into_diagnostic()?;
            EngineDeps {
                mandates: Arc::new(store.clone()),
                payments: Arc::new(store.clone()),
                domain_events: Arc::new(store.clone()),
                provider_events: Arc::new(store),
                accounts: Arc::new(accounts.clone()),
                notifier: Arc::new(LoggingNotificationSender),
                provider_clients,
            }
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            miette::bail!("--db-path requires the storage-rocksdb feature");
        }
        None => EngineDeps {
            mandates: Arc::new(InMemoryMandateStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            domain_events: Arc::new(InMemoryDomainEventStore::new()),
            provider_events: Arc::new(InMemoryProviderEventStore::new()),
            accounts: Arc::new(accounts.clone()),
            notifier: Arc::new(LoggingNotificationSender),
            provider_clients,
        },
    };

    let engine = Arc::new(LifecycleEngine::new(deps));
    let ingester = WebhookIngester::new(engine.clone());
    let scheduler = ReconciliationScheduler::new(
        engine.clone(),
        ReconciliationConfig {
            poll_interval: Duration::from_secs(60),
            mandate_timeout: Duration::from_secs(cli.mandate_timeout_secs),
            payment_timeout: Duration::from_secs(cli.payment_timeout_secs),
        },
    );

    let file = File::open(cli.input).into_diagnostic()?;
    for step in ScenarioReader::new(file).steps() {
        match step {
            Ok(step) => {
                if let Err(e) = run_step(step, &engine, &ingester, &scheduler, &accounts).await {
                    error!(error = %e, "error processing step");
                }
            }
            Err(e) => error!(error = %e, "error reading step"),
        }
    }

    let state = FinalState {
        mandates: engine.mandate_store().all().await.into_diagnostic()?,
        payments: engine.payment_store().all().await.into_diagnostic()?,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&state).into_diagnostic()?
    );
    Ok(())
}

async fn run_step(
    step: ScenarioStep,
    engine: &LifecycleEngine,
    ingester: &WebhookIngester,
    scheduler: &ReconciliationScheduler,
    accounts: &InMemoryGatewayAccounts,
) -> debitflow::error::Result<()> {
    match step {
        ScenarioStep::RegisterAccount { account } => {
            accounts.register(account);
            Ok(())
        }
        ScenarioStep::CreateMandate {
            account,
            external_id,
            mandate_type,
            reference,
            description,
        } => engine
            .create_mandate(CreateMandateRequest {
                account_external_id: account,
                mandate_type,
                external_id: Some(external_id),
                service_reference: reference,
                description,
            })
            .await
            .map(drop),
        ScenarioStep::TokenExchanged { mandate } => {
            engine.token_exchanged(&mandate).await.map(drop)
        }
        ScenarioStep::ConfirmMandate { mandate } => {
            engine.confirm_mandate(&mandate).await.map(drop)
        }
        ScenarioStep::CancelMandateSetup { mandate } => {
            engine.cancel_mandate_setup(&mandate).await.map(drop)
        }
        ScenarioStep::ChangePaymentMethod { mandate } => {
            engine.change_payment_method(&mandate).await.map(drop)
        }
        ScenarioStep::CreatePayment {
            mandate,
            external_id,
            amount,
        } => engine
            .create_payment(CreatePaymentRequest {
                mandate_external_id: mandate,
                amount: Amount::try_from(amount)?,
                external_id: Some(external_id),
            })
            .await
            .map(drop),
        ScenarioStep::SubmitPayment { payment } => {
            engine.submit_payment(&payment).await.map(drop)
        }
        ScenarioStep::CancelPayment { payment } => {
            engine.cancel_payment(&payment).await.map(drop)
        }
        ScenarioStep::Webhook { event } => ingester.ingest(event).await,
        ScenarioStep::Sweep => scheduler.sweep().await.map(drop),
    }
}
