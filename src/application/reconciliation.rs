use crate::application::engine::{cutoff_before, LifecycleEngine};
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{error, info, warn};

/// Configuration for the reconciliation sweep.
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// How often to sweep.
    pub poll_interval: Duration,
    /// How long a mandate may sit in a pre-PENDING state before being expired.
    pub mandate_timeout: Duration,
    /// Same for payments still in NEW.
    pub payment_timeout: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            mandate_timeout: Duration::from_secs(90 * 60),
            payment_timeout: Duration::from_secs(90 * 60),
        }
    }
}

/// What a single sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    pub expired_mandates: usize,
    pub expired_payments: usize,
    /// True when the sweep was skipped because a previous one was still
    /// running.
    pub skipped: bool,
}

/// Periodic sweep that forces a system-driven timeout transition onto
/// entities stuck past their deadline in non-terminal states.
///
/// Sweeps never overlap: the guard flag skips a tick if the previous sweep is
/// still running. Re-running immediately after a sweep is safe, expired
/// entities drop out of the pre-PENDING state filter.
pub struct ReconciliationScheduler {
    engine: Arc<LifecycleEngine>,
    config: ReconciliationConfig,
    sweeping: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
}

impl ReconciliationScheduler {
    pub fn new(engine: Arc<LifecycleEngine>, config: ReconciliationConfig) -> Self {
        Self {
            engine,
            config,
            sweeping: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Spawns the background sweep loop.
    pub async fn start(self: &Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        {
            let mut tx_guard = self.shutdown_tx.lock().await;
            *tx_guard = Some(shutdown_tx);
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            mandate_timeout_secs = self.config.mandate_timeout.as_secs(),
            "starting reconciliation scheduler"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut timer = interval(scheduler.config.poll_interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = scheduler.sweep().await {
                            error!(error = %e, "reconciliation sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("reconciliation scheduler stopped");
                        break;
                    }
                }
            }
        });
    }

    pub async fn stop(&self) {
        let tx_guard = self.shutdown_tx.lock().await;
        if let Some(shutdown_tx) = tx_guard.as_ref() {
            let _ = shutdown_tx.send(());
        }
    }

    /// Runs one sweep. Individual entity failures are handled inside the
    /// engine and do not abort the sweep; an error here means the stuck-entity
    /// query itself failed.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            warn!("previous reconciliation sweep still running, skipping tick");
            return Ok(SweepOutcome {
                skipped: true,
                ..SweepOutcome::default()
            });
        }
        let result = self.sweep_inner().await;
        self.sweeping.store(false, Ordering::Release);
        result
    }

    async fn sweep_inner(&self) -> Result<SweepOutcome> {
        let expired_mandates = self
            .engine
            .expire_stuck_mandates(cutoff_before(self.config.mandate_timeout))
            .await?;
        let expired_payments = self
            .engine
            .expire_stuck_payments(cutoff_before(self.config.payment_timeout))
            .await?;

        if expired_mandates > 0 || expired_payments > 0 {
            info!(expired_mandates, expired_payments, "reconciliation sweep expired stuck entities");
        }
        Ok(SweepOutcome {
            expired_mandates,
            expired_payments,
            skipped: false,
        })
    }
}
