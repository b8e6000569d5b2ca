use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::sleep;
use tracing::{error, info};

use crate::error::LedgerResult;
use crate::scheduler::RecurringScheduler;
use crate::store::Store;

/// Default time between passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3600);

/// What one scheduler pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub generated: usize,
    pub failed: usize,
    pub marked_overdue: usize,
}

/// Periodic driver for recurring generation.
///
/// Each pass materializes every due template and, when enabled, persists
/// `overdue` for sent invoices past their due date.
pub struct JobScheduler<S: Store> {
    scheduler: Arc<RecurringScheduler<S>>,

    /// Time between passes
    poll_interval: Duration,

    /// Whether each pass also runs the overdue sweep
    sweep_overdue: bool,

    /// Whether the scheduler is running (wrapped in Arc for sharing)
    running: Arc<RwLock<bool>>,

    /// Wakes the loop early on stop
    shutdown: Arc<Notify>,
}

impl<S: Store> JobScheduler<S> {
    /// Creates a new job scheduler.
    ///
    /// # Arguments
    ///
    /// * `scheduler` - Template generator to drive
    /// * `poll_interval` - Time between passes (default: one hour)
    ///
    /// # Returns
    ///
    /// Returns a new `JobScheduler` instance with the overdue sweep enabled.
    pub fn new(scheduler: Arc<RecurringScheduler<S>>, poll_interval: Option<Duration>) -> Self {
        Self {
            scheduler,
            poll_interval: poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            sweep_overdue: true,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_overdue_sweep(mut self, enabled: bool) -> Self {
        self.sweep_overdue = enabled;
        self
    }

    /// Runs passes until [`Self::stop`] is called.
    ///
    /// A failing pass is logged and the loop keeps going; the next pass
    /// picks up whatever was left due.
    pub async fn start(&self) -> Result<(), anyhow::Error> {
        *self.running.write().await = true;
        info!(
            "JobScheduler started with poll interval: {} seconds",
            self.poll_interval.as_secs()
        );

        while *self.running.read().await {
            match self.run_once().await {
                Ok(summary) => {
                    if summary != PassSummary::default() {
                        info!(
                            "Pass finished: {} generated, {} failed, {} marked overdue",
                            summary.generated, summary.failed, summary.marked_overdue
                        );
                    }
                }
                Err(e) => {
                    error!("Error in scheduler loop: {}", e);
                }
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = self.shutdown.notified() => {}
            }
        }

        info!("JobScheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Stops the loop after the current pass.
    pub async fn stop(&self) {
        info!("Stopping JobScheduler...");
        *self.running.write().await = false;
        self.shutdown.notify_one();
    }

    /// Runs a single pass for the clock's current date.
    pub async fn run_once(&self) -> LedgerResult<PassSummary> {
        let ledger = self.scheduler.ledger();
        let today = ledger.clock().today();

        let report = self.scheduler.run_due_report(today).await?;
        let marked_overdue = if self.sweep_overdue {
            ledger.promote_overdue(today).await?
        } else {
            0
        };

        Ok(PassSummary {
            generated: report.generated,
            failed: report.failures.len(),
            marked_overdue,
        })
    }
}
