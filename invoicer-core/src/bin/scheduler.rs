use dotenv::dotenv;
use invoicer_core::audit::TracingAuditSink;
use invoicer_core::clock::SystemClock;
use invoicer_core::config::Settings;
use invoicer_core::db;
use invoicer_core::ledger::InvoiceLedger;
use invoicer_core::notify::LogNotifier;
use invoicer_core::scheduler::{JobScheduler, RecurringScheduler};
use invoicer_core::store::PgStore;
use invoicer_core::telemetry;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Scheduler binary entry point.
///
/// Each pass generates invoices for every due recurring template and then
/// marks sent invoices past their due date as overdue. With `--once` it
/// runs a single pass and exits, for use from cron.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    telemetry::init_tracing();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");
    let settings = Settings::from_env()?;

    info!("Starting invoicer scheduler...");

    let pool = db::create_pool(&settings).await?;
    db::run_migrations(&pool).await?;

    let store = PgStore::new(pool, settings.sequence_lock_timeout);
    let ledger = Arc::new(InvoiceLedger::new(
        store,
        Arc::new(SystemClock),
        Arc::new(TracingAuditSink),
        Arc::new(LogNotifier),
    ));
    let scheduler = Arc::new(RecurringScheduler::new(ledger));
    let job = Arc::new(
        JobScheduler::new(scheduler, Some(settings.poll_interval))
            .with_overdue_sweep(settings.overdue_sweep_enabled),
    );

    if once {
        let summary = job.run_once().await?;
        info!(
            "Single pass finished: {} generated, {} failed, {} marked overdue",
            summary.generated, summary.failed, summary.marked_overdue
        );
        return Ok(());
    }

    let runner = job.clone();
    let mut scheduler_handle = tokio::spawn(async move {
        if let Err(e) = runner.start().await {
            error!("Scheduler error: {}", e);
        }
    });

    let interrupted = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            true
        }
        _ = &mut scheduler_handle => {
            info!("Scheduler task completed");
            false
        }
    };

    if interrupted {
        job.stop().await;
        if let Err(e) = scheduler_handle.await {
            error!("Scheduler task failed: {}", e);
        }
    }

    info!("Invoicer scheduler stopped");
    Ok(())
}
