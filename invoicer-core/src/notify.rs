use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::models::Invoice;

/// Kind of outbound invoice email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    Invoice,
    Reminder,
}

/// A queued email about one invoice.
///
/// Delivery is at-least-once and retried by the consumer, not by this
/// crate; the retry contract is published as associated constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailJob {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub recipient: String,
    pub subject: String,
    pub body: Option<String>,
    pub kind: EmailKind,
}

impl EmailJob {
    /// Delivery attempts before the job is marked failed.
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Back-off in seconds before each retry.
    pub const BACKOFF_SECONDS: [u64; 3] = [10, 60, 300];

    pub fn new(
        invoice: &Invoice,
        kind: EmailKind,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: Option<String>,
    ) -> Self {
        Self {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.or_else(|| Some(compose_body(kind, invoice))),
            kind,
        }
    }
}

/// Default message text when the caller supplies none.
pub fn compose_body(kind: EmailKind, invoice: &Invoice) -> String {
    let due = invoice
        .due_date
        .map(|d| format!(" (due {})", d))
        .unwrap_or_default();
    let context = format!(
        "invoice {} for {} {:.2}{}",
        invoice.invoice_number, invoice.currency, invoice.total, due
    );

    match kind {
        EmailKind::Invoice => format!(
            "Dear Customer,\n\nPlease find attached {}.\n\n\
             Thank you for your business!\n",
            context
        ),
        EmailKind::Reminder => format!(
            "Dear Customer,\n\nThis is a friendly reminder regarding {}. \
             Payment is now due and we appreciate your prompt attention.\n\n\
             Thank you for your business!\n",
            context
        ),
    }
}

/// Hands email jobs to the outbound delivery queue.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn enqueue_email(&self, job: EmailJob) -> Result<(), anyhow::Error>;
}

/// Logs jobs instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn enqueue_email(&self, job: EmailJob) -> Result<(), anyhow::Error> {
        info!(
            "Email ({:?}) for invoice {} queued to {}: {}",
            job.kind, job.invoice_number, job.recipient, job.subject
        );
        if let Some(body) = &job.body {
            let preview: String = body.chars().take(100).collect();
            info!("Body preview: {}...", preview);
        }
        Ok(())
    }
}

/// Pushes jobs into an in-process channel drained by a delivery worker.
#[derive(Debug, Clone)]
pub struct QueueNotifier {
    sender: mpsc::UnboundedSender<EmailJob>,
}

impl QueueNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EmailJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for QueueNotifier {
    async fn enqueue_email(&self, job: EmailJob) -> Result<(), anyhow::Error> {
        self.sender
            .send(job)
            .map_err(|e| anyhow::anyhow!("email queue closed, dropped job for {}", e.0.invoice_number))
    }
}
