use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Customer, Invoice, InvoiceItem, InvoiceStatus, RecurrenceType, RecurringTemplate,
    TemplateStatus,
};
use crate::store::{Store, StoreTx};

/// Default bound on waiting for the store lock.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    customers: HashMap<Uuid, Customer>,
    invoices: HashMap<Uuid, Invoice>,
    items: HashMap<Uuid, Vec<InvoiceItem>>,
    templates: HashMap<Uuid, RecurringTemplate>,
    sequences: BTreeMap<i32, i64>,
}

/// In-process store.
///
/// A unit of work holds the store lock from `begin` until it is committed
/// or dropped, so units are fully serialized. Writes go to a working copy
/// that replaces the shared state on commit. Plain reads go to a published
/// copy of the last commit and never wait on the unit-of-work lock.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    committed: Arc<RwLock<MemoryState>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            committed: Arc::new(RwLock::new(MemoryState::default())),
            lock_timeout,
        }
    }

    /// Registers a customer, standing in for the external customer service.
    pub async fn add_customer(&self, customer: Customer) {
        let mut state = self.state.lock().await;
        state.customers.insert(customer.id, customer);
        *self.committed.write().await = state.clone();
    }

    /// Committed view of an invoice.
    pub async fn get_invoice(&self, id: Uuid) -> Option<Invoice> {
        let state = self.state.lock().await;
        state.load_invoice(id)
    }

    /// Committed invoices, ordered by invoice number.
    pub async fn invoices(&self) -> Vec<Invoice> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .keys()
            .filter_map(|id| state.load_invoice(*id))
            .collect();
        invoices.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));
        invoices
    }

    pub async fn get_template(&self, id: Uuid) -> Option<RecurringTemplate> {
        self.state.lock().await.templates.get(&id).cloned()
    }

    /// Last number issued for `year`, if any.
    pub async fn sequence(&self, year: i32) -> Option<i64> {
        self.state.lock().await.sequences.get(&year).copied()
    }
}

impl MemoryState {
    fn load_invoice(&self, id: Uuid) -> Option<Invoice> {
        let mut invoice = self.invoices.get(&id)?.clone();
        invoice.items = self.items.get(&id).cloned().unwrap_or_default();
        invoice.items.sort_by_key(|item| item.sort_order);
        Some(invoice)
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> LedgerResult<MemoryTx> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| {
                warn!("Timed out after {:?} waiting for the store lock", self.lock_timeout);
                LedgerError::lock_timeout(format!(
                    "store lock not acquired within {:?}",
                    self.lock_timeout
                ))
            })?;
        let working = guard.clone();
        Ok(MemoryTx {
            guard,
            working,
            committed: self.committed.clone(),
        })
    }

    async fn find_invoice(&self, id: Uuid) -> LedgerResult<Option<Invoice>> {
        Ok(self.committed.read().await.load_invoice(id))
    }

    async fn find_template(&self, id: Uuid) -> LedgerResult<Option<RecurringTemplate>> {
        Ok(self.committed.read().await.templates.get(&id).cloned())
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    committed: Arc<RwLock<MemoryState>>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn customer(&mut self, id: Uuid) -> LedgerResult<Option<Customer>> {
        Ok(self.working.customers.get(&id).cloned())
    }

    async fn next_sequence(&mut self, year: i32) -> LedgerResult<i64> {
        let counter = self.working.sequences.entry(year).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()> {
        let duplicate = self
            .working
            .invoices
            .values()
            .any(|existing| existing.invoice_number == invoice.invoice_number);
        if duplicate {
            return Err(LedgerError::allocation(format!(
                "invoice number {} already issued",
                invoice.invoice_number
            )));
        }

        let mut header = invoice.clone();
        header.items.clear();
        self.working.invoices.insert(invoice.id, header);
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()> {
        let slot = self
            .working
            .invoices
            .get_mut(&invoice.id)
            .ok_or_else(|| LedgerError::not_found("invoice", invoice.id))?;
        let mut header = invoice.clone();
        header.items.clear();
        *slot = header;
        Ok(())
    }

    async fn delete_invoice(&mut self, id: Uuid) -> LedgerResult<()> {
        self.working.items.remove(&id);
        self.working
            .invoices
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::not_found("invoice", id))
    }

    async fn invoice(&mut self, id: Uuid) -> LedgerResult<Option<Invoice>> {
        Ok(self.working.load_invoice(id))
    }

    async fn replace_items(&mut self, invoice_id: Uuid, items: &[InvoiceItem]) -> LedgerResult<()> {
        self.working.items.insert(invoice_id, items.to_vec());
        Ok(())
    }

    async fn overdue_candidates(&mut self, today: NaiveDate) -> LedgerResult<Vec<Invoice>> {
        let mut candidates: Vec<Invoice> = self
            .working
            .invoices
            .values()
            .filter(|invoice| invoice.status == InvoiceStatus::Sent)
            .filter(|invoice| matches!(invoice.due_date, Some(due) if due < today))
            .filter_map(|invoice| self.working.load_invoice(invoice.id))
            .collect();
        candidates.sort_by_key(|invoice| invoice.due_date);
        Ok(candidates)
    }

    async fn insert_template(&mut self, template: &RecurringTemplate) -> LedgerResult<()> {
        self.working.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn update_template(&mut self, template: &RecurringTemplate) -> LedgerResult<()> {
        let slot = self
            .working
            .templates
            .get_mut(&template.id)
            .ok_or_else(|| LedgerError::not_found("recurring template", template.id))?;
        *slot = template.clone();
        Ok(())
    }

    async fn template(&mut self, id: Uuid) -> LedgerResult<Option<RecurringTemplate>> {
        Ok(self.working.templates.get(&id).cloned())
    }

    async fn due_templates(&mut self, today: NaiveDate) -> LedgerResult<Vec<RecurringTemplate>> {
        let mut due: Vec<RecurringTemplate> = self
            .working
            .templates
            .values()
            .filter(|t| matches!(t.status, TemplateStatus::Active | TemplateStatus::Pending))
            .filter(|t| t.recurrence_type != RecurrenceType::Manual)
            .filter(|t| matches!(t.next_invoice_date, Some(next) if next <= today))
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.next_invoice_date, t.created_at));
        Ok(due)
    }

    async fn commit(self) -> LedgerResult<()> {
        let MemoryTx {
            mut guard,
            working,
            committed,
        } = self;
        *committed.write().await = working.clone();
        *guard = working;
        Ok(())
    }
}
