use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

/// Entity an audit event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuditEntity {
    Invoice(Uuid),
    RecurringTemplate(Uuid),
}

impl fmt::Display for AuditEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEntity::Invoice(id) => write!(f, "invoice:{}", id),
            AuditEntity::RecurringTemplate(id) => write!(f, "recurring_template:{}", id),
        }
    }
}

/// One entry of the append-only activity trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub entity: AuditEntity,
    /// e.g. `created`, `invoice_sent`, `marked_as_paid`
    pub action: String,
    pub properties: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        entity: AuditEntity,
        action: impl Into<String>,
        properties: Value,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity,
            action: action.into(),
            properties,
            recorded_at,
        }
    }
}

/// Receiver of audit events.
///
/// Fire-and-forget: operations emit after their unit of work commits and
/// never depend on the outcome.
pub trait AuditSink: Send + Sync {
    fn record_event(&self, event: AuditEvent);
}

/// Writes audit events to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_event(&self, event: AuditEvent) {
        info!(
            target: "audit",
            entity = %event.entity,
            action = %event.action,
            properties = %event.properties,
            "audit event"
        );
    }
}

/// Keeps audit events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Actions recorded for `entity`, oldest first.
    pub fn actions_for(&self, entity: AuditEntity) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.entity == entity)
            .map(|event| event.action)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_event(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
