use thiserror::Error;
use uuid::Uuid;

/// Result type used across the ledger and scheduler.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error taxonomy for invoice and template operations.
///
/// Validation, not-found and state-conflict errors are raised before any
/// mutation is committed and surface synchronously to the caller.
/// Allocation errors abort the enclosing unit of work.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or missing input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// The operation is illegal for the entity's current status.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// The sequence allocator could not hand out a number.
    #[error("sequence allocation failed: {reason}")]
    Allocation { reason: String, retryable: bool },

    /// Infrastructure failure in the backing store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Lock contention on the sequence counter. The caller may retry the
    /// whole creation.
    pub fn lock_timeout(msg: impl Into<String>) -> Self {
        Self::Allocation {
            reason: msg.into(),
            retryable: true,
        }
    }

    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation {
            reason: msg.into(),
            retryable: false,
        }
    }

    /// Whether retrying the failed operation as a whole may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Allocation { retryable: true, .. })
    }
}
