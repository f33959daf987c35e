use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::ledger::LedgerError;

/// A verified billing-provider webhook event. Signature verification happens
/// before construction; unverified payloads must never become a
/// `BillingEvent`.
#[derive(Debug, Clone)]
pub struct BillingEvent {
    /// Provider-assigned id, globally unique per provider.
    pub event_id: String,
    /// Kind tag, e.g. "invoice.payment_succeeded".
    pub kind: String,
    pub payload: serde_json::Value,
}

/// First-seen check result for an external event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryBegin {
    FirstSeen,
    AlreadyProcessed,
}

/// What processing an event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Applied,
    /// Duplicate delivery; a no-op, not an error.
    AlreadyProcessed,
    /// Unknown kind; logged and skipped.
    Ignored,
}

/// Idempotency guard storage. `try_begin` must be atomic at the storage
/// layer: insert-if-absent on the event id, where a uniqueness violation
/// signals `AlreadyProcessed` rather than an error.
#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    async fn try_begin(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TryBegin>;

    /// Delete processed-event records older than `cutoff`. Returns the
    /// number pruned.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// Error types for billing reconciliation
#[derive(Debug)]
pub enum BillingError {
    /// Event payload is missing fields the transition needs.
    MalformedEvent(String),
    /// No account could be resolved from the event payload.
    AccountNotFound(String),
    /// Janitor window shorter than the provider's redelivery guarantee.
    RetentionTooShort { requested: i64, minimum: i64 },
    /// Concurrent writer won the version race; the caller may retry.
    StorageConflict,
    /// Ledger rejected a credit grant.
    Ledger(LedgerError),
    /// Database error
    Database(String),
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedEvent(msg) => write!(f, "Malformed billing event: {}", msg),
            Self::AccountNotFound(msg) => write!(f, "Account not found for event: {}", msg),
            Self::RetentionTooShort { requested, minimum } => write!(
                f,
                "Retention window of {} days is below the minimum of {} days",
                requested, minimum
            ),
            Self::StorageConflict => write!(f, "Concurrent update conflict"),
            Self::Ledger(err) => write!(f, "Ledger error: {}", err),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for BillingError {}

impl From<anyhow::Error> for BillingError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<LedgerError> for BillingError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::StorageConflict => Self::StorageConflict,
            LedgerError::Database(msg) => Self::Database(msg),
            other => Self::Ledger(other),
        }
    }
}

/// Applies deduplicated provider events to account entitlement state.
#[async_trait]
pub trait BillingReconciler: Send + Sync {
    /// Process one event. Every event passes the idempotency guard first;
    /// only first-seen events reach a transition.
    async fn process_event(&self, event: BillingEvent) -> Result<EventDisposition, BillingError>;

    /// Janitor entry point: prune processed-event records older than the
    /// given window. Rejects windows below the configured retention floor.
    async fn prune_processed_events(&self, older_than_days: i64) -> Result<u64, BillingError>;
}
