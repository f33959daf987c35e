pub mod ports;
pub mod service;

pub use ports::{
    ConsumeOutcome, ConsumptionOrder, CreditLedger, CreditPack, CreditSource, DenyReason,
    EntitlementSummary, LedgerError, LedgerPolicy,
};
pub use service::{normalize_entitlement, reset_usage_for_period, AccountLocks, CreditLedgerImpl};
