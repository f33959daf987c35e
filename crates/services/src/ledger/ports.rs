use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::account::PlanStatus;
use crate::plan::Membership;
use crate::AccountId;

/// A purchasable bundle of add-on story credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub enum CreditPack {
    Single,
    FivePack,
    TenPack,
}

impl CreditPack {
    pub fn units(&self) -> u32 {
        match self {
            CreditPack::Single => 1,
            CreditPack::FivePack => 5,
            CreditPack::TenPack => 10,
        }
    }

    /// Parse a provider product key ("single", "five_pack", "ten_pack").
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "single" => Some(CreditPack::Single),
            "five_pack" => Some(CreditPack::FivePack),
            "ten_pack" => Some(CreditPack::TenPack),
            _ => None,
        }
    }
}

/// Where a consumed unit is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditSource {
    BaseQuota,
    AddOn,
}

/// Consumption priority, an explicit ordered policy rather than incidental
/// code order. The default spends base quota first so purchased credits are
/// the last resort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionOrder {
    BaseThenAddOn,
    AddOnThenBase,
}

impl ConsumptionOrder {
    pub fn sources(&self) -> [CreditSource; 2] {
        match self {
            ConsumptionOrder::BaseThenAddOn => [CreditSource::BaseQuota, CreditSource::AddOn],
            ConsumptionOrder::AddOnThenBase => [CreditSource::AddOn, CreditSource::BaseQuota],
        }
    }

    /// Parse the configuration key; anything unrecognized keeps the default.
    pub fn from_key(key: &str) -> Self {
        match key {
            "add_on_first" => ConsumptionOrder::AddOnThenBase,
            _ => ConsumptionOrder::BaseThenAddOn,
        }
    }
}

/// Ledger policy knobs, derived from configuration.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    pub consumption_order: ConsumptionOrder,
    /// Whether add-on credits survive a period rollover.
    pub add_on_carryover: bool,
    /// Cycle length for accounts without provider period bounds.
    pub free_cycle: Duration,
}

impl LedgerPolicy {
    pub fn from_config(config: &config::PlansConfig) -> Self {
        Self {
            consumption_order: ConsumptionOrder::from_key(&config.consumption_order),
            add_on_carryover: config.add_on_carryover,
            free_cycle: Duration::days(config.free_cycle_days.max(1)),
        }
    }
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            consumption_order: ConsumptionOrder::BaseThenAddOn,
            add_on_carryover: true,
            free_cycle: Duration::days(30),
        }
    }
}

/// Why a consumption attempt was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    QuotaExhausted,
}

/// Outcome of a consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// One unit was consumed; `remaining` is the effective quota left.
    Allowed { remaining: i64 },
    Denied { reason: DenyReason },
}

/// Snapshot of an account's entitlement, normalized to the current period.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct EntitlementSummary {
    pub membership: Membership,
    pub plan_status: PlanStatus,
    pub base_quota: i64,
    pub period_usage: i64,
    pub add_on_balance: i64,
    /// max(base_quota - period_usage, 0) + add_on_balance
    pub remaining: i64,
    pub stories_generated_total: i64,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
}

/// Error types for ledger operations
#[derive(Debug)]
pub enum LedgerError {
    AccountNotFound,
    /// The tier does not permit add-on purchases.
    PlanNotEligible(Membership),
    /// Pack quantity outside [1, 100].
    InvalidQuantity(u32),
    /// Concurrent writer won the version race; the caller may retry.
    StorageConflict,
    /// Database error
    Database(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountNotFound => write!(f, "Account not found"),
            Self::PlanNotEligible(membership) => {
                write!(f, "Plan '{}' does not permit add-on purchases", membership)
            }
            Self::InvalidQuantity(quantity) => {
                write!(f, "Invalid pack quantity {}: must be within 1..=100", quantity)
            }
            Self::StorageConflict => write!(f, "Concurrent update conflict"),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// The single source of truth for "may this account consume one story
/// generation unit right now".
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Entitlement snapshot, normalized to the current period first.
    async fn summary(&self, account_id: AccountId) -> Result<EntitlementSummary, LedgerError>;

    /// Atomic check-and-decrement of one generation unit. No two concurrent
    /// calls may both observe `Allowed` when a single unit remains.
    async fn try_consume(&self, account_id: AccountId) -> Result<ConsumeOutcome, LedgerError>;

    /// Credit `quantity` packs onto the add-on balance. Returns the new
    /// balance. Additive, so callers must guarantee at-most-once invocation
    /// per external event (the idempotency guard's job, not the ledger's).
    async fn add_credits(
        &self,
        account_id: AccountId,
        pack: CreditPack,
        quantity: u32,
    ) -> Result<i64, LedgerError>;
}
