use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::Membership;
use crate::{AccountId, SessionId};

/// Billing-provider subscription state mirrored onto the account. Purely
/// informational for support and UI; membership alone decides quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub enum PlanStatus {
    None,
    Active,
    PastDue,
    Canceled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::None => "none",
            PlanStatus::Active => "active",
            PlanStatus::PastDue => "past_due",
            PlanStatus::Canceled => "canceled",
        }
    }

    /// Map a provider status string. Unrecognized values return None so the
    /// caller can leave the stored status untouched.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "none" => Some(PlanStatus::None),
            "active" | "trialing" => Some(PlanStatus::Active),
            "past_due" => Some(PlanStatus::PastDue),
            "canceled" => Some(PlanStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entitlement and usage state owned by the account. Only the credit ledger
/// and the billing reconciler mutate this, always under the per-account
/// serialization point; `version` backs the conditional write at the storage
/// layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementState {
    pub membership: Membership,
    /// Provider plan key as received (free text mirror).
    pub plan_key: Option<String>,
    pub plan_status: PlanStatus,
    pub billing_customer_ref: Option<String>,
    pub billing_subscription_ref: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    /// Monotonic total, informational.
    pub stories_generated_total: i64,
    /// Base-quota units consumed in the current period; reset at rollover.
    pub period_usage: i64,
    /// Purchased add-on credits. Never negative.
    pub add_on_balance: i64,
    /// Add-on units spent in the current period; reset at rollover.
    pub add_on_spent_this_period: i64,
    pub last_reset_at: DateTime<Utc>,
    pub version: i64,
}

impl EntitlementState {
    /// Fresh Free-tier entitlement for a newly registered account.
    pub fn new_free(now: DateTime<Utc>) -> Self {
        Self {
            membership: Membership::Free,
            plan_key: None,
            plan_status: PlanStatus::None,
            billing_customer_ref: None,
            billing_subscription_ref: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at: None,
            stories_generated_total: 0,
            period_usage: 0,
            add_on_balance: 0,
            add_on_spent_this_period: 0,
            last_reset_at: now,
            version: 0,
        }
    }
}

/// Represents a registered account.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    /// Normalized (lowercase) username, unique.
    pub username: String,
    /// Opaque password hash.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub entitlement: EntitlementState,
}

/// Data for creating a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub entitlement: EntitlementState,
}

/// An authenticated session. Tokens are stored hashed.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub account_id: AccountId,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub account_id: AccountId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Error types for account operations
#[derive(Debug)]
pub enum AccountError {
    EmailTaken,
    UsernameTaken,
    /// Username failed normalization rules.
    InvalidUsername(String),
    InvalidCredentials,
    AccountNotFound,
    /// Database error
    Database(String),
}

impl fmt::Display for AccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmailTaken => write!(f, "Email is already registered"),
            Self::UsernameTaken => write!(f, "Username is already taken"),
            Self::InvalidUsername(reason) => write!(f, "Invalid username: {}", reason),
            Self::InvalidCredentials => write!(f, "Invalid email/username or password"),
            Self::AccountNotFound => write!(f, "Account not found"),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for AccountError {}

impl From<anyhow::Error> for AccountError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Repository trait for accounts and their entitlement state.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account. Returns None when email or username is already
    /// taken (unique constraint), leaving the distinction to the caller.
    async fn insert_account(&self, account: NewAccount) -> anyhow::Result<Option<Account>>;

    async fn get_account(&self, id: AccountId) -> anyhow::Result<Option<Account>>;

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Account>>;

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<Account>>;

    async fn find_by_billing_customer_ref(&self, r: &str) -> anyhow::Result<Option<Account>>;

    async fn find_by_billing_subscription_ref(&self, r: &str) -> anyhow::Result<Option<Account>>;

    /// Conditional write of the entitlement state guarded by
    /// `state.version`: persists `state` with version + 1 only when the
    /// stored version still equals `state.version`. Returns Ok(false) on a
    /// version mismatch (concurrent writer won).
    async fn save_entitlement(
        &self,
        id: AccountId,
        state: &EntitlementState,
    ) -> anyhow::Result<bool>;
}

/// Repository trait for sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: NewSession) -> anyhow::Result<Session>;

    async fn get_session_by_token_hash(&self, token_hash: &str)
        -> anyhow::Result<Option<Session>>;

    async fn delete_session(&self, session_id: SessionId) -> anyhow::Result<()>;
}

/// Password hashing boundary. Mechanics (algorithm, salting) stay behind this
/// port.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> anyhow::Result<String>;

    fn verify(&self, password: &str, password_hash: &str) -> anyhow::Result<bool>;
}

/// Service trait for registration, login and profile access.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Register a new account on the Free tier.
    async fn register(
        &self,
        email: String,
        username: String,
        password: String,
    ) -> Result<Account, AccountError>;

    /// Log in with email or username. Returns the session and the raw
    /// bearer token (only ever returned here; stored hashed).
    async fn login(
        &self,
        identifier: String,
        password: String,
    ) -> Result<(Session, String), AccountError>;

    async fn logout(&self, session_id: SessionId) -> Result<(), AccountError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, AccountError>;
}
