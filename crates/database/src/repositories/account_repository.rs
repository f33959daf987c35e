use crate::pool::DbPool;
use async_trait::async_trait;
use services::account::{Account, AccountRepository, EntitlementState, NewAccount, PlanStatus};
use services::plan::Membership;
use services::AccountId;
use tokio_postgres::Row;

const ACCOUNT_COLUMNS: &str = "id, email, username, password_hash, membership, plan_key, \
    plan_status, billing_customer_ref, billing_subscription_ref, current_period_start, \
    current_period_end, cancel_at, stories_generated_total, period_usage, add_on_balance, \
    add_on_spent_this_period, last_reset_at, version, created_at, updated_at";

fn account_from_row(row: &Row) -> Account {
    Account {
        id: row.get("id"),
        email: row.get("email"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        entitlement: EntitlementState {
            // Stored as text; unknown values degrade to the Free tier.
            membership: Membership::from_plan_key(row.get::<_, String>("membership").as_str()),
            plan_key: row.get("plan_key"),
            plan_status: PlanStatus::from_provider(row.get::<_, String>("plan_status").as_str())
                .unwrap_or(PlanStatus::None),
            billing_customer_ref: row.get("billing_customer_ref"),
            billing_subscription_ref: row.get("billing_subscription_ref"),
            current_period_start: row.get("current_period_start"),
            current_period_end: row.get("current_period_end"),
            cancel_at: row.get("cancel_at"),
            stories_generated_total: row.get("stories_generated_total"),
            period_usage: row.get("period_usage"),
            add_on_balance: row.get("add_on_balance"),
            add_on_spent_this_period: row.get("add_on_spent_this_period"),
            last_reset_at: row.get("last_reset_at"),
            version: row.get("version"),
        },
    }
}

pub struct PostgresAccountRepository {
    pool: DbPool,
}

impl PostgresAccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_column(&self, sql: &str, value: &str) -> anyhow::Result<Option<Account>> {
        let client = self.pool.get().await?;
        let row = client.query_opt(sql, &[&value]).await?;
        Ok(row.map(|row| account_from_row(&row)))
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn insert_account(&self, account: NewAccount) -> anyhow::Result<Option<Account>> {
        tracing::info!(
            "Repository: Inserting account - email={}, username={}",
            account.email,
            account.username
        );

        let client = self.pool.get().await?;
        let id = AccountId::new();
        let ent = &account.entitlement;

        let sql = format!(
            "INSERT INTO accounts (
                id, email, username, password_hash, membership, plan_status,
                last_reset_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let result = client
            .query_one(
                sql.as_str(),
                &[
                    &id,
                    &account.email,
                    &account.username,
                    &account.password_hash,
                    &ent.membership.as_str(),
                    &ent.plan_status.as_str(),
                    &ent.last_reset_at,
                ],
            )
            .await;

        match result {
            Ok(row) => Ok(Some(account_from_row(&row))),
            Err(e) => {
                if let Some(code) = e.code() {
                    if *code == tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
                        return Ok(None);
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn get_account(&self, id: AccountId) -> anyhow::Result<Option<Account>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        Ok(row.map(|row| account_from_row(&row)))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Account>> {
        self.find_by_column(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"),
            email,
        )
        .await
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<Account>> {
        self.find_by_column(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1"),
            username,
        )
        .await
    }

    async fn find_by_billing_customer_ref(&self, r: &str) -> anyhow::Result<Option<Account>> {
        self.find_by_column(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE billing_customer_ref = $1"),
            r,
        )
        .await
    }

    async fn find_by_billing_subscription_ref(&self, r: &str) -> anyhow::Result<Option<Account>> {
        self.find_by_column(
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE billing_subscription_ref = $1"
            ),
            r,
        )
        .await
    }

    async fn save_entitlement(
        &self,
        id: AccountId,
        state: &EntitlementState,
    ) -> anyhow::Result<bool> {
        tracing::debug!(
            "Repository: Saving entitlement - account_id={}, version={}",
            id,
            state.version
        );

        let client = self.pool.get().await?;

        // Single conditional update; the version guard makes the
        // read-modify-write atomic across processes.
        let updated = client
            .execute(
                "UPDATE accounts SET
                    membership = $2,
                    plan_key = $3,
                    plan_status = $4,
                    billing_customer_ref = $5,
                    billing_subscription_ref = $6,
                    current_period_start = $7,
                    current_period_end = $8,
                    cancel_at = $9,
                    stories_generated_total = $10,
                    period_usage = $11,
                    add_on_balance = $12,
                    add_on_spent_this_period = $13,
                    last_reset_at = $14,
                    version = version + 1,
                    updated_at = NOW()
                 WHERE id = $1 AND version = $15",
                &[
                    &id,
                    &state.membership.as_str(),
                    &state.plan_key,
                    &state.plan_status.as_str(),
                    &state.billing_customer_ref,
                    &state.billing_subscription_ref,
                    &state.current_period_start,
                    &state.current_period_end,
                    &state.cancel_at,
                    &state.stories_generated_total,
                    &state.period_usage,
                    &state.add_on_balance,
                    &state.add_on_spent_this_period,
                    &state.last_reset_at,
                    &state.version,
                ],
            )
            .await?;

        Ok(updated == 1)
    }
}
