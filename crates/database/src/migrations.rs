use crate::pool::DbPool;
use anyhow::Result;

/// Ordered schema migrations; applied versions are recorded in
/// schema_migrations and never re-run.
const MIGRATIONS: &[(i32, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            membership TEXT NOT NULL DEFAULT 'free',
            plan_key TEXT,
            plan_status TEXT NOT NULL DEFAULT 'none',
            billing_customer_ref TEXT,
            billing_subscription_ref TEXT,
            current_period_start TIMESTAMPTZ,
            current_period_end TIMESTAMPTZ,
            cancel_at TIMESTAMPTZ,
            stories_generated_total BIGINT NOT NULL DEFAULT 0,
            period_usage BIGINT NOT NULL DEFAULT 0,
            add_on_balance BIGINT NOT NULL DEFAULT 0 CHECK (add_on_balance >= 0),
            add_on_spent_this_period BIGINT NOT NULL DEFAULT 0,
            last_reset_at TIMESTAMPTZ NOT NULL,
            version BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE INDEX IF NOT EXISTS idx_accounts_billing_customer_ref
            ON accounts (billing_customer_ref);
        CREATE INDEX IF NOT EXISTS idx_accounts_billing_subscription_ref
            ON accounts (billing_subscription_ref);
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id UUID PRIMARY KEY,
            account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            token_hash TEXT NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            expires_at TIMESTAMPTZ NOT NULL
        );
        "#,
    ),
    (
        3,
        r#"
        CREATE TABLE IF NOT EXISTS stories (
            id UUID PRIMARY KEY,
            account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            theme TEXT NOT NULL,
            illustration_url TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE INDEX IF NOT EXISTS idx_stories_account_id ON stories (account_id);
        "#,
    ),
    (
        4,
        r#"
        CREATE TABLE IF NOT EXISTS processed_webhook_events (
            event_id TEXT PRIMARY KEY,
            processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE INDEX IF NOT EXISTS idx_processed_webhook_events_processed_at
            ON processed_webhook_events (processed_at);
        "#,
    ),
];

/// Apply pending migrations.
pub async fn run(pool: &DbPool) -> Result<()> {
    let client = pool.get().await?;

    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .await?;

    for (version, sql) in MIGRATIONS {
        let applied = client
            .query_opt(
                "SELECT version FROM schema_migrations WHERE version = $1",
                &[version],
            )
            .await?
            .is_some();
        if applied {
            continue;
        }

        tracing::info!("Applying migration {}", version);
        client.batch_execute(sql).await?;
        client
            .execute(
                "INSERT INTO schema_migrations (version) VALUES ($1)",
                &[version],
            )
            .await?;
    }

    Ok(())
}
