use crate::pool::DbPool;
use async_trait::async_trait;
use services::account::{NewSession, Session, SessionRepository};
use services::SessionId;

pub struct PostgresSessionRepository {
    pool: DbPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn create_session(&self, session: NewSession) -> anyhow::Result<Session> {
        let client = self.pool.get().await?;
        let session_id = SessionId::new();

        let row = client
            .query_one(
                "INSERT INTO sessions (session_id, account_id, token_hash, expires_at)
                 VALUES ($1, $2, $3, $4)
                 RETURNING session_id, account_id, token_hash, created_at, expires_at",
                &[
                    &session_id,
                    &session.account_id,
                    &session.token_hash,
                    &session.expires_at,
                ],
            )
            .await?;

        Ok(Session {
            session_id: row.get("session_id"),
            account_id: row.get("account_id"),
            token_hash: row.get("token_hash"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
    }

    async fn get_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> anyhow::Result<Option<Session>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT session_id, account_id, token_hash, created_at, expires_at
                 FROM sessions
                 WHERE token_hash = $1",
                &[&token_hash],
            )
            .await?;

        Ok(row.map(|row| Session {
            session_id: row.get("session_id"),
            account_id: row.get("account_id"),
            token_hash: row.get("token_hash"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn delete_session(&self, session_id: SessionId) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM sessions WHERE session_id = $1", &[&session_id])
            .await?;
        Ok(())
    }
}
