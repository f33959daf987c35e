use async_trait::async_trait;
use chrono::Duration;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::{AccountId, SessionId};

use super::ports::{
    Account, AccountError, AccountRepository, AccountService, EntitlementState, NewAccount,
    NewSession, PasswordHasher, Session, SessionRepository,
};

const SESSION_TTL_DAYS: i64 = 30;

/// Hash a session token for storage and lookup.
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_session_token() -> String {
    format!("sess_{}", Uuid::new_v4().simple())
}

/// Normalize and validate a username: trimmed, lowercased, 3..=32 chars of
/// [a-z0-9_].
fn normalize_username(raw: &str) -> Result<String, AccountError> {
    let username = raw.trim().to_lowercase();
    if username.len() < 3 || username.len() > 32 {
        return Err(AccountError::InvalidUsername(
            "must be between 3 and 32 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(AccountError::InvalidUsername(
            "only letters, digits and underscores are allowed".to_string(),
        ));
    }
    Ok(username)
}

pub struct AccountServiceImpl {
    account_repo: Arc<dyn AccountRepository>,
    session_repo: Arc<dyn SessionRepository>,
    password_hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
}

impl AccountServiceImpl {
    pub fn new(
        account_repo: Arc<dyn AccountRepository>,
        session_repo: Arc<dyn SessionRepository>,
        password_hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            account_repo,
            session_repo,
            password_hasher,
            clock,
        }
    }
}

#[async_trait]
impl AccountService for AccountServiceImpl {
    async fn register(
        &self,
        email: String,
        username: String,
        password: String,
    ) -> Result<Account, AccountError> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AccountError::InvalidCredentials);
        }
        let username = normalize_username(&username)?;

        tracing::info!("Registering account: email={}, username={}", email, username);

        if self.account_repo.find_by_email(&email).await?.is_some() {
            return Err(AccountError::EmailTaken);
        }
        if self
            .account_repo
            .find_by_username(&username)
            .await?
            .is_some()
        {
            return Err(AccountError::UsernameTaken);
        }

        let password_hash = self
            .password_hasher
            .hash(&password)
            .map_err(|e| AccountError::Database(e.to_string()))?;

        let now = self.clock.now_utc();
        let inserted = self
            .account_repo
            .insert_account(NewAccount {
                email: email.clone(),
                username,
                password_hash,
                entitlement: EntitlementState::new_free(now),
            })
            .await?;

        // A concurrent registration can still win the unique constraint race
        // between the pre-checks and the insert.
        let account = match inserted {
            Some(account) => account,
            None => {
                if self.account_repo.find_by_email(&email).await?.is_some() {
                    return Err(AccountError::EmailTaken);
                }
                return Err(AccountError::UsernameTaken);
            }
        };

        tracing::info!("Account registered: account_id={}", account.id);
        Ok(account)
    }

    async fn login(
        &self,
        identifier: String,
        password: String,
    ) -> Result<(Session, String), AccountError> {
        let identifier = identifier.trim().to_lowercase();
        let account = if identifier.contains('@') {
            self.account_repo.find_by_email(&identifier).await?
        } else {
            self.account_repo.find_by_username(&identifier).await?
        }
        .ok_or(AccountError::InvalidCredentials)?;

        let verified = self
            .password_hasher
            .verify(&password, &account.password_hash)
            .map_err(|e| AccountError::Database(e.to_string()))?;
        if !verified {
            tracing::warn!("Failed login attempt: account_id={}", account.id);
            return Err(AccountError::InvalidCredentials);
        }

        let token = generate_session_token();
        let now = self.clock.now_utc();
        let session = self
            .session_repo
            .create_session(NewSession {
                account_id: account.id,
                token_hash: hash_session_token(&token),
                expires_at: now + Duration::days(SESSION_TTL_DAYS),
            })
            .await?;

        tracing::info!(
            "Login successful: account_id={}, session_id={}",
            account.id,
            session.session_id
        );
        Ok((session, token))
    }

    async fn logout(&self, session_id: SessionId) -> Result<(), AccountError> {
        self.session_repo.delete_session(session_id).await?;
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, AccountError> {
        self.account_repo
            .get_account(id)
            .await?
            .ok_or(AccountError::AccountNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryAccountRepository, InMemorySessionRepository, ManualClock, PlainHasher};

    fn service(
        accounts: Arc<InMemoryAccountRepository>,
        sessions: Arc<InMemorySessionRepository>,
    ) -> AccountServiceImpl {
        AccountServiceImpl::new(
            accounts,
            sessions,
            Arc::new(PlainHasher),
            Arc::new(ManualClock::default()),
        )
    }

    #[tokio::test]
    async fn test_register_normalizes_username() {
        let accounts = Arc::new(InMemoryAccountRepository::default());
        let svc = service(accounts.clone(), Arc::new(InMemorySessionRepository::default()));

        let account = svc
            .register(
                "Kid@Example.com".to_string(),
                "  StoryFan_1 ".to_string(),
                "pw".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(account.username, "storyfan_1");
        assert_eq!(account.email, "kid@example.com");
    }

    #[tokio::test]
    async fn test_register_rejects_bad_usernames() {
        let svc = service(
            Arc::new(InMemoryAccountRepository::default()),
            Arc::new(InMemorySessionRepository::default()),
        );
        let err = svc
            .register("a@b.com".to_string(), "x".to_string(), "pw".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidUsername(_)));

        let err = svc
            .register("a@b.com".to_string(), "bad name!".to_string(), "pw".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidUsername(_)));
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let accounts = Arc::new(InMemoryAccountRepository::default());
        let svc = service(accounts, Arc::new(InMemorySessionRepository::default()));

        svc.register("a@b.com".into(), "first".into(), "pw".into())
            .await
            .unwrap();
        let err = svc
            .register("a@b.com".into(), "second".into(), "pw".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::EmailTaken));
    }

    #[tokio::test]
    async fn test_login_with_username_and_wrong_password() {
        let accounts = Arc::new(InMemoryAccountRepository::default());
        let sessions = Arc::new(InMemorySessionRepository::default());
        let svc = service(accounts, sessions.clone());

        svc.register("a@b.com".into(), "reader".into(), "pw".into())
            .await
            .unwrap();

        let err = svc
            .login("reader".into(), "wrong".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidCredentials));

        let (session, token) = svc.login("reader".into(), "pw".into()).await.unwrap();
        assert!(token.starts_with("sess_"));
        assert_eq!(token.len(), 37);

        // Stored hash matches the raw token.
        let found = sessions
            .get_session_by_token_hash(&hash_session_token(&token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, session.session_id);
    }
}
