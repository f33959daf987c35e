//! In-memory fixtures for service unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::account::{
    Account, AccountRepository, EntitlementState, NewAccount, NewSession, PasswordHasher, Session,
    SessionRepository,
};
use crate::billing::{ProcessedEventRepository, TryBegin};
use crate::clock::Clock;
use crate::plan::Membership;
use crate::story::{GeneratedStory, NewStory, Story, StoryGenerator, StoryPrompt, StoryRepository};
use crate::{AccountId, SessionId, StoryId};

/// Clock fixed to a settable instant.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: Mutex<HashMap<AccountId, Account>>,
}

/// Insert an account directly with the given membership. Returns its id.
pub async fn seed_account(
    repo: &InMemoryAccountRepository,
    membership: Membership,
    now: DateTime<Utc>,
) -> AccountId {
    let id = AccountId::new();
    let mut entitlement = EntitlementState::new_free(now);
    entitlement.membership = membership;
    let account = Account {
        id,
        email: format!("{}@example.com", id),
        username: format!("user_{}", id.as_uuid().simple()),
        password_hash: "x".to_string(),
        created_at: now,
        updated_at: now,
        entitlement,
    };
    repo.accounts.lock().unwrap().insert(id, account);
    id
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn insert_account(&self, account: NewAccount) -> anyhow::Result<Option<Account>> {
        let mut guard = self.accounts.lock().unwrap();
        if guard
            .values()
            .any(|a| a.email == account.email || a.username == account.username)
        {
            return Ok(None);
        }
        let now = account.entitlement.last_reset_at;
        let stored = Account {
            id: AccountId::new(),
            email: account.email,
            username: account.username,
            password_hash: account.password_hash,
            created_at: now,
            updated_at: now,
            entitlement: account.entitlement,
        };
        guard.insert(stored.id, stored.clone());
        Ok(Some(stored))
    }

    async fn get_account(&self, id: AccountId) -> anyhow::Result<Option<Account>> {
        Ok(self.accounts.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Account>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<Account>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn find_by_billing_customer_ref(&self, r: &str) -> anyhow::Result<Option<Account>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.entitlement.billing_customer_ref.as_deref() == Some(r))
            .cloned())
    }

    async fn find_by_billing_subscription_ref(&self, r: &str) -> anyhow::Result<Option<Account>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.entitlement.billing_subscription_ref.as_deref() == Some(r))
            .cloned())
    }

    async fn save_entitlement(
        &self,
        id: AccountId,
        state: &EntitlementState,
    ) -> anyhow::Result<bool> {
        let mut guard = self.accounts.lock().unwrap();
        let Some(account) = guard.get_mut(&id) else {
            return Ok(false);
        };
        if account.entitlement.version != state.version {
            return Ok(false);
        }
        account.entitlement = EntitlementState {
            version: state.version + 1,
            ..state.clone()
        };
        Ok(true)
    }
}

/// Wrapper that reports a version conflict on the first save, then delegates.
pub struct ConflictOnceRepository {
    inner: Arc<InMemoryAccountRepository>,
    tripped: AtomicBool,
}

impl ConflictOnceRepository {
    pub fn new(inner: Arc<InMemoryAccountRepository>) -> Self {
        Self {
            inner,
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AccountRepository for ConflictOnceRepository {
    async fn insert_account(&self, account: NewAccount) -> anyhow::Result<Option<Account>> {
        self.inner.insert_account(account).await
    }

    async fn get_account(&self, id: AccountId) -> anyhow::Result<Option<Account>> {
        self.inner.get_account(id).await
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Account>> {
        self.inner.find_by_email(email).await
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<Account>> {
        self.inner.find_by_username(username).await
    }

    async fn find_by_billing_customer_ref(&self, r: &str) -> anyhow::Result<Option<Account>> {
        self.inner.find_by_billing_customer_ref(r).await
    }

    async fn find_by_billing_subscription_ref(&self, r: &str) -> anyhow::Result<Option<Account>> {
        self.inner.find_by_billing_subscription_ref(r).await
    }

    async fn save_entitlement(
        &self,
        id: AccountId,
        state: &EntitlementState,
    ) -> anyhow::Result<bool> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.save_entitlement(id, state).await
    }
}

#[derive(Default)]
pub struct InMemoryProcessedEventRepository {
    events: Mutex<HashMap<String, DateTime<Utc>>>,
}

#[async_trait]
impl ProcessedEventRepository for InMemoryProcessedEventRepository {
    async fn try_begin(&self, event_id: &str, now: DateTime<Utc>) -> anyhow::Result<TryBegin> {
        let mut guard = self.events.lock().unwrap();
        if guard.contains_key(event_id) {
            return Ok(TryBegin::AlreadyProcessed);
        }
        guard.insert(event_id.to_string(), now);
        Ok(TryBegin::FirstSeen)
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut guard = self.events.lock().unwrap();
        let before = guard.len();
        guard.retain(|_, processed_at| *processed_at >= cutoff);
        Ok((before - guard.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create_session(&self, session: NewSession) -> anyhow::Result<Session> {
        let stored = Session {
            session_id: SessionId::new(),
            account_id: session.account_id,
            token_hash: session.token_hash,
            created_at: session.expires_at - Duration::days(30),
            expires_at: session.expires_at,
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(stored.session_id, stored.clone());
        Ok(stored)
    }

    async fn get_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> anyhow::Result<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn delete_session(&self, session_id: SessionId) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().remove(&session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStoryRepository {
    stories: Mutex<Vec<Story>>,
}

impl InMemoryStoryRepository {
    pub async fn count(&self) -> usize {
        self.stories.lock().unwrap().len()
    }
}

#[async_trait]
impl StoryRepository for InMemoryStoryRepository {
    async fn insert_story(&self, story: NewStory) -> anyhow::Result<Story> {
        let stored = Story {
            id: StoryId::new(),
            account_id: story.account_id,
            title: story.title,
            body: story.body,
            theme: story.theme,
            illustration_url: story.illustration_url,
            created_at: Utc::now(),
        };
        self.stories.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn list_stories(&self, account_id: AccountId) -> anyhow::Result<Vec<Story>> {
        Ok(self
            .stories
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_story(
        &self,
        account_id: AccountId,
        story_id: StoryId,
    ) -> anyhow::Result<Option<Story>> {
        Ok(self
            .stories
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.account_id == account_id && s.id == story_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct StubStoryGenerator {
    fail_next_story: AtomicBool,
    fail_illustrations: AtomicBool,
}

impl StubStoryGenerator {
    pub fn fail_next(&self) {
        self.fail_next_story.store(true, Ordering::SeqCst);
    }

    pub fn fail_illustrations(&self) {
        self.fail_illustrations.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoryGenerator for StubStoryGenerator {
    async fn generate_story(&self, prompt: &StoryPrompt) -> anyhow::Result<GeneratedStory> {
        if self.fail_next_story.swap(false, Ordering::SeqCst) {
            anyhow::bail!("generator unavailable");
        }
        Ok(GeneratedStory {
            title: format!("A Story About {}", prompt.theme),
            body: "Once upon a time...".to_string(),
            illustration_prompt: Some(format!("a scene about {}", prompt.theme)),
        })
    }

    async fn generate_illustration(&self, description: &str) -> anyhow::Result<String> {
        if self.fail_illustrations.load(Ordering::SeqCst) {
            anyhow::bail!("image service unavailable");
        }
        Ok(format!(
            "https://images.example.com/{}.png",
            description.len()
        ))
    }
}

/// Hasher that stores passwords with a transparent prefix. Tests only.
pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> anyhow::Result<String> {
        Ok(format!("plain:{}", password))
    }

    fn verify(&self, password: &str, password_hash: &str) -> anyhow::Result<bool> {
        Ok(password_hash == format!("plain:{}", password))
    }
}
