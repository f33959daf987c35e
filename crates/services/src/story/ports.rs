use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::LedgerError;
use crate::{AccountId, StoryId};

/// What the reader asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct StoryPrompt {
    pub theme: String,
    pub characters: Vec<String>,
    /// Target age group, e.g. "3-5".
    pub age_group: Option<String>,
    /// Whether to also produce an illustration.
    pub illustrate: bool,
}

/// Output of the external text-generation collaborator.
#[derive(Debug, Clone)]
pub struct GeneratedStory {
    pub title: String,
    pub body: String,
    pub illustration_prompt: Option<String>,
}

/// A persisted story.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct Story {
    pub id: StoryId,
    pub account_id: AccountId,
    pub title: String,
    pub body: String,
    pub theme: String,
    pub illustration_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStory {
    pub account_id: AccountId,
    pub title: String,
    pub body: String,
    pub theme: String,
    pub illustration_url: Option<String>,
}

/// External generation collaborator. Only ever called after the ledger has
/// granted a unit.
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    async fn generate_story(&self, prompt: &StoryPrompt) -> anyhow::Result<GeneratedStory>;

    /// Returns the URL of a generated illustration.
    async fn generate_illustration(&self, description: &str) -> anyhow::Result<String>;
}

/// Repository trait for persisted stories.
#[async_trait]
pub trait StoryRepository: Send + Sync {
    async fn insert_story(&self, story: NewStory) -> anyhow::Result<Story>;

    async fn list_stories(&self, account_id: AccountId) -> anyhow::Result<Vec<Story>>;

    async fn get_story(
        &self,
        account_id: AccountId,
        story_id: StoryId,
    ) -> anyhow::Result<Option<Story>>;
}

/// Error types for story operations
#[derive(Debug)]
pub enum StoryError {
    /// No generation units left for this period.
    QuotaExhausted,
    AccountNotFound,
    StoryNotFound,
    /// The external generator failed. The consumed unit is not refunded.
    GenerationFailed(String),
    /// Concurrent update conflict; the caller may retry.
    StorageConflict,
    /// Database error
    Database(String),
}

impl fmt::Display for StoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExhausted => write!(f, "No story generations left for this period"),
            Self::AccountNotFound => write!(f, "Account not found"),
            Self::StoryNotFound => write!(f, "Story not found"),
            Self::GenerationFailed(msg) => write!(f, "Story generation failed: {}", msg),
            Self::StorageConflict => write!(f, "Concurrent update conflict"),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for StoryError {}

impl From<anyhow::Error> for StoryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<LedgerError> for StoryError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound => Self::AccountNotFound,
            LedgerError::StorageConflict => Self::StorageConflict,
            other => Self::Database(other.to_string()),
        }
    }
}

/// Service trait for gated story generation and retrieval.
#[async_trait]
pub trait StoryService: Send + Sync {
    /// Consume one generation unit and produce a story. Denied with
    /// `QuotaExhausted` when the ledger refuses.
    async fn generate_story(
        &self,
        account_id: AccountId,
        prompt: StoryPrompt,
    ) -> Result<Story, StoryError>;

    async fn list_stories(&self, account_id: AccountId) -> Result<Vec<Story>, StoryError>;

    async fn get_story(
        &self,
        account_id: AccountId,
        story_id: StoryId,
    ) -> Result<Story, StoryError>;
}
