use async_trait::async_trait;
use std::sync::Arc;

use crate::ledger::{ConsumeOutcome, CreditLedger};
use crate::{AccountId, StoryId};

use super::ports::{
    NewStory, Story, StoryError, StoryGenerator, StoryPrompt, StoryRepository, StoryService,
};

/// The story generation gate: asks the ledger for a unit, then delegates to
/// the external generator and records the result.
pub struct StoryServiceImpl {
    ledger: Arc<dyn CreditLedger>,
    generator: Arc<dyn StoryGenerator>,
    story_repo: Arc<dyn StoryRepository>,
}

impl StoryServiceImpl {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        generator: Arc<dyn StoryGenerator>,
        story_repo: Arc<dyn StoryRepository>,
    ) -> Self {
        Self {
            ledger,
            generator,
            story_repo,
        }
    }
}

#[async_trait]
impl StoryService for StoryServiceImpl {
    async fn generate_story(
        &self,
        account_id: AccountId,
        prompt: StoryPrompt,
    ) -> Result<Story, StoryError> {
        match self.ledger.try_consume(account_id).await? {
            ConsumeOutcome::Denied { .. } => {
                tracing::info!("Generation denied by ledger: account_id={}", account_id);
                return Err(StoryError::QuotaExhausted);
            }
            ConsumeOutcome::Allowed { remaining } => {
                tracing::info!(
                    "Generation granted: account_id={}, remaining={}",
                    account_id,
                    remaining
                );
            }
        }

        // Generation runs outside any account lock. A failure past this
        // point does not refund the consumed unit (policy choice: no
        // compensating refund transaction).
        let generated = self
            .generator
            .generate_story(&prompt)
            .await
            .map_err(|e| StoryError::GenerationFailed(e.to_string()))?;

        let illustration_url = if prompt.illustrate {
            match &generated.illustration_prompt {
                Some(description) => {
                    match self.generator.generate_illustration(description).await {
                        Ok(url) => Some(url),
                        Err(e) => {
                            // The story text is still worth keeping.
                            tracing::warn!(
                                "Illustration failed, storing story without one: account_id={}, error={}",
                                account_id,
                                e
                            );
                            None
                        }
                    }
                }
                None => None,
            }
        } else {
            None
        };

        let story = self
            .story_repo
            .insert_story(NewStory {
                account_id,
                title: generated.title,
                body: generated.body,
                theme: prompt.theme,
                illustration_url,
            })
            .await?;

        tracing::info!(
            "Story stored: account_id={}, story_id={}",
            account_id,
            story.id
        );
        Ok(story)
    }

    async fn list_stories(&self, account_id: AccountId) -> Result<Vec<Story>, StoryError> {
        Ok(self.story_repo.list_stories(account_id).await?)
    }

    async fn get_story(
        &self,
        account_id: AccountId,
        story_id: StoryId,
    ) -> Result<Story, StoryError> {
        self.story_repo
            .get_story(account_id, story_id)
            .await?
            .ok_or(StoryError::StoryNotFound)
    }
}
