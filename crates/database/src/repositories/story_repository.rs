use crate::pool::DbPool;
use async_trait::async_trait;
use services::story::{NewStory, Story, StoryRepository};
use services::{AccountId, StoryId};
use tokio_postgres::Row;

fn story_from_row(row: &Row) -> Story {
    Story {
        id: row.get("id"),
        account_id: row.get("account_id"),
        title: row.get("title"),
        body: row.get("body"),
        theme: row.get("theme"),
        illustration_url: row.get("illustration_url"),
        created_at: row.get("created_at"),
    }
}

pub struct PostgresStoryRepository {
    pool: DbPool,
}

impl PostgresStoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoryRepository for PostgresStoryRepository {
    async fn insert_story(&self, story: NewStory) -> anyhow::Result<Story> {
        tracing::info!(
            "Repository: Inserting story - account_id={}, title={}",
            story.account_id,
            story.title
        );

        let client = self.pool.get().await?;
        let id = StoryId::new();

        let row = client
            .query_one(
                "INSERT INTO stories (id, account_id, title, body, theme, illustration_url)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id, account_id, title, body, theme, illustration_url, created_at",
                &[
                    &id,
                    &story.account_id,
                    &story.title,
                    &story.body,
                    &story.theme,
                    &story.illustration_url,
                ],
            )
            .await?;

        Ok(story_from_row(&row))
    }

    async fn list_stories(&self, account_id: AccountId) -> anyhow::Result<Vec<Story>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, account_id, title, body, theme, illustration_url, created_at
                 FROM stories
                 WHERE account_id = $1
                 ORDER BY created_at DESC",
                &[&account_id],
            )
            .await?;
        Ok(rows.iter().map(story_from_row).collect())
    }

    async fn get_story(
        &self,
        account_id: AccountId,
        story_id: StoryId,
    ) -> anyhow::Result<Option<Story>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, account_id, title, body, theme, illustration_url, created_at
                 FROM stories
                 WHERE account_id = $1 AND id = $2",
                &[&account_id, &story_id],
            )
            .await?;
        Ok(row.map(|row| story_from_row(&row)))
    }
}
