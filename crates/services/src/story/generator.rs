use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::ports::{GeneratedStory, StoryGenerator, StoryPrompt};

/// Client for an OpenAI-compatible generation API. The core never calls this
/// before the ledger has granted a unit.
pub struct OpenAiStoryGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: String,
}

/// Model output contract for story generation.
#[derive(Debug, Deserialize)]
struct StoryPayload {
    title: String,
    story: String,
    illustration_prompt: Option<String>,
}

impl OpenAiStoryGenerator {
    pub fn new(config: &config::GeneratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        }
    }

    fn build_user_prompt(prompt: &StoryPrompt) -> String {
        let mut parts = vec![format!(
            "Write a children's story about the theme \"{}\".",
            prompt.theme
        )];
        if !prompt.characters.is_empty() {
            parts.push(format!("Featuring: {}.", prompt.characters.join(", ")));
        }
        if let Some(age_group) = &prompt.age_group {
            parts.push(format!("Written for children aged {}.", age_group));
        }
        parts.join(" ")
    }
}

const SYSTEM_PROMPT: &str = "You are a children's story author. Respond with a JSON object \
containing \"title\", \"story\" and \"illustration_prompt\" (a one-sentence scene description \
for a cover illustration). The story should be warm, simple and age-appropriate.";

#[async_trait]
impl StoryGenerator for OpenAiStoryGenerator {
    async fn generate_story(&self, prompt: &StoryPrompt) -> anyhow::Result<GeneratedStory> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.text_model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::build_user_prompt(prompt) },
            ],
            "response_format": { "type": "json_object" },
        });

        tracing::debug!("Requesting story generation: model={}", self.text_model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow::anyhow!("Generation response contained no choices"))?;

        let payload: StoryPayload = serde_json::from_str(content)
            .map_err(|e| anyhow::anyhow!("Generation response was not valid JSON: {}", e))?;

        Ok(GeneratedStory {
            title: payload.title,
            body: payload.story,
            illustration_prompt: payload.illustration_prompt,
        })
    }

    async fn generate_illustration(&self, description: &str) -> anyhow::Result<String> {
        let url = format!("{}/images/generations", self.base_url);
        let body = json!({
            "model": self.image_model,
            "prompt": format!("Children's book illustration, soft colors: {}", description),
            "n": 1,
            "size": "1024x1024",
        });

        tracing::debug!("Requesting illustration: model={}", self.image_model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let images: ImageResponse = response.json().await?;
        images
            .data
            .into_iter()
            .next()
            .map(|d| d.url)
            .ok_or_else(|| anyhow::anyhow!("Image response contained no data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_user_prompt_includes_all_parts() {
        let prompt = StoryPrompt {
            theme: "sharing".to_string(),
            characters: vec!["Milo the fox".to_string(), "Pip the owl".to_string()],
            age_group: Some("4-6".to_string()),
            illustrate: true,
        };
        let text = OpenAiStoryGenerator::build_user_prompt(&prompt);
        assert!(text.contains("sharing"));
        assert!(text.contains("Milo the fox, Pip the owl"));
        assert!(text.contains("aged 4-6"));
    }

    #[test]
    fn test_build_user_prompt_minimal() {
        let prompt = StoryPrompt {
            theme: "bedtime".to_string(),
            characters: vec![],
            age_group: None,
            illustrate: false,
        };
        let text = OpenAiStoryGenerator::build_user_prompt(&prompt);
        assert!(text.contains("bedtime"));
        assert!(!text.contains("Featuring"));
    }
}
