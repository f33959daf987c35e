use crate::{error::ApiError, middleware::AuthenticatedAccount, state::AppState};
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use services::story::{Story, StoryError, StoryPrompt};
use services::StoryId;
use utoipa::ToSchema;

const MAX_THEME_LEN: usize = 200;
const MAX_CHARACTERS: usize = 5;

/// Request to generate a story
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerateStoryRequest {
    /// Story theme, e.g. "sharing with friends"
    pub theme: String,
    /// Up to five character descriptions
    #[serde(default)]
    pub characters: Vec<String>,
    /// Target age group, e.g. "3-5"
    pub age_group: Option<String>,
    /// Whether to also produce a cover illustration
    #[serde(default)]
    pub illustrate: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StoryListResponse {
    pub stories: Vec<Story>,
}

fn map_story_error(err: StoryError) -> ApiError {
    match err {
        StoryError::QuotaExhausted => ApiError::payment_required(
            "No story generations left for this period",
        )
        .with_details("Upgrade your membership or purchase add-on credits to continue."),
        StoryError::AccountNotFound => ApiError::not_found("Account not found"),
        StoryError::StoryNotFound => ApiError::not_found("Story not found"),
        StoryError::GenerationFailed(msg) => {
            tracing::error!(error = ?msg, "Story generation failed");
            ApiError::bad_gateway("Story generation failed, please try again")
        }
        StoryError::StorageConflict => {
            ApiError::conflict("The account was updated concurrently, please retry")
        }
        StoryError::Database(msg) => {
            tracing::error!(error = ?msg, "Database error in story operation");
            ApiError::internal_server_error("An internal error occurred")
        }
    }
}

fn validate_prompt(req: &GenerateStoryRequest) -> Result<(), ApiError> {
    let theme = req.theme.trim();
    if theme.is_empty() {
        return Err(ApiError::unprocessable_entity("Theme must not be empty"));
    }
    if theme.len() > MAX_THEME_LEN {
        return Err(ApiError::unprocessable_entity(format!(
            "Theme must be at most {} characters",
            MAX_THEME_LEN
        )));
    }
    if req.characters.len() > MAX_CHARACTERS {
        return Err(ApiError::unprocessable_entity(format!(
            "At most {} characters are allowed",
            MAX_CHARACTERS
        )));
    }
    Ok(())
}

/// POST /v1/stories - Generate a new story (consumes one generation unit)
#[utoipa::path(
    post,
    path = "/v1/stories",
    tag = "Stories",
    request_body = GenerateStoryRequest,
    responses(
        (status = 201, description = "Story generated", body = Story),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Quota exhausted"),
        (status = 502, description = "Generation failed")
    ),
    security(("session_token" = []))
)]
pub async fn generate_story(
    State(app_state): State<AppState>,
    Extension(account): Extension<AuthenticatedAccount>,
    Json(req): Json<GenerateStoryRequest>,
) -> Result<(http::StatusCode, Json<Story>), ApiError> {
    validate_prompt(&req)?;

    let story = app_state
        .story_service
        .generate_story(
            account.account_id,
            StoryPrompt {
                theme: req.theme.trim().to_string(),
                characters: req.characters,
                age_group: req.age_group,
                illustrate: req.illustrate,
            },
        )
        .await
        .map_err(map_story_error)?;

    Ok((http::StatusCode::CREATED, Json(story)))
}

/// GET /v1/stories - List the account's stories
#[utoipa::path(
    get,
    path = "/v1/stories",
    tag = "Stories",
    responses(
        (status = 200, description = "Stories", body = StoryListResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("session_token" = []))
)]
pub async fn list_stories(
    State(app_state): State<AppState>,
    Extension(account): Extension<AuthenticatedAccount>,
) -> Result<Json<StoryListResponse>, ApiError> {
    let stories = app_state
        .story_service
        .list_stories(account.account_id)
        .await
        .map_err(map_story_error)?;
    Ok(Json(StoryListResponse { stories }))
}

/// GET /v1/stories/{id} - Fetch one story
#[utoipa::path(
    get,
    path = "/v1/stories/{id}",
    tag = "Stories",
    params(("id" = String, Path, description = "Story id")),
    responses(
        (status = 200, description = "Story", body = Story),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found")
    ),
    security(("session_token" = []))
)]
pub async fn get_story(
    State(app_state): State<AppState>,
    Extension(account): Extension<AuthenticatedAccount>,
    Path(id): Path<String>,
) -> Result<Json<Story>, ApiError> {
    let story_id: StoryId = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid story id"))?;

    let story = app_state
        .story_service
        .get_story(account.account_id, story_id)
        .await
        .map_err(map_story_error)?;
    Ok(Json(story))
}
