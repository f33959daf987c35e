use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health_check,
        routes::accounts::register,
        routes::accounts::login,
        routes::accounts::logout,
        routes::accounts::get_profile,
        routes::credits::get_credits,
        routes::stories::generate_story,
        routes::stories::list_stories,
        routes::stories::get_story,
        routes::billing::handle_webhook,
        routes::billing::prune_processed_events,
    ),
    components(schemas(
        crate::error::ApiErrorResponse,
        routes::HealthResponse,
        routes::accounts::RegisterRequest,
        routes::accounts::AccountResponse,
        routes::accounts::LoginRequest,
        routes::accounts::LoginResponse,
        routes::accounts::ProfileResponse,
        routes::stories::GenerateStoryRequest,
        routes::stories::StoryListResponse,
        routes::billing::WebhookAck,
        routes::billing::PruneRequest,
        routes::billing::PruneResponse,
        services::ledger::EntitlementSummary,
        services::plan::Membership,
        services::account::PlanStatus,
        services::story::Story,
        services::story::StoryPrompt,
        services::AccountId,
        services::StoryId,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Accounts", description = "Registration, login and profile"),
        (name = "Credits", description = "Entitlement and credit balance"),
        (name = "Stories", description = "Gated story generation"),
        (name = "Billing", description = "Billing provider webhooks and maintenance"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .build(),
                ),
            );
        }
    }
}
