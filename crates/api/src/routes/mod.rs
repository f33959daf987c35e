pub mod accounts;
pub mod billing;
pub mod credits;
pub mod stories;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;

use crate::middleware::{auth_middleware, AuthState};
use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// API version
    pub version: &'static str,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_state = AuthState {
        session_repository: state.session_repository.clone(),
    };

    let public = Router::new()
        .route("/health", get(health_check))
        .route("/v1/accounts", post(accounts::register))
        .route("/v1/sessions", post(accounts::login))
        .route("/v1/billing/webhook", post(billing::handle_webhook))
        .route(
            "/v1/internal/billing/prune",
            post(billing::prune_processed_events),
        );

    let protected = Router::new()
        .route("/v1/account", get(accounts::get_profile))
        .route("/v1/sessions/current", delete(accounts::logout))
        .route("/v1/credits", get(credits::get_credits))
        .route(
            "/v1/stories",
            post(stories::generate_story).get(stories::list_stories),
        )
        .route("/v1/stories/:id", get(stories::get_story))
        .layer(from_fn_with_state(auth_state, auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
