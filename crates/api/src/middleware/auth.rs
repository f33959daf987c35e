use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use services::account::hash_session_token;
use services::{AccountId, SessionId};
use std::sync::Arc;

use crate::error::ApiError;

/// Authenticated account information inserted into request extensions by the
/// auth middleware. Extract in route handlers using
/// `Extension<AuthenticatedAccount>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount {
    pub account_id: AccountId,
    pub session_id: SessionId,
}

/// State for authentication middleware
#[derive(Clone)]
pub struct AuthState {
    pub session_repository: Arc<dyn services::account::SessionRepository>,
}

/// Extract and validate token from Authorization header
fn extract_token_from_request(request: &Request) -> Result<String, ApiError> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    let auth_value = auth_header.ok_or_else(|| {
        tracing::warn!("No authorization header found");
        ApiError::missing_auth_header()
    })?;

    let token = auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Authorization header does not start with 'Bearer '");
        ApiError::invalid_auth_header()
    })?;

    if !token.starts_with("sess_") || token.len() != 37 {
        tracing::warn!("Invalid session token format");
        return Err(ApiError::invalid_token());
    }

    Ok(token.to_string())
}

async fn authenticate_token(
    token: &str,
    state: &AuthState,
) -> Result<AuthenticatedAccount, ApiError> {
    let token_hash = hash_session_token(token);

    let session = state
        .session_repository
        .get_session_by_token_hash(&token_hash)
        .await
        .map_err(|e| {
            tracing::error!("Failed to look up session: {}", e);
            ApiError::internal_server_error("Failed to authenticate session")
        })?
        .ok_or_else(ApiError::session_not_found)?;

    if session.expires_at < Utc::now() {
        tracing::warn!(
            "Session expired: session_id={}, expires_at={}",
            session.session_id,
            session.expires_at
        );
        return Err(ApiError::session_expired());
    }

    Ok(AuthenticatedAccount {
        account_id: session.account_id,
        session_id: session.session_id,
    })
}

/// Authentication middleware that validates session tokens
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_token_from_request(&request).map_err(|e| e.into_response())?;
    let account = authenticate_token(&token, &state)
        .await
        .map_err(|e| e.into_response())?;

    tracing::debug!(
        "Authenticated request: account_id={}, session_id={}",
        account.account_id,
        account.session_id
    );
    request.extensions_mut().insert(account);
    Ok(next.run(request).await)
}
