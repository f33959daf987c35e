use crate::{error::ApiError, middleware::AuthenticatedAccount, state::AppState};
use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use services::account::AccountError;
use services::ledger::{EntitlementSummary, LedgerError};
use utoipa::ToSchema;

/// Request to register a new account
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Public account representation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    pub id: String,
    pub email: String,
    pub username: String,
    pub membership: String,
}

/// Request to log in with email or username
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Email address or username
    pub identifier: String,
    pub password: String,
}

/// Session token response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer token for the Authorization header
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Profile with entitlement summary
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub account: AccountResponse,
    pub entitlement: EntitlementSummary,
}

fn map_account_error(err: AccountError) -> ApiError {
    match err {
        AccountError::EmailTaken => ApiError::conflict("Email is already registered"),
        AccountError::UsernameTaken => ApiError::conflict("Username is already taken"),
        AccountError::InvalidUsername(reason) => {
            ApiError::unprocessable_entity(format!("Invalid username: {}", reason))
        }
        AccountError::InvalidCredentials => {
            ApiError::unauthorized("Invalid email/username or password")
        }
        AccountError::AccountNotFound => ApiError::not_found("Account not found"),
        AccountError::Database(msg) => {
            tracing::error!(error = ?msg, "Database error in account operation");
            ApiError::internal_server_error("An internal error occurred")
        }
    }
}

/// POST /v1/accounts - Register a new account (Free tier)
#[utoipa::path(
    post,
    path = "/v1/accounts",
    tag = "Accounts",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 409, description = "Email or username taken"),
        (status = 422, description = "Invalid username")
    )
)]
pub async fn register(
    State(app_state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(http::StatusCode, Json<AccountResponse>), ApiError> {
    if req.password.len() < 8 {
        return Err(ApiError::unprocessable_entity(
            "Password must be at least 8 characters",
        ));
    }

    let account = app_state
        .account_service
        .register(req.email, req.username, req.password)
        .await
        .map_err(map_account_error)?;

    Ok((
        http::StatusCode::CREATED,
        Json(AccountResponse {
            id: account.id.to_string(),
            email: account.email,
            username: account.username,
            membership: account.entitlement.membership.to_string(),
        }),
    ))
}

/// POST /v1/sessions - Log in
#[utoipa::path(
    post,
    path = "/v1/sessions",
    tag = "Accounts",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(app_state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (session, token) = app_state
        .account_service
        .login(req.identifier, req.password)
        .await
        .map_err(map_account_error)?;

    Ok(Json(LoginResponse {
        token,
        expires_at: session.expires_at,
    }))
}

/// DELETE /v1/sessions - Log out the current session
#[utoipa::path(
    delete,
    path = "/v1/sessions",
    tag = "Accounts",
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Unauthorized")
    ),
    security(("session_token" = []))
)]
pub async fn logout(
    State(app_state): State<AppState>,
    Extension(account): Extension<AuthenticatedAccount>,
) -> Result<http::StatusCode, ApiError> {
    app_state
        .account_service
        .logout(account.session_id)
        .await
        .map_err(map_account_error)?;
    Ok(http::StatusCode::NO_CONTENT)
}

/// GET /v1/account - Profile with entitlement summary
#[utoipa::path(
    get,
    path = "/v1/account",
    tag = "Accounts",
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("session_token" = []))
)]
pub async fn get_profile(
    State(app_state): State<AppState>,
    Extension(auth): Extension<AuthenticatedAccount>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let account = app_state
        .account_service
        .get_account(auth.account_id)
        .await
        .map_err(map_account_error)?;

    let entitlement = app_state
        .ledger
        .summary(auth.account_id)
        .await
        .map_err(|e| match e {
            LedgerError::AccountNotFound => ApiError::not_found("Account not found"),
            other => {
                tracing::error!(error = %other, "Failed to compute entitlement summary");
                ApiError::internal_server_error("Failed to load entitlement")
            }
        })?;

    Ok(Json(ProfileResponse {
        account: AccountResponse {
            id: account.id.to_string(),
            email: account.email,
            username: account.username,
            membership: account.entitlement.membership.to_string(),
        },
        entitlement,
    }))
}
