use crate::{error::ApiError, middleware::AuthenticatedAccount, state::AppState};
use axum::{extract::State, Extension, Json};
use services::ledger::{EntitlementSummary, LedgerError};

pub fn map_ledger_error(err: LedgerError) -> ApiError {
    match err {
        LedgerError::AccountNotFound => ApiError::not_found("Account not found"),
        LedgerError::PlanNotEligible(membership) => ApiError::forbidden(format!(
            "Plan '{}' does not permit add-on purchases",
            membership
        )),
        LedgerError::InvalidQuantity(quantity) => {
            ApiError::bad_request(format!("Invalid pack quantity: {}", quantity))
        }
        LedgerError::StorageConflict => {
            ApiError::conflict("The account was updated concurrently, please retry")
        }
        LedgerError::Database(msg) => {
            tracing::error!(error = ?msg, "Database error in ledger operation");
            ApiError::internal_server_error("An internal error occurred")
        }
    }
}

/// GET /v1/credits - Entitlement summary for the current period
#[utoipa::path(
    get,
    path = "/v1/credits",
    tag = "Credits",
    responses(
        (status = 200, description = "Entitlement summary", body = EntitlementSummary),
        (status = 401, description = "Unauthorized")
    ),
    security(("session_token" = []))
)]
pub async fn get_credits(
    State(app_state): State<AppState>,
    Extension(account): Extension<AuthenticatedAccount>,
) -> Result<Json<EntitlementSummary>, ApiError> {
    let summary = app_state
        .ledger
        .summary(account.account_id)
        .await
        .map_err(map_ledger_error)?;
    Ok(Json(summary))
}
