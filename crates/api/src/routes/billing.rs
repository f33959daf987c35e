use crate::{error::ApiError, state::AppState};
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use services::billing::{BillingError, BillingEvent, EventDisposition};
use sha2::Sha256;
use utoipa::ToSchema;

use super::credits::map_ledger_error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "billing-signature";
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

#[derive(Debug, PartialEq, Eq)]
pub enum SignatureError {
    MissingField,
    BadTimestamp,
    /// Timestamp outside the tolerance window (replay protection).
    Stale,
    BadSignature,
}

/// Verify a `t=<unix>,v1=<hex>` signature header: HMAC-SHA256 over
/// `"{t}.{body}"` with the shared webhook secret. Hard precondition for the
/// reconciler; unverified events never reach it.
pub fn verify_webhook_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signature: Option<&str> = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }
    let (timestamp, signature) = match (timestamp, signature) {
        (Some(t), Some(v)) => (t, v),
        _ => return Err(SignatureError::MissingField),
    };

    let timestamp_secs: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::BadTimestamp)?;
    if (now.timestamp() - timestamp_secs).abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }

    let expected = hex::decode(signature).map_err(|_| SignatureError::BadSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::BadSignature)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::BadSignature)
}

fn map_billing_error(err: BillingError) -> ApiError {
    match err {
        BillingError::MalformedEvent(msg) => {
            ApiError::bad_request(format!("Malformed billing event: {}", msg))
        }
        BillingError::AccountNotFound(msg) => {
            tracing::warn!("Billing event for unknown account: {}", msg);
            ApiError::bad_request("Event does not resolve to an account")
        }
        BillingError::RetentionTooShort { requested, minimum } => ApiError::bad_request(format!(
            "Retention window of {} days is below the minimum of {} days",
            requested, minimum
        )),
        BillingError::StorageConflict => {
            ApiError::conflict("The account was updated concurrently, please retry")
        }
        BillingError::Ledger(err) => map_ledger_error(err),
        BillingError::Database(msg) => {
            tracing::error!(error = ?msg, "Database error processing billing event");
            ApiError::internal_server_error("An internal error occurred")
        }
    }
}

/// Webhook acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// "applied", "already_processed" or "ignored"
    pub disposition: String,
}

/// POST /v1/billing/webhook - Billing provider events
#[utoipa::path(
    post,
    path = "/v1/billing/webhook",
    tag = "Billing",
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Bad signature or malformed event")
    )
)]
pub async fn handle_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let secret = &app_state.billing_config.webhook_secret;
    if secret.is_empty() {
        tracing::error!("Billing webhook received but no webhook secret is configured");
        return Err(ApiError::service_unavailable("Billing is not configured"));
    }

    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing billing signature header"))?;

    verify_webhook_signature(
        secret,
        header,
        &body,
        Utc::now(),
        app_state.billing_config.signature_tolerance_secs,
    )
    .map_err(|e| {
        tracing::warn!("Webhook signature verification failed: {:?}", e);
        ApiError::bad_request("Invalid webhook signature")
    })?;

    // Only parse JSON after signature verification succeeds.
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON payload: {}", e)))?;

    let event_id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::bad_request("Event is missing an id"))?
        .to_string();
    let kind = payload
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::bad_request("Event is missing a type"))?
        .to_string();

    let disposition = app_state
        .billing_reconciler
        .process_event(BillingEvent {
            event_id,
            kind,
            payload,
        })
        .await
        .map_err(map_billing_error)?;

    let disposition = match disposition {
        EventDisposition::Applied => "applied",
        EventDisposition::AlreadyProcessed => "already_processed",
        EventDisposition::Ignored => "ignored",
    };
    Ok(Json(WebhookAck {
        received: true,
        disposition: disposition.to_string(),
    }))
}

/// Janitor request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PruneRequest {
    pub older_than_days: i64,
}

/// Janitor response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PruneResponse {
    pub pruned: u64,
}

/// POST /v1/internal/billing/prune - Prune old processed webhook events.
/// Guarded by the internal token, not a user session; intended for an
/// external scheduled task.
#[utoipa::path(
    post,
    path = "/v1/internal/billing/prune",
    tag = "Billing",
    request_body = PruneRequest,
    responses(
        (status = 200, description = "Pruned", body = PruneResponse),
        (status = 400, description = "Retention window too short"),
        (status = 401, description = "Missing or invalid internal token")
    )
)]
pub async fn prune_processed_events(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PruneRequest>,
) -> Result<Json<PruneResponse>, ApiError> {
    let expected = &app_state.billing_config.internal_token;
    let provided = headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());
    if expected.is_empty() || provided != Some(expected.as_str()) {
        return Err(ApiError::unauthorized("Invalid internal token"));
    }

    let pruned = app_state
        .billing_reconciler
        .prune_processed_events(req.older_than_days)
        .await
        .map_err(map_billing_error)?;

    Ok(Json(PruneResponse { pruned }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"id":"evt_1","type":"subscription.updated"}"#;
        let header = sign("whsec_test", now().timestamp(), payload);
        assert_eq!(
            verify_webhook_signature("whsec_test", &header, payload, now(), 300),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign("whsec_test", now().timestamp(), payload);
        let err = verify_webhook_signature("whsec_test", &header, b"{\"id\":\"evt_2\"}", now(), 300)
            .unwrap_err();
        assert_eq!(err, SignatureError::BadSignature);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let header = sign("whsec_a", now().timestamp(), payload);
        let err =
            verify_webhook_signature("whsec_b", &header, payload, now(), 300).unwrap_err();
        assert_eq!(err, SignatureError::BadSignature);
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let stale = now().timestamp() - 3600;
        let header = sign("whsec_test", stale, payload);
        let err =
            verify_webhook_signature("whsec_test", &header, payload, now(), 300).unwrap_err();
        assert_eq!(err, SignatureError::Stale);
    }

    #[test]
    fn test_malformed_header_rejected() {
        let err = verify_webhook_signature("whsec_test", "nonsense", b"{}", now(), 300)
            .unwrap_err();
        assert_eq!(err, SignatureError::MissingField);

        let err = verify_webhook_signature("whsec_test", "t=abc,v1=00", b"{}", now(), 300)
            .unwrap_err();
        assert_eq!(err, SignatureError::BadTimestamp);
    }
}
