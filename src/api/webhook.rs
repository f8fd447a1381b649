use crate::ebay::token_blob;
use crate::error::AppError;
use crate::metrics;
use crate::revocation::{
    ACCOUNT_DELETION, AUTHORIZATION_REVOKED, Notification, challenge_response,
};
use crate::state::AppState;
use axum::{
    Json,
    extract::{OriginalUri, Query, State},
    http::{HeaderMap, header::HOST},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

/// The endpoint URL the marketplace hashes against: the configured one, or
/// `https://{Host}{path}` for this request. Never includes the query.
fn endpoint_url(state: &AppState, headers: &HeaderMap, path: &str) -> String {
    if let Some(endpoint) = &state.config.ebay.webhook_endpoint {
        return endpoint.clone();
    }
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("https://{host}{path}")
}

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    #[serde(default)]
    challenge_code: Option<String>,
}

/// Endpoint ownership challenge.
///
/// - Method: `GET`
/// - Path: `/api/ebay/webhook?challenge_code=...`
/// - Response: `{challengeResponse}`, hex SHA-256 of code + verification token + endpoint URL
pub async fn challenge(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<ChallengeQuery>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/api/ebay/webhook:challenge");
    let token = state.config.ebay.verification_token()?;
    let code = query
        .challenge_code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AppError::BadRequest("challenge_code is required".to_string()))?;
    if state.config.ebay.webhook_endpoint.is_none() {
        warn!(
            target = "lister.webhook",
            "EBAY_WEBHOOK_ENDPOINT not set; hashing against the request host"
        );
    }
    let endpoint = endpoint_url(&state, &headers, uri.path());
    Ok(Json(json!({
        "challengeResponse": challenge_response(&code, token, &endpoint)
    })))
}

/// Marketplace notifications. Unknown users and unrelated topics are
/// acknowledged with 200 so the provider does not retry them.
///
/// - Method: `POST`
/// - Path: `/api/ebay/webhook`
pub async fn notification(
    State(state): State<AppState>,
    Json(notification): Json<Notification>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/api/ebay/webhook");
    let outcome = state.revocation.handle_notification(&notification).await?;
    info!(target = "lister.webhook", ?outcome, "notification processed");
    Ok(Json(json!({ "success": true })))
}

/// Values to paste into the developer console.
///
/// - Method: `GET`
/// - Path: `/api/ebay/webhookInfo`
pub async fn webhook_info(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    metrics::inc_requests("/api/ebay/webhookInfo");
    let webhook_url = endpoint_url(&state, &headers, "/api/ebay/webhook");
    Json(json!({
        "webhookUrl": webhook_url,
        "verificationTokenConfigured": state.config.ebay.verification_token.is_some(),
        "supportedNotifications": [ACCOUNT_DELETION, AUTHORIZATION_REVOKED],
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeTokenRequest {
    osh_token: String,
}

/// Inspect a compressed `v^...#t^...` token. Returns metadata only.
///
/// - Method: `POST`
/// - Path: `/api/ebay/decodeToken`
/// - Body: `{oshToken}`
pub async fn decode_token(Json(payload): Json<DecodeTokenRequest>) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/api/ebay/decodeToken");
    let decoded = token_blob::decode(&payload.osh_token)?;
    Ok(Json(json!({
        "success": true,
        "tokenInfo": decoded.metadata,
    })))
}
