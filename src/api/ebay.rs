use crate::clock::Clock;
use crate::ebay::inventory::{inventory_item_from_draft, upsert_inventory_item};
use crate::error::AppError;
use crate::idempotency::IdempotencyCache;
use crate::metrics;
use crate::models::{ConnectionStatus, DeletionResponse, PostListingRequest, PostListingResponse};
use crate::revocation::DeletionOutcome;
use crate::session::{Session, SessionEnded};
use crate::state::AppState;
use crate::store::{CachedProfile, ListingRecord};
use axum::{
    Json,
    extract::{Extension, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AuthUrlQuery {
    #[serde(default)]
    prompt: Option<String>,
}

/// Consent URL for connecting an eBay account.
///
/// - Method: `GET`
/// - Path: `/api/ebay/authUrl`
/// - Query: `prompt=login` forces the provider's login screen
/// - Response: `{authUrl}`
pub async fn auth_url(
    State(state): State<AppState>,
    Query(query): Query<AuthUrlQuery>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/api/ebay/authUrl");
    let prompt_login = query.prompt.as_deref() == Some("login");
    let url = state.oauth.authorization_url(prompt_login)?;
    Ok(Json(json!({ "authUrl": url })))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth redirect target. Always answers with a redirect to the app except
/// when the provider sent neither a code nor an error.
///
/// - Method: `GET`
/// - Path: `/api/ebay/callback`
pub async fn callback(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    metrics::inc_requests("/api/ebay/callback");
    if let Some(error) = query.error {
        info!(target = "lister.oauth", session_id = %session.id, %error, "user declined consent");
        return Redirect::to("/?error=access_denied").into_response();
    }
    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        return AppError::BadRequest("No authorization code provided".to_string()).into_response();
    };
    match state.oauth.complete(&session, &code).await {
        Ok(_) => Redirect::to("/?connected=true").into_response(),
        Err(err) => {
            warn!(target = "lister.oauth", session_id = %session.id, error = %err, "oauth callback failed");
            Redirect::to("/?error=oauth_failed").into_response()
        }
    }
}

/// Whether the session currently holds a live credential. No upstream call.
///
/// - Method: `GET`
/// - Path: `/api/ebay/status`
pub async fn status(Extension(session): Extension<Session>) -> Json<ConnectionStatus> {
    metrics::inc_requests("/api/ebay/status");
    Json(ConnectionStatus {
        connected: session.credential.is_some(),
        expires_at: session.credential.map(|credential| credential.expires_at),
    })
}

/// Connected account's profile, served from cache when possible.
///
/// - Method: `GET`
/// - Path: `/api/ebay/user`
pub async fn user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<CachedProfile>, AppError> {
    metrics::inc_requests("/api/ebay/user");
    let credential = state.guard.authorize(&session).await?;
    let profile = state.oauth.profile(&credential).await?;
    Ok(Json(profile))
}

/// Forget the eBay credential for this session's user.
///
/// - Method: `POST`
/// - Path: `/api/ebay/disconnect`
pub async fn disconnect(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/api/ebay/disconnect");
    state.revocation.disconnect(&session).await?;
    Ok(Json(json!({ "success": true })))
}

/// Delete the user, their credential, listing history and sessions.
///
/// - Method: `DELETE`
/// - Path: `/api/ebay/deleteAccount`
/// - Response: `{success, message, deletedAt}`; 404 `already_deleted` on repeat
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    metrics::inc_requests("/api/ebay/deleteAccount");
    match state.revocation.delete_account(&session).await? {
        DeletionOutcome::Deleted { deleted_at, .. } => {
            let body = DeletionResponse {
                success: true,
                message: "Account and all associated data deleted successfully",
                deleted_at,
            };
            Ok((Extension(SessionEnded), Json(body)).into_response())
        }
        DeletionOutcome::AlreadyDeleted => Err(AppError::NotFound("already_deleted")),
    }
}

/// Push a drafted listing to the seller's inventory.
///
/// - Method: `POST`
/// - Path: `/api/ebay/postListing`
/// - Headers: optional `Idempotency-Key`; a replay returns the first response
/// - Body: `ListingDraft` plus optional `sku`
/// - Response: `{success, sku, listingUrl?}`
pub async fn post_listing(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Json(payload): Json<PostListingRequest>,
) -> Result<Json<PostListingResponse>, AppError> {
    metrics::inc_requests("/api/ebay/postListing");
    let credential = state.guard.authorize(&session).await?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| IdempotencyCache::key(&credential.user_id.to_string(), value));
    if let Some(key) = &idempotency_key
        && let Some(existing) = state.idempotency.get(key).await
    {
        info!(target = "lister.api", user_id = %credential.user_id, "idempotent replay");
        return Ok(Json(existing));
    }

    let PostListingRequest { draft, sku } = payload;
    draft.validate().map_err(AppError::BadRequest)?;
    if draft.price_amount().is_none() {
        return Err(AppError::BadRequest(format!("unreadable price `{}`", draft.price)));
    }
    let sku = sku
        .map(|sku| sku.trim().to_string())
        .filter(|sku| !sku.is_empty())
        .unwrap_or_else(generate_sku);

    let item = inventory_item_from_draft(&draft);
    upsert_inventory_item(
        &state.gateway,
        &state.config.ebay.api_root,
        &sku,
        &item,
        &credential.access_token,
    )
    .await?;

    state
        .store
        .record_listing(&ListingRecord {
            id: Uuid::new_v4(),
            user_id: credential.user_id,
            sku: sku.clone(),
            title: item.product.title.clone(),
            created_at: state.clock.now(),
        })
        .await?;
    info!(target = "lister.api", user_id = %credential.user_id, %sku, "inventory item created");

    let response = PostListingResponse {
        success: true,
        sku,
        listing_url: None,
    };
    if let Some(key) = &idempotency_key {
        state.idempotency.set(key, &response).await;
    }
    Ok(Json(response))
}

/// Listing history for the session's user, newest first.
///
/// - Method: `GET`
/// - Path: `/api/ebay/listings`
pub async fn listings(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<ListingRecord>>, AppError> {
    metrics::inc_requests("/api/ebay/listings");
    let user_id = session.user_id.ok_or_else(AppError::unauthenticated)?;
    let mut rows = state.store.list_listings(user_id).await?;
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(rows))
}

fn generate_sku() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("LAI-{}", id[..12].to_ascii_uppercase())
}
