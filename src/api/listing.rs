use crate::error::AppError;
use crate::metrics;
use crate::models::{GenerateListingRequest, ListingDraft};
use crate::session::Session;
use crate::state::AppState;
use axum::{
    Json,
    extract::{ConnectInfo, Extension, State},
    http::Extensions,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::info;

/// Bucket key for the model quota. A connected user keeps one bucket across
/// browsers; anonymous callers share one per peer address, since dropping
/// the cookie mints a new session on every request.
fn rate_key(session: &Session, extensions: &Extensions) -> String {
    if let Some(user_id) = session.user_id {
        return format!("user:{user_id}");
    }
    match extensions.get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(peer)) => format!("peer:{}", peer.ip()),
        None => format!("session:{}", session.id),
    }
}

/// Draft a listing from product photos.
///
/// - Method: `POST`
/// - Path: `/api/generateListing`
/// - Body: `{imageParts: [{mimeType, data}], personalNote?}` (base64 image data)
/// - Response: `ListingDraft`; 429 with `Retry-After` when the caller's bucket is empty
pub async fn generate_listing(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    extensions: Extensions,
    Json(payload): Json<GenerateListingRequest>,
) -> Result<Response, AppError> {
    metrics::inc_requests("/api/generateListing");
    if payload.image_parts.is_empty() {
        return Err(AppError::BadRequest("No images provided".to_string()));
    }
    if let Some(part) = payload
        .image_parts
        .iter()
        .find(|part| !part.mime_type.starts_with("image/") || part.data.is_empty())
    {
        return Err(AppError::BadRequest(format!(
            "unsupported image part ({})",
            part.mime_type
        )));
    }

    let permit = match state.limiter.consume(&rate_key(&session, &extensions)).await {
        Ok(permit) => permit,
        Err(exceeded) => return Ok(exceeded.into_response()),
    };

    let draft: ListingDraft = state
        .generator
        .generate(&payload.image_parts, payload.personal_note.as_deref())
        .await?;
    info!(
        target = "lister.api",
        session_id = %session.id,
        images = payload.image_parts.len(),
        "listing drafted"
    );

    let mut response = Json(draft).into_response();
    permit.apply_headers(response.headers_mut());
    Ok(response)
}
