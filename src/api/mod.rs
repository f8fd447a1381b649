pub mod ebay;
pub mod listing;
pub mod webhook;

use crate::session::attach_session;
use crate::state::AppState;
use axum::{
    Router, middleware,
    routing::{get, post},
};

/// Routes that run inside a cookie session.
pub fn session_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/ebay/authUrl", get(ebay::auth_url))
        .route("/api/ebay/callback", get(ebay::callback))
        .route("/api/ebay/status", get(ebay::status))
        .route("/api/ebay/user", get(ebay::user))
        .route("/api/ebay/disconnect", post(ebay::disconnect))
        .route("/api/ebay/deleteAccount", axum::routing::delete(ebay::delete_account))
        .route("/api/ebay/postListing", post(ebay::post_listing))
        .route("/api/ebay/listings", get(ebay::listings))
        .route("/api/generateListing", post(listing::generate_listing))
        .route_layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            attach_session,
        ))
}

/// Routes called by the marketplace or by tooling, without a session.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/ebay/webhook",
            get(webhook::challenge).post(webhook::notification),
        )
        .route("/api/ebay/webhookInfo", get(webhook::webhook_info))
        .route("/api/ebay/decodeToken", post(webhook::decode_token))
}
