//! Shared fixtures for unit tests.

use crate::config::{SessionConfig, lookup_from};
use crate::ebay::EbayConfig;
use crate::store::CredentialRecord;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

pub const SECRET: &str = "0123456789abcdef0123456789abcdef";

/// Marketplace config with every URL pointed at one mock server.
pub fn ebay_config(server_uri: &str) -> EbayConfig {
    let token_url = format!("{server_uri}/identity/v1/oauth2/token");
    EbayConfig::from_lookup(&lookup_from(&[
        ("EBAY_CLIENT_ID", "X"),
        ("EBAY_CLIENT_SECRET", "S"),
        ("EBAY_REDIRECT_URI", "https://app/cb"),
        ("EBAY_TOKEN_URL", token_url.as_str()),
        ("EBAY_API_ROOT", server_uri),
        ("EBAY_IDENTITY_ROOT", server_uri),
        ("EBAY_VERIFICATION_TOKEN", "verify-me"),
    ]))
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        secret: SECRET.to_string(),
        cookie_name: "sid".to_string(),
        ttl_days: 7,
        secure: false,
    }
}

pub fn credential(
    user_id: Uuid,
    now: DateTime<Utc>,
    lifetime: Duration,
    refresh_token: Option<&str>,
) -> CredentialRecord {
    CredentialRecord {
        user_id,
        access_token: "t1".to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expires_at: now + lifetime,
        token_type: "User Access Token".to_string(),
        scopes: None,
        updated_at: now,
        profile: None,
    }
}
