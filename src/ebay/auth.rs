use crate::config::ConfigError;
use crate::ebay::config::EbayConfig;
use crate::store::CredentialRecord;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use urlencoding::encode;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("token endpoint rejected the request (HTTP {status})")]
    Rejected { status: u16, body: String },
    #[error("oauth request failed: {0}")]
    Request(String),
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Token endpoint payload. Validated before it becomes a credential record.
#[derive(Debug, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenGrant {
    fn validate(self) -> Result<Self, EbayAuthError> {
        if self.access_token.trim().is_empty() {
            return Err(EbayAuthError::InvalidResponse("missing access_token".into()));
        }
        if self.expires_in <= 0 {
            return Err(EbayAuthError::InvalidResponse("missing or non-positive expires_in".into()));
        }
        Ok(self)
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Converts the relative lifetime to an absolute expiry. When the grant
    /// carries no refresh token (refresh responses usually do not), the
    /// previous one is kept.
    pub fn into_record(
        self,
        user_id: Uuid,
        now: DateTime<Utc>,
        scopes: &str,
        fallback_refresh: Option<String>,
    ) -> CredentialRecord {
        CredentialRecord {
            user_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(fallback_refresh),
            expires_at: now + Duration::seconds(self.expires_in),
            token_type: self
                .token_type
                .unwrap_or_else(|| "User Access Token".to_string()),
            scopes: Some(scopes.to_string()),
            updated_at: now,
            profile: None,
        }
    }
}

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    config: EbayConfig,
}

impl OAuthClient {
    pub fn new(http: Client, config: EbayConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &EbayConfig {
        &self.config
    }

    pub fn authorization_url(&self, prompt_login: bool) -> Result<String, EbayAuthError> {
        let client_id = self.config.client_id()?;
        let redirect_uri = self.config.redirect_uri()?;
        let mut url = format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&scope={}",
            self.config.authorize_url,
            encode(client_id),
            encode(redirect_uri),
            encode(&self.config.scope_param()),
        );
        if prompt_login {
            url.push_str("&prompt=login");
        }
        Ok(url)
    }

    /// One-shot: authorization codes are single use, so failures are never retried.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, EbayAuthError> {
        let redirect_uri = self.config.redirect_uri()?;
        let grant = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?;
        info!(target = "lister.oauth", expires_in = grant.expires_in, "authorization code exchanged");
        Ok(grant)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, EbayAuthError> {
        let scope = self.config.scope_param();
        let grant = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("scope", &scope),
            ])
            .await?;
        info!(target = "lister.oauth", expires_in = grant.expires_in, "access token refreshed");
        Ok(grant)
    }

    /// Returns `false` when no revocation endpoint is configured.
    pub async fn revoke(&self, token: &str) -> Result<bool, EbayAuthError> {
        let Some(url) = self.config.revoke_url.as_deref() else {
            return Ok(false);
        };
        let response = self
            .http
            .post(url)
            .basic_auth(self.config.client_id()?, Some(self.config.client_secret()?))
            .form(&[("token", token), ("token_type_hint", "refresh_token")])
            .send()
            .await
            .map_err(|err| EbayAuthError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EbayAuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(true)
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenGrant, EbayAuthError> {
        let client_id = self.config.client_id()?;
        let client_secret = self.config.client_secret()?;
        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(params)
            .send()
            .await
            .map_err(|err| EbayAuthError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target = "lister.oauth",
                status = status.as_u16(),
                body = %body,
                "token endpoint rejected request"
            );
            return Err(EbayAuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|err| EbayAuthError::InvalidResponse(err.to_string()))?;
        grant.validate()
    }
}
