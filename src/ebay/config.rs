use crate::config::{ConfigError, Lookup};
use std::fmt;

pub const DEFAULT_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope",
    "https://api.ebay.com/oauth/api_scope/sell.marketing.readonly",
    "https://api.ebay.com/oauth/api_scope/sell.marketing",
    "https://api.ebay.com/oauth/api_scope/sell.inventory.readonly",
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
    "https://api.ebay.com/oauth/api_scope/commerce.identity.readonly",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbayEnvironment {
    Sandbox,
    Production,
}

impl EbayEnvironment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PROD" | "PRODUCTION" => Self::Production,
            _ => Self::Sandbox,
        }
    }

    pub fn api_root(self) -> &'static str {
        match self {
            Self::Sandbox => "https://api.sandbox.ebay.com",
            Self::Production => "https://api.ebay.com",
        }
    }

    /// The identity API is served from the `apiz` hosts.
    pub fn identity_root(self) -> &'static str {
        match self {
            Self::Sandbox => "https://apiz.sandbox.ebay.com",
            Self::Production => "https://apiz.ebay.com",
        }
    }

    pub fn authorize_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://auth.sandbox.ebay.com/oauth2/authorize",
            Self::Production => "https://auth.ebay.com/oauth2/authorize",
        }
    }

    pub fn token_url(self) -> String {
        format!("{}/identity/v1/oauth2/token", self.api_root())
    }
}

#[derive(Clone)]
pub struct EbayConfig {
    pub environment: EbayEnvironment,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub api_root: String,
    pub identity_root: String,
    pub revoke_url: Option<String>,
    pub verification_token: Option<String>,
    pub webhook_endpoint: Option<String>,
}

impl fmt::Debug for EbayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EbayConfig")
            .field("environment", &self.environment)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("token_url", &self.token_url)
            .field("api_root", &self.api_root)
            .field(
                "verification_token",
                &self.verification_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl EbayConfig {
    pub fn from_lookup(lookup: &Lookup<'_>) -> Self {
        let environment = lookup("EBAY_ENV")
            .map(|raw| EbayEnvironment::parse(&raw))
            .unwrap_or(EbayEnvironment::Sandbox);
        let scopes = lookup("EBAY_SCOPES")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|scopes| !scopes.is_empty())
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());
        Self {
            environment,
            client_id: lookup("EBAY_CLIENT_ID"),
            client_secret: lookup("EBAY_CLIENT_SECRET"),
            redirect_uri: lookup("EBAY_REDIRECT_URI"),
            scopes,
            authorize_url: lookup("EBAY_AUTH_URL")
                .unwrap_or_else(|| environment.authorize_url().to_string()),
            token_url: lookup("EBAY_TOKEN_URL").unwrap_or_else(|| environment.token_url()),
            api_root: lookup("EBAY_API_ROOT")
                .map(|root| root.trim_end_matches('/').to_string())
                .unwrap_or_else(|| environment.api_root().to_string()),
            identity_root: lookup("EBAY_IDENTITY_ROOT")
                .map(|root| root.trim_end_matches('/').to_string())
                .unwrap_or_else(|| environment.identity_root().to_string()),
            revoke_url: lookup("EBAY_REVOKE_URL"),
            verification_token: lookup("EBAY_VERIFICATION_TOKEN"),
            webhook_endpoint: lookup("EBAY_WEBHOOK_ENDPOINT"),
        }
    }

    pub fn client_id(&self) -> Result<&str, ConfigError> {
        self.client_id
            .as_deref()
            .ok_or(ConfigError::Missing("EBAY_CLIENT_ID"))
    }

    pub fn client_secret(&self) -> Result<&str, ConfigError> {
        self.client_secret
            .as_deref()
            .ok_or(ConfigError::Missing("EBAY_CLIENT_SECRET"))
    }

    pub fn redirect_uri(&self) -> Result<&str, ConfigError> {
        self.redirect_uri
            .as_deref()
            .ok_or(ConfigError::Missing("EBAY_REDIRECT_URI"))
    }

    pub fn verification_token(&self) -> Result<&str, ConfigError> {
        self.verification_token
            .as_deref()
            .ok_or(ConfigError::Missing("EBAY_VERIFICATION_TOKEN"))
    }

    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}
