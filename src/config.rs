use crate::{
    ebay::config::EbayConfig, http::HttpConfig, llm::LlmConfig, ratelimit::RateLimitConfig,
    store::supabase::SupabaseConfig,
};
use std::{env, fmt};
use thiserror::Error;

/// Reads one setting by name. Implementations return trimmed, non-empty values only.
pub type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// What the token guard does when a stored access token has expired.
/// Chosen once per process and applied to every gated operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshPolicy {
    #[default]
    FailClosed,
    Refresh,
}

impl RefreshPolicy {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fail_closed" | "fail-closed" | "reauth" => Ok(Self::FailClosed),
            "refresh" | "transparent_refresh" => Ok(Self::Refresh),
            other => Err(ConfigError::Invalid {
                name: "TOKEN_REFRESH_POLICY",
                reason: format!("unknown policy `{other}`"),
            }),
        }
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub cookie_name: String,
    pub ttl_days: i64,
    pub secure: bool,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("cookie_name", &self.cookie_name)
            .field("ttl_days", &self.ttl_days)
            .field("secure", &self.secure)
            .finish()
    }
}

impl SessionConfig {
    pub fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ConfigError> {
        let secret = lookup("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;
        if secret.len() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "SESSION_SECRET",
                reason: format!("must be at least {MIN_SESSION_SECRET_LEN} bytes"),
            });
        }
        let environment = lookup("APP_ENV")
            .or_else(|| lookup("NODE_ENV"))
            .unwrap_or_else(|| "development".to_string());
        Ok(Self {
            secret,
            cookie_name: lookup("SESSION_COOKIE_NAME")
                .unwrap_or_else(|| "ebay-listing-ai-session".to_string()),
            ttl_days: lookup("SESSION_TTL_DAYS")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(7),
            secure: environment.eq_ignore_ascii_case("production"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub body_limit: usize,
    pub session: SessionConfig,
    pub ebay: EbayConfig,
    pub refresh_policy: RefreshPolicy,
    pub llm: LlmConfig,
    pub http: HttpConfig,
    pub supabase: Option<SupabaseConfig>,
    pub redis_url: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub metrics_key: Option<String>,
    pub idempotency_ttl_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| {
            env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    }

    pub fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ConfigError> {
        let refresh_policy = match lookup("TOKEN_REFRESH_POLICY") {
            Some(raw) => RefreshPolicy::parse(&raw)?,
            None => RefreshPolicy::default(),
        };
        Ok(Self {
            port: lookup("PORT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(8000),
            body_limit: lookup("REQUEST_MAX_BYTES")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(12 * 1024 * 1024),
            session: SessionConfig::from_lookup(lookup)?,
            ebay: EbayConfig::from_lookup(lookup),
            refresh_policy,
            llm: LlmConfig::from_lookup(lookup),
            http: HttpConfig::from_lookup(lookup),
            supabase: SupabaseConfig::from_lookup(lookup),
            redis_url: lookup("REDIS_URL"),
            rate_limit: RateLimitConfig::from_lookup(lookup),
            metrics_key: lookup("METRICS_KEY"),
            idempotency_ttl_secs: lookup("IDEMPOTENCY_TTL_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3600),
        })
    }
}

#[cfg(test)]
pub(crate) fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
    let owned: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| owned.get(name).cloned()
}
