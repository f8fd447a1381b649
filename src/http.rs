use crate::config::Lookup;
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

impl HttpConfig {
    pub fn from_lookup(lookup: &Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            timeout_secs: lookup("HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.timeout_secs),
            connect_timeout_secs: lookup("HTTP_CONNECT_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.connect_timeout_secs),
        }
    }
}

/// Every outbound call goes through a client built here, so none can hang
/// past the configured timeout.
pub fn build_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
}
