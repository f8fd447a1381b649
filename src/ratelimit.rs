use crate::config::Lookup;
use crate::models::ApiError;
use axum::{
    Json,
    http::{HeaderMap, StatusCode, header::HeaderValue, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub rate_per_sec: f64,
    pub capacity: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 0.2,
            capacity: 5.0,
        }
    }
}

impl RateLimitConfig {
    pub fn from_lookup(lookup: &Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            rate_per_sec: lookup("RATE_LIMIT_PER_SEC")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| *value > 0.0)
                .unwrap_or(defaults.rate_per_sec),
            capacity: lookup("RATE_LIMIT_CAPACITY")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| *value >= 1.0)
                .unwrap_or(defaults.capacity),
        }
    }
}

/// Per-key token buckets. Keys are session ids, so one browser cannot
/// exhaust the model quota for everyone.
#[derive(Clone)]
pub struct TokenBuckets {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

struct Bucket {
    level: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn level_at(&self, now: Instant, config: RateLimitConfig) -> f64 {
        let idle = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        (self.level + idle * config.rate_per_sec).min(config.capacity)
    }
}

impl TokenBuckets {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn consume(&self, key: &str) -> Result<RatePermit, RateExceeded> {
        let config = self.config;
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            level: config.capacity,
            refilled_at: now,
        });
        bucket.level = bucket.level_at(now, config);
        bucket.refilled_at = now;

        if bucket.level < 1.0 {
            return Err(RateExceeded(Snapshot {
                config,
                level: bucket.level,
            }));
        }
        bucket.level -= 1.0;
        Ok(RatePermit(Snapshot {
            config,
            level: bucket.level,
        }))
    }

    /// Drops buckets that have refilled completely.
    pub async fn prune(&self) -> usize {
        let config = self.config;
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.level_at(now, config) < config.capacity);
        before - buckets.len()
    }
}

/// Bucket level right after a decision.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    config: RateLimitConfig,
    level: f64,
}

impl Snapshot {
    fn seconds_until(&self, target: f64) -> f64 {
        ((target - self.level) / self.config.rate_per_sec).max(0.0)
    }

    fn write(&self, headers: &mut HeaderMap) {
        let full_in = self.seconds_until(self.config.capacity).ceil() as u64;
        headers.insert("X-RateLimit-Limit", header_value(self.config.capacity as u64));
        headers.insert("X-RateLimit-Remaining", header_value(self.level.floor() as u64));
        headers.insert("X-RateLimit-Reset", header_value(full_in));
    }
}

fn header_value(value: u64) -> HeaderValue {
    HeaderValue::from(value)
}

#[derive(Debug, Clone)]
pub struct RatePermit(Snapshot);

impl RatePermit {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        self.0.write(headers);
    }
}

#[derive(Debug, Clone)]
pub struct RateExceeded(Snapshot);

impl RateExceeded {
    pub fn retry_after_secs(&self) -> u64 {
        self.0.seconds_until(1.0).ceil().max(1.0) as u64
    }
}

impl IntoResponse for RateExceeded {
    fn into_response(self) -> Response {
        let payload = ApiError::new("rate_limited", Some("Too many requests".to_string()));
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response();
        self.0.write(response.headers_mut());
        response
            .headers_mut()
            .insert(RETRY_AFTER, header_value(self.retry_after_secs()));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: f64) -> TokenBuckets {
        TokenBuckets::new(RateLimitConfig {
            rate_per_sec: 0.01,
            capacity,
        })
    }

    #[tokio::test]
    async fn bucket_empties_after_capacity_requests() {
        let limiter = limiter(2.0);
        assert!(limiter.consume("s1").await.is_ok());
        assert!(limiter.consume("s1").await.is_ok());
        let exceeded = limiter.consume("s1").await.expect_err("bucket empty");
        assert!(exceeded.retry_after_secs() >= 1);
    }

    #[tokio::test]
    async fn keys_have_independent_buckets() {
        let limiter = limiter(1.0);
        assert!(limiter.consume("s1").await.is_ok());
        assert!(limiter.consume("s2").await.is_ok());
        assert!(limiter.consume("s1").await.is_err());
    }

    #[tokio::test]
    async fn exceeded_response_carries_retry_after() {
        let limiter = limiter(1.0);
        limiter.consume("s1").await.unwrap();
        let response = limiter.consume("s1").await.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(RETRY_AFTER));
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "0");
    }

    #[tokio::test]
    async fn prune_drops_refilled_buckets() {
        let limiter = TokenBuckets::new(RateLimitConfig {
            rate_per_sec: 1000.0,
            capacity: 1.0,
        });
        limiter.consume("s1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(limiter.prune().await, 1);
    }

    #[test]
    fn config_ignores_invalid_values() {
        let lookup = crate::config::lookup_from(&[
            ("RATE_LIMIT_PER_SEC", "-1"),
            ("RATE_LIMIT_CAPACITY", "20"),
        ]);
        let config = RateLimitConfig::from_lookup(&lookup);
        assert_eq!(config.rate_per_sec, RateLimitConfig::default().rate_per_sec);
        assert_eq!(config.capacity, 20.0);
    }
}
