use crate::models::PostListingResponse;
use redis::AsyncCommands;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::warn;

/// Replay cache for `Idempotency-Key` on listing posts. Redis when
/// configured so replicas share it, otherwise process-local.
pub enum IdempotencyCache {
    Redis { client: redis::Client, ttl: Duration },
    Local {
        entries: Mutex<HashMap<String, (Instant, PostListingResponse)>>,
        ttl: Duration,
    },
}

impl IdempotencyCache {
    pub fn redis(client: redis::Client, ttl: Duration) -> Self {
        Self::Redis { client, ttl }
    }

    pub fn local(ttl: Duration) -> Self {
        Self::Local {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn key(scope: &str, presented: &str) -> String {
        format!("idem:post_listing:{scope}:{presented}")
    }

    pub async fn get(&self, key: &str) -> Option<PostListingResponse> {
        match self {
            Self::Redis { client, .. } => {
                let mut conn = match client.get_multiplexed_async_connection().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(target = "lister.idempotency", error = %err, "redis unavailable");
                        return None;
                    }
                };
                let stored: Option<String> = conn.get(key).await.ok().flatten();
                stored.and_then(|value| serde_json::from_str(&value).ok())
            }
            Self::Local { entries, ttl } => {
                let mut entries = entries.lock().await;
                match entries.get(key) {
                    Some((stored_at, value)) if stored_at.elapsed() < *ttl => Some(value.clone()),
                    Some(_) => {
                        entries.remove(key);
                        None
                    }
                    None => None,
                }
            }
        }
    }

    pub async fn set(&self, key: &str, value: &PostListingResponse) {
        match self {
            Self::Redis { client, ttl } => {
                let json = match serde_json::to_string(value) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(target = "lister.idempotency", error = %err, "response not cacheable");
                        return;
                    }
                };
                let mut conn = match client.get_multiplexed_async_connection().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(target = "lister.idempotency", error = %err, "redis unavailable; replay not recorded");
                        return;
                    }
                };
                let written: Result<(), redis::RedisError> =
                    conn.set_ex(key, json, ttl.as_secs()).await;
                if let Err(err) = written {
                    warn!(target = "lister.idempotency", error = %err, "redis write failed; replay not recorded");
                }
            }
            Self::Local { entries, .. } => {
                entries
                    .lock()
                    .await
                    .insert(key.to_string(), (Instant::now(), value.clone()));
            }
        }
    }

    /// Drops expired local entries. Redis expires keys on its own.
    pub async fn prune(&self) -> usize {
        match self {
            Self::Redis { .. } => 0,
            Self::Local { entries, ttl } => {
                let mut entries = entries.lock().await;
                let before = entries.len();
                entries.retain(|_, (stored_at, _)| stored_at.elapsed() < *ttl);
                before - entries.len()
            }
        }
    }
}
