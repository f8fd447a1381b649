use crate::clock::Clock;
use crate::config::RefreshPolicy;
use crate::ebay::OAuthClient;
use crate::error::AppError;
use crate::metrics;
use crate::session::Session;
use crate::store::{CredentialRecord, Store};
use std::sync::Arc;
use tracing::{info, warn};

/// Single gate in front of every marketplace call. The policy is fixed at
/// startup so every endpoint treats an expired token the same way.
#[derive(Clone)]
pub struct TokenGuard {
    store: Arc<dyn Store>,
    oauth: OAuthClient,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
}

impl TokenGuard {
    pub fn new(
        store: Arc<dyn Store>,
        oauth: OAuthClient,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            store,
            oauth,
            clock,
            policy,
        }
    }

    pub async fn authorize(&self, session: &Session) -> Result<CredentialRecord, AppError> {
        let now = self.clock.now();
        if let Some(credential) = &session.credential
            && credential.is_live(now)
        {
            return Ok(credential.clone());
        }
        let Some(user_id) = session.user_id else {
            return Err(AppError::unauthenticated());
        };

        match self.policy {
            RefreshPolicy::FailClosed => {
                info!(target = "lister.guard", %user_id, "no live credential; reconnect required");
                Err(AppError::Authentication(
                    "eBay access expired; reconnect your account".to_string(),
                ))
            }
            RefreshPolicy::Refresh => {
                let Some(stored) = self.store.get_credential(user_id).await? else {
                    return Err(AppError::unauthenticated());
                };
                if stored.is_live(now) {
                    return Ok(stored);
                }
                let Some(refresh_token) = stored.refresh_token.clone() else {
                    return Err(AppError::Authentication(
                        "eBay access expired; reconnect your account".to_string(),
                    ));
                };
                let grant = self.oauth.refresh(&refresh_token).await.inspect_err(|err| {
                    warn!(target = "lister.guard", %user_id, error = %err, "refresh failed");
                })?;
                let scopes = stored
                    .scopes
                    .clone()
                    .unwrap_or_else(|| self.oauth.config().scope_param());
                let mut record = grant.into_record(user_id, now, &scopes, Some(refresh_token));
                record.profile = stored.profile;
                self.store.upsert_credential(&record).await?;
                metrics::credential_event("refreshed");
                info!(target = "lister.guard", %user_id, expires_at = %record.expires_at, "credential refreshed");
                Ok(record)
            }
        }
    }
}
