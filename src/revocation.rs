use crate::clock::Clock;
use crate::ebay::OAuthClient;
use crate::error::AppError;
use crate::metrics;
use crate::session::Session;
use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const ACCOUNT_DELETION: &str = "MARKETPLACE_ACCOUNT_DELETION";
pub const AUTHORIZATION_REVOKED: &str = "AUTHORIZATION_REVOKED";

/// Hex SHA-256 of `challenge + verification token + endpoint URL`.
pub fn challenge_response(challenge_code: &str, verification_token: &str, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_code.as_bytes());
    hasher.update(verification_token.as_bytes());
    hasher.update(endpoint.as_bytes());
    hex::encode(hasher.finalize())
}

/// Inbound notification. Accepts the flat shape and the
/// `metadata.topic` / `notification.data.userId` envelope.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    notification_event_type: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    metadata: Option<NotificationMetadata>,
    #[serde(default)]
    notification: Option<NotificationBody>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationMetadata {
    #[serde(default)]
    topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationBody {
    #[serde(default)]
    data: Option<NotificationData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationData {
    #[serde(default)]
    user_id: Option<String>,
}

impl Notification {
    pub fn event_type(&self) -> Option<&str> {
        self.notification_event_type
            .as_deref()
            .or_else(|| self.metadata.as_ref()?.topic.as_deref())
    }

    pub fn ebay_user_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or_else(|| self.notification.as_ref()?.data.as_ref()?.user_id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted {
        user_id: Uuid,
        deleted_at: DateTime<Utc>,
        listings_removed: usize,
    },
    AlreadyDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    AccountDeleted,
    CredentialsRevoked,
    UnknownUser,
    Ignored,
}

#[derive(Clone)]
pub struct RevocationHandler {
    store: Arc<dyn Store>,
    oauth: OAuthClient,
    clock: Arc<dyn Clock>,
}

impl RevocationHandler {
    pub fn new(store: Arc<dyn Store>, oauth: OAuthClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            oauth,
            clock,
        }
    }

    /// Clears the local credential (and with it the cached profile) before
    /// attempting provider-side revocation, whose failure is only logged.
    pub async fn disconnect(&self, session: &Session) -> Result<(), AppError> {
        let Some(user_id) = session.user_id else {
            return Ok(());
        };
        let previous = self.store.get_credential(user_id).await?;
        self.store.delete_credential(user_id).await?;
        metrics::credential_event("disconnected");
        info!(target = "lister.revocation", %user_id, "ebay credential cleared");

        if let Some(token) = previous.and_then(|record| record.refresh_token) {
            match self.oauth.revoke(&token).await {
                Ok(true) => info!(target = "lister.revocation", %user_id, "provider token revoked"),
                Ok(false) => {}
                Err(err) => warn!(
                    target = "lister.revocation",
                    %user_id,
                    error = %err,
                    "provider revocation failed; local credential already cleared"
                ),
            }
        }
        Ok(())
    }

    pub async fn delete_account(&self, session: &Session) -> Result<DeletionOutcome, AppError> {
        let Some(user_id) = session.user_id else {
            return Ok(DeletionOutcome::AlreadyDeleted);
        };
        match self.cascade(user_id).await? {
            Some(listings_removed) => {
                let deleted_at = self.clock.now();
                info!(
                    target = "lister.revocation",
                    %user_id,
                    listings_removed,
                    %deleted_at,
                    "account deleted at user request"
                );
                Ok(DeletionOutcome::Deleted {
                    user_id,
                    deleted_at,
                    listings_removed,
                })
            }
            None => Ok(DeletionOutcome::AlreadyDeleted),
        }
    }

    pub async fn handle_notification(
        &self,
        notification: &Notification,
    ) -> Result<NotificationOutcome, AppError> {
        let Some(event) = notification.event_type() else {
            warn!(target = "lister.webhook", "notification without event type");
            return Ok(NotificationOutcome::Ignored);
        };
        if event != ACCOUNT_DELETION && event != AUTHORIZATION_REVOKED {
            info!(target = "lister.webhook", event, "ignoring notification type");
            return Ok(NotificationOutcome::Ignored);
        }
        let Some(ebay_user_id) = notification.ebay_user_id() else {
            warn!(target = "lister.webhook", event, "notification without user id");
            return Ok(NotificationOutcome::Ignored);
        };
        let Some(user) = self.store.find_user_by_ebay_id(ebay_user_id).await? else {
            info!(target = "lister.webhook", event, ebay_user_id, "no local user for notification");
            return Ok(NotificationOutcome::UnknownUser);
        };

        if event == ACCOUNT_DELETION {
            self.cascade(user.id).await?;
            info!(target = "lister.webhook", user_id = %user.id, "account deleted by marketplace notice");
            Ok(NotificationOutcome::AccountDeleted)
        } else {
            self.store.delete_credential(user.id).await?;
            metrics::credential_event("revoked");
            info!(target = "lister.webhook", user_id = %user.id, "credential removed after revocation notice");
            Ok(NotificationOutcome::CredentialsRevoked)
        }
    }

    /// Removes dependents before the user row. Returns `None` when the user
    /// was already gone.
    async fn cascade(&self, user_id: Uuid) -> Result<Option<usize>, StoreError> {
        if self.store.get_user(user_id).await?.is_none() {
            return Ok(None);
        }
        let listings_removed = self.store.delete_listings_for_user(user_id).await?;
        self.store.delete_credential(user_id).await?;
        self.store.delete_sessions_for_user(user_id).await?;
        let removed = self.store.delete_user(user_id).await?;
        Ok(removed.then_some(listings_removed))
    }
}
