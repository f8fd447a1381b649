use crate::clock::Clock;
use crate::ebay::{Gateway, OAuthClient, identity};
use crate::error::AppError;
use crate::metrics;
use crate::session::Session;
use crate::store::{CachedProfile, CredentialRecord, Store, UserRecord};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Authorization-code flow: builds the consent URL and turns the callback
/// code into a stored credential bound to a local user.
#[derive(Clone)]
pub struct OAuthFlow {
    store: Arc<dyn Store>,
    oauth: OAuthClient,
    gateway: Gateway,
    clock: Arc<dyn Clock>,
}

impl OAuthFlow {
    pub fn new(
        store: Arc<dyn Store>,
        oauth: OAuthClient,
        gateway: Gateway,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            oauth,
            gateway,
            clock,
        }
    }

    pub fn authorization_url(&self, prompt_login: bool) -> Result<String, AppError> {
        Ok(self.oauth.authorization_url(prompt_login)?)
    }

    /// Exchanges `code`, resolves the local user, and upserts the credential.
    /// The exchange happens before any local write, so a rejected code
    /// leaves the store untouched.
    pub async fn complete(&self, session: &Session, code: &str) -> Result<CredentialRecord, AppError> {
        let grant = self.oauth.exchange_code(code).await?;
        let now = self.clock.now();

        let profile = match identity::fetch_profile(
            &self.gateway,
            &self.oauth.config().identity_root,
            grant.access_token(),
        )
        .await
        {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!(target = "lister.oauth", session_id = %session.id, error = %err, "profile lookup after exchange failed");
                None
            }
        };

        let user_id = self.resolve_user(session, profile.as_ref()).await?;
        let record = grant.into_record(user_id, now, &self.oauth.config().scope_param(), None);
        self.store.upsert_credential(&record).await?;
        metrics::credential_event("exchanged");
        info!(
            target = "lister.oauth",
            session_id = %session.id,
            %user_id,
            expires_at = %record.expires_at,
            "ebay account connected"
        );

        if let Some(profile) = profile {
            self.remember_profile(user_id, &profile).await?;
        }
        Ok(record)
    }

    /// Returns the cached profile, fetching and caching it on a miss.
    pub async fn profile(&self, credential: &CredentialRecord) -> Result<CachedProfile, AppError> {
        if let Some(profile) = &credential.profile {
            return Ok(profile.clone());
        }
        let profile = identity::fetch_profile(
            &self.gateway,
            &self.oauth.config().identity_root,
            &credential.access_token,
        )
        .await?;
        self.remember_profile(credential.user_id, &profile).await?;
        Ok(profile)
    }

    async fn remember_profile(&self, user_id: Uuid, profile: &CachedProfile) -> Result<(), AppError> {
        self.store.cache_profile(user_id, profile).await?;
        if let Some(ebay_user_id) = profile.user_id.as_deref() {
            self.claim_ebay_identity(user_id, ebay_user_id, &profile.username)
                .await?;
        }
        Ok(())
    }

    /// Binds the eBay account to `user_id`. Any other local user still bound
    /// to it loses the binding and its credential, so a marketplace notice
    /// for the account resolves to exactly one user.
    async fn claim_ebay_identity(
        &self,
        user_id: Uuid,
        ebay_user_id: &str,
        username: &str,
    ) -> Result<(), AppError> {
        if let Some(holder) = self.store.find_user_by_ebay_id(ebay_user_id).await?
            && holder.id != user_id
        {
            self.store.delete_credential(holder.id).await?;
            self.store.clear_ebay_identity(holder.id).await?;
            warn!(
                target = "lister.oauth",
                from = %holder.id,
                to = %user_id,
                ebay_user_id,
                "ebay account moved between local users"
            );
        }
        self.store
            .set_ebay_identity(user_id, ebay_user_id, username)
            .await?;
        Ok(())
    }

    /// Reuses the user already linked to the returned eBay account, otherwise
    /// keeps the session's user when it still exists, otherwise creates one.
    async fn resolve_user(
        &self,
        session: &Session,
        profile: Option<&CachedProfile>,
    ) -> Result<Uuid, AppError> {
        let linked = match profile.and_then(|p| p.user_id.as_deref()) {
            Some(ebay_user_id) => self.store.find_user_by_ebay_id(ebay_user_id).await?,
            None => None,
        };
        let current = match session.user_id {
            Some(user_id) => self.store.get_user(user_id).await?,
            None => None,
        };
        let user_id = match (linked, current) {
            (Some(linked), current) => {
                if let Some(current) = current
                    && current.id != linked.id
                {
                    info!(
                        target = "lister.oauth",
                        session_id = %session.id,
                        from = %current.id,
                        to = %linked.id,
                        "session switched to the user owning this ebay account"
                    );
                }
                linked.id
            }
            (None, Some(current)) => current.id,
            (None, None) => {
                let user = UserRecord::new(self.clock.now());
                self.store.create_user(&user).await?;
                user.id
            }
        };
        if session.user_id != Some(user_id) {
            self.store.link_session_user(&session.id, user_id).await?;
        }
        Ok(user_id)
    }
}
