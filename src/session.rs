//! Cookie-bound sessions. Every `/api` request passes through
//! [`attach_session`], which resolves (or creates) the session, hydrates any
//! live credential, and re-issues the cookie so its expiry slides.

use crate::clock::Clock;
use crate::config::{ConfigError, SessionConfig};
use crate::error::AppError;
use crate::store::{CredentialRecord, SessionRecord, Store, StoreError};
use axum::{
    extract::{FromRef, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{
    SignedCookieJar,
    cookie::{Cookie, Key, SameSite},
};
use chrono::Duration;
use sha2::{Digest, Sha512};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// The session attached to a request. `credential` is only present while
/// the stored access token is unexpired.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: Option<Uuid>,
    pub credential: Option<CredentialRecord>,
}

/// Response marker: the handler destroyed the session, so the cookie is
/// cleared instead of refreshed.
#[derive(Debug, Clone, Copy)]
pub struct SessionEnded;

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    key: Key,
    cookie_name: String,
    ttl: Duration,
    secure: bool,
}

impl FromRef<SessionManager> for Key {
    fn from_ref(manager: &SessionManager) -> Self {
        manager.key.clone()
    }
}

impl SessionManager {
    pub fn new(
        config: &SessionConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        if config.secret.len() < 32 {
            return Err(ConfigError::Invalid {
                name: "SESSION_SECRET",
                reason: "must be at least 32 bytes".to_string(),
            });
        }
        let digest = Sha512::digest(config.secret.as_bytes());
        Ok(Self {
            store,
            clock,
            key: Key::from(digest.as_slice()),
            cookie_name: config.cookie_name.clone(),
            ttl: Duration::days(config.ttl_days),
            secure: config.secure,
        })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub async fn resolve(&self, jar: &SignedCookieJar) -> Result<Session, StoreError> {
        let now = self.clock.now();
        if let Some(cookie) = jar.get(&self.cookie_name)
            && let Some(record) = self.store.get_session(cookie.value()).await?
        {
            if record.last_seen_at + self.ttl > now {
                self.store.touch_session(&record.id, now).await?;
                let credential = match record.user_id {
                    Some(user_id) => self
                        .store
                        .get_credential(user_id)
                        .await?
                        .filter(|credential| credential.is_live(now)),
                    None => None,
                };
                return Ok(Session {
                    id: record.id,
                    user_id: record.user_id,
                    credential,
                });
            }
            debug!(target = "lister.session", session_id = %record.id, "session idle past ttl");
            self.store.delete_session(&record.id).await?;
        }

        let record = SessionRecord {
            id: new_session_id(),
            user_id: None,
            created_at: now,
            last_seen_at: now,
        };
        self.store.create_session(&record).await?;
        info!(target = "lister.session", session_id = %record.id, "session created");
        Ok(Session {
            id: record.id,
            user_id: None,
            credential: None,
        })
    }

    pub fn cookie(&self, session_id: &str) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), session_id.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::days(self.ttl.num_days()))
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), ""))
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}

fn new_session_id() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

pub async fn attach_session(
    State(manager): State<SessionManager>,
    jar: SignedCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session = match manager.resolve(&jar).await {
        Ok(session) => session,
        Err(err) => return AppError::from(err).into_response(),
    };
    let session_id = session.id.clone();
    request.extensions_mut().insert(session);

    let response = next.run(request).await;
    let jar = if response.extensions().get::<SessionEnded>().is_some() {
        jar.remove(manager.removal_cookie())
    } else {
        jar.add(manager.cookie(&session_id))
    };
    (jar, response).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use axum::http::{HeaderMap, HeaderValue, header::COOKIE};
    use chrono::Utc;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn manager() -> (SessionManager, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = SessionConfig {
            secret: SECRET.to_string(),
            cookie_name: "sid".to_string(),
            ttl_days: 7,
            secure: false,
        };
        let manager = SessionManager::new(&config, store.clone(), clock.clone()).unwrap();
        (manager, store, clock)
    }

    fn jar_with(manager: &SessionManager, session_id: &str) -> SignedCookieJar {
        SignedCookieJar::new(manager.key().clone()).add(manager.cookie(session_id))
    }

    fn credential(user_id: Uuid, expires_in: Duration) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            user_id,
            access_token: "t1".into(),
            refresh_token: None,
            expires_at: now + expires_in,
            token_type: "User Access Token".into(),
            scopes: None,
            updated_at: now,
            profile: None,
        }
    }

    #[test]
    fn short_secret_is_rejected() {
        let config = SessionConfig {
            secret: "short".to_string(),
            cookie_name: "sid".to_string(),
            ttl_days: 7,
            secure: false,
        };
        let result = SessionManager::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(crate::clock::SystemClock),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn first_contact_creates_a_session() {
        let (manager, store, _) = manager();
        let jar = SignedCookieJar::new(manager.key().clone());
        let session = manager.resolve(&jar).await.unwrap();
        assert_eq!(session.id.len(), 64);
        assert!(session.user_id.is_none());
        assert_eq!(store.row_counts().await.sessions, 1);
    }

    #[tokio::test]
    async fn signed_cookie_resolves_the_same_session() {
        let (manager, store, _) = manager();
        let first = manager
            .resolve(&SignedCookieJar::new(manager.key().clone()))
            .await
            .unwrap();
        let again = manager.resolve(&jar_with(&manager, &first.id)).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(store.row_counts().await.sessions, 1);
    }

    #[tokio::test]
    async fn unsigned_cookie_is_ignored() {
        let (manager, store, _) = manager();
        let first = manager
            .resolve(&SignedCookieJar::new(manager.key().clone()))
            .await
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("sid={}", first.id)).unwrap(),
        );
        let forged = SignedCookieJar::from_headers(&headers, manager.key().clone());
        let session = manager.resolve(&forged).await.unwrap();
        assert_ne!(session.id, first.id);
        assert_eq!(store.row_counts().await.sessions, 2);
    }

    #[tokio::test]
    async fn only_live_credentials_are_hydrated() {
        let (manager, store, clock) = manager();
        let session = manager
            .resolve(&SignedCookieJar::new(manager.key().clone()))
            .await
            .unwrap();
        let user_id = Uuid::new_v4();
        store.link_session_user(&session.id, user_id).await.unwrap();
        store
            .upsert_credential(&credential(user_id, Duration::minutes(30)))
            .await
            .unwrap();

        let jar = jar_with(&manager, &session.id);
        let hydrated = manager.resolve(&jar).await.unwrap();
        assert_eq!(hydrated.user_id, Some(user_id));
        assert!(hydrated.credential.is_some());

        clock.advance(Duration::hours(1));
        let stale = manager.resolve(&jar).await.unwrap();
        assert_eq!(stale.id, session.id);
        assert!(stale.credential.is_none());
    }

    #[tokio::test]
    async fn idle_sessions_expire_after_ttl() {
        let (manager, store, clock) = manager();
        let session = manager
            .resolve(&SignedCookieJar::new(manager.key().clone()))
            .await
            .unwrap();
        let jar = jar_with(&manager, &session.id);

        clock.advance(Duration::days(6));
        assert_eq!(manager.resolve(&jar).await.unwrap().id, session.id);

        clock.advance(Duration::days(8));
        let fresh = manager.resolve(&jar).await.unwrap();
        assert_ne!(fresh.id, session.id);
        assert!(store.get_session(&session.id).await.unwrap().is_none());
    }
}
