//! Durable state behind the service: sessions, users, eBay credentials and
//! listing history. Every handler receives the store as `Arc<dyn Store>`.

pub mod memory;
pub mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    #[serde(default)]
    pub ebay_user_id: Option<String>,
    #[serde(default)]
    pub ebay_username: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ebay_user_id: None,
            ebay_username: None,
            created_at,
        }
    }
}

/// One user's grant against the marketplace. At most one per user; writes
/// replace the whole record, cached profile included.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub user_id: Uuid,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    #[serde(default)]
    pub scopes: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub profile: Option<CachedProfile>,
}

impl CredentialRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scopes", &self.scopes)
            .field("has_profile", &self.profile.is_some())
            .finish()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProfile {
    #[serde(default)]
    pub user_id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub registration_address: Option<ProfileAddress>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAddress {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state_or_province: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sku: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), StoreError>;
    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;
    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn link_session_user(&self, id: &str, user_id: Uuid) -> Result<(), StoreError>;
    async fn delete_session(&self, id: &str) -> Result<bool, StoreError>;
    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<usize, StoreError>;

    async fn create_user(&self, user: &UserRecord) -> Result<(), StoreError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
    async fn find_user_by_ebay_id(&self, ebay_user_id: &str)
    -> Result<Option<UserRecord>, StoreError>;
    async fn set_ebay_identity(
        &self,
        user_id: Uuid,
        ebay_user_id: &str,
        username: &str,
    ) -> Result<(), StoreError>;
    async fn clear_ebay_identity(&self, user_id: Uuid) -> Result<(), StoreError>;
    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Last-writer-wins upsert keyed by `record.user_id`.
    async fn upsert_credential(&self, record: &CredentialRecord) -> Result<(), StoreError>;
    async fn get_credential(&self, user_id: Uuid) -> Result<Option<CredentialRecord>, StoreError>;
    async fn delete_credential(&self, user_id: Uuid) -> Result<bool, StoreError>;
    /// Attaches a profile to an existing credential. Returns `false` when the
    /// user has no credential to attach it to.
    async fn cache_profile(&self, user_id: Uuid, profile: &CachedProfile)
    -> Result<bool, StoreError>;

    async fn record_listing(&self, listing: &ListingRecord) -> Result<(), StoreError>;
    async fn list_listings(&self, user_id: Uuid) -> Result<Vec<ListingRecord>, StoreError>;
    async fn delete_listings_for_user(&self, user_id: Uuid) -> Result<usize, StoreError>;
}
