use super::{
    CachedProfile, CredentialRecord, ListingRecord, SessionRecord, Store, StoreError, UserRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local store for development and tests. State is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, SessionRecord>,
    users: HashMap<Uuid, UserRecord>,
    credentials: HashMap<Uuid, CredentialRecord>,
    listings: Vec<ListingRecord>,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCounts {
    pub sessions: usize,
    pub users: usize,
    pub credentials: usize,
    pub listings: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn row_counts(&self) -> RowCounts {
        let tables = self.tables.read().await;
        RowCounts {
            sessions: tables.sessions.len(),
            users: tables.users.len(),
            credentials: tables.credentials.len(),
            listings: tables.listings.len(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(session) = self.tables.write().await.sessions.get_mut(id) {
            session.last_seen_at = at;
        }
        Ok(())
    }

    async fn link_session_user(&self, id: &str, user_id: Uuid) -> Result<(), StoreError> {
        if let Some(session) = self.tables.write().await.sessions.get_mut(id) {
            session.user_id = Some(user_id);
        }
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.sessions.remove(id).is_some())
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables
            .sessions
            .retain(|_, session| session.user_id != Some(user_id));
        Ok(before - tables.sessions.len())
    }

    async fn create_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.tables.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_ebay_id(
        &self,
        ebay_user_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.ebay_user_id.as_deref() == Some(ebay_user_id))
            .cloned())
    }

    async fn set_ebay_identity(
        &self,
        user_id: Uuid,
        ebay_user_id: &str,
        username: &str,
    ) -> Result<(), StoreError> {
        if let Some(user) = self.tables.write().await.users.get_mut(&user_id) {
            user.ebay_user_id = Some(ebay_user_id.to_string());
            user.ebay_username = Some(username.to_string());
        }
        Ok(())
    }

    async fn clear_ebay_identity(&self, user_id: Uuid) -> Result<(), StoreError> {
        if let Some(user) = self.tables.write().await.users.get_mut(&user_id) {
            user.ebay_user_id = None;
            user.ebay_username = None;
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.users.remove(&id).is_some())
    }

    async fn upsert_credential(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .credentials
            .insert(record.user_id, record.clone());
        Ok(())
    }

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.tables.read().await.credentials.get(&user_id).cloned())
    }

    async fn delete_credential(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .credentials
            .remove(&user_id)
            .is_some())
    }

    async fn cache_profile(
        &self,
        user_id: Uuid,
        profile: &CachedProfile,
    ) -> Result<bool, StoreError> {
        match self.tables.write().await.credentials.get_mut(&user_id) {
            Some(record) => {
                record.profile = Some(profile.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_listing(&self, listing: &ListingRecord) -> Result<(), StoreError> {
        self.tables.write().await.listings.push(listing.clone());
        Ok(())
    }

    async fn list_listings(&self, user_id: Uuid) -> Result<Vec<ListingRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .listings
            .iter()
            .filter(|listing| listing.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_listings_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.listings.len();
        tables.listings.retain(|listing| listing.user_id != user_id);
        Ok(before - tables.listings.len())
    }
}
