use super::{
    CachedProfile, CredentialRecord, ListingRecord, SessionRecord, Store, StoreError, UserRecord,
};
use crate::config::Lookup;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::fmt;
use uuid::Uuid;

const SESSIONS: &str = "sessions";
const USERS: &str = "users";
const TOKENS: &str = "ebay_tokens";
const LISTINGS: &str = "ebay_listings";

#[derive(Clone)]
pub struct SupabaseConfig {
    pub base_url: String,
    pub service_key: String,
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &"<redacted>")
            .finish()
    }
}

impl SupabaseConfig {
    pub fn from_lookup(lookup: &Lookup<'_>) -> Option<Self> {
        let base_url = lookup("SUPABASE_URL")?;
        let service_key = lookup("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|| lookup("SUPABASE_SERVICE_KEY"))
            .or_else(|| lookup("SUPABASE_KEY"))?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
        })
    }
}

/// PostgREST-backed store. Each method is one HTTP round trip, so every
/// write is atomic at the database.
#[derive(Clone)]
pub struct SupabaseStore {
    config: SupabaseConfig,
    http: Client,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig, http: Client) -> Self {
        Self { config, http }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.config.base_url, table);
        self.http
            .request(method, url)
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self
            .request(Method::GET, table)
            .query(filters)
            .query(&[("select", "*")])
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Option<T>, StoreError> {
        let mut filters = filters.to_vec();
        filters.push(("limit", "1".to_string()));
        let mut rows = self.select(table, &filters).await?;
        Ok(rows.pop())
    }

    async fn insert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        body: &T,
        on_conflict: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut request = self.request(Method::POST, table).json(body);
        request = match on_conflict {
            Some(column) => request
                .query(&[("on_conflict", column)])
                .header("Prefer", "resolution=merge-duplicates,return=minimal"),
            None => request.header("Prefer", "return=minimal"),
        };
        let response = request
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        filters: &[(&str, String)],
        patch: Value,
    ) -> Result<usize, StoreError> {
        self.mutate(Method::PATCH, table, filters, Some(patch)).await
    }

    async fn delete(&self, table: &str, filters: &[(&str, String)]) -> Result<usize, StoreError> {
        self.mutate(Method::DELETE, table, filters, None).await
    }

    /// Returns the number of affected rows.
    async fn mutate(
        &self,
        method: Method,
        table: &str,
        filters: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<usize, StoreError> {
        let mut request = self
            .request(method, table)
            .query(filters)
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        let response = ensure_success(response).await?;
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        Ok(rows.len())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Request(format!("HTTP {status}: {body}")))
}

fn eq(value: impl fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl Store for SupabaseStore {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        self.insert(SESSIONS, session, None).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.select_one(SESSIONS, &[("id", eq(id))]).await
    }

    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(SESSIONS, &[("id", eq(id))], json!({ "last_seen_at": at }))
            .await
            .map(|_| ())
    }

    async fn link_session_user(&self, id: &str, user_id: Uuid) -> Result<(), StoreError> {
        self.update(SESSIONS, &[("id", eq(id))], json!({ "user_id": user_id }))
            .await
            .map(|_| ())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.delete(SESSIONS, &[("id", eq(id))]).await? > 0)
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        self.delete(SESSIONS, &[("user_id", eq(user_id))]).await
    }

    async fn create_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.insert(USERS, user, None).await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        self.select_one(USERS, &[("id", eq(id))]).await
    }

    async fn find_user_by_ebay_id(
        &self,
        ebay_user_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.select_one(USERS, &[("ebay_user_id", eq(ebay_user_id))])
            .await
    }

    async fn set_ebay_identity(
        &self,
        user_id: Uuid,
        ebay_user_id: &str,
        username: &str,
    ) -> Result<(), StoreError> {
        self.update(
            USERS,
            &[("id", eq(user_id))],
            json!({ "ebay_user_id": ebay_user_id, "ebay_username": username }),
        )
        .await
        .map(|_| ())
    }

    async fn clear_ebay_identity(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.update(
            USERS,
            &[("id", eq(user_id))],
            json!({ "ebay_user_id": null, "ebay_username": null }),
        )
        .await
        .map(|_| ())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.delete(USERS, &[("id", eq(id))]).await? > 0)
    }

    async fn upsert_credential(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.insert(TOKENS, record, Some("user_id")).await
    }

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<CredentialRecord>, StoreError> {
        self.select_one(TOKENS, &[("user_id", eq(user_id))]).await
    }

    async fn delete_credential(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.delete(TOKENS, &[("user_id", eq(user_id))]).await? > 0)
    }

    async fn cache_profile(
        &self,
        user_id: Uuid,
        profile: &CachedProfile,
    ) -> Result<bool, StoreError> {
        let updated = self
            .update(
                TOKENS,
                &[("user_id", eq(user_id))],
                json!({ "profile": profile }),
            )
            .await?;
        Ok(updated > 0)
    }

    async fn record_listing(&self, listing: &ListingRecord) -> Result<(), StoreError> {
        self.insert(LISTINGS, listing, None).await
    }

    async fn list_listings(&self, user_id: Uuid) -> Result<Vec<ListingRecord>, StoreError> {
        self.select(
            LISTINGS,
            &[
                ("user_id", eq(user_id)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn delete_listings_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        self.delete(LISTINGS, &[("user_id", eq(user_id))]).await
    }
}
