use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{OneOrMany, formats::PreferMany, serde_as, skip_serializing_none};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpecific {
    pub name: String,
    pub value: String,
}

/// A listing as drafted by the model or edited by the user. `category`
/// accepts a single string or a breadcrumb array.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub shipping_cost: Option<String>,
    #[serde(default)]
    pub item_location: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub item_specifics: Vec<ItemSpecific>,
}

impl ListingDraft {
    /// Names the first required field that is empty.
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("title", self.title.as_str()),
            ("description", self.description.as_str()),
            ("condition", self.condition.as_str()),
            ("price", self.price.as_str()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(format!("missing {name}"));
        }
        if self.category.iter().all(|c| c.trim().is_empty()) {
            return Err("missing category".to_string());
        }
        Ok(())
    }

    /// Parses the leading amount of strings like `$24.99` or `20-30 USD`.
    pub fn price_amount(&self) -> Option<f64> {
        let digits: String = self
            .price
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        digits.parse().ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePart {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateListingRequest {
    #[serde(default)]
    pub image_parts: Vec<ImagePart>,
    #[serde(default)]
    pub personal_note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListingRequest {
    #[serde(flatten)]
    pub draft: ListingDraft,
    #[serde(default)]
    pub sku: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListingResponse {
    pub success: bool,
    pub sku: String,
    pub listing_url: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionResponse {
    pub success: bool,
    pub message: &'static str,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(rename = "upstreamStatus", skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            error: error.into(),
            detail,
            upstream_status: None,
        }
    }
}
