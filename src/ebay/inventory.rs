use crate::ebay::gateway::{ApiAuth, Gateway, GatewayError};
use crate::models::ListingDraft;
use serde::Serialize;
use std::collections::BTreeMap;
use urlencoding::encode;

const TITLE_LIMIT: usize = 80;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItemRequest {
    pub availability: InventoryAvailability,
    pub condition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_description: Option<String>,
    pub product: InventoryProduct,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAvailability {
    pub ship_to_location_availability: ShipToLocationAvailability,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipToLocationAvailability {
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryProduct {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aspects: BTreeMap<String, Vec<String>>,
}

/// Maps the free-text condition the model produces to an inventory enum.
pub fn condition_code(condition: &str) -> &'static str {
    let normalized = condition.trim().to_ascii_lowercase();
    if normalized == "new" || normalized.starts_with("new ") {
        "NEW"
    } else if normalized.contains("parts") || normalized.contains("not working") {
        "FOR_PARTS_OR_NOT_WORKING"
    } else if normalized.contains("excellent") {
        "USED_EXCELLENT"
    } else if normalized.contains("fair") || normalized.contains("acceptable") {
        "USED_ACCEPTABLE"
    } else {
        "USED_GOOD"
    }
}

pub fn inventory_item_from_draft(draft: &ListingDraft) -> InventoryItemRequest {
    let mut aspects: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for specific in &draft.item_specifics {
        let name = specific.name.trim();
        let value = specific.value.trim();
        if name.is_empty() || value.is_empty() {
            continue;
        }
        aspects
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }
    InventoryItemRequest {
        availability: InventoryAvailability {
            ship_to_location_availability: ShipToLocationAvailability { quantity: 1 },
        },
        condition: condition_code(&draft.condition),
        condition_description: Some(draft.condition.trim().to_string())
            .filter(|text| !text.is_empty()),
        product: InventoryProduct {
            title: draft.title.chars().take(TITLE_LIMIT).collect(),
            description: draft.description.clone(),
            aspects,
        },
    }
}

pub async fn upsert_inventory_item(
    gateway: &Gateway,
    api_root: &str,
    sku: &str,
    payload: &InventoryItemRequest,
    access_token: &str,
) -> Result<(), GatewayError> {
    let url = format!("{api_root}/sell/inventory/v1/inventory_item/{}", encode(sku));
    let request = gateway
        .http()
        .put(url)
        .header("Content-Language", "en-US")
        .json(payload);
    gateway
        .send_empty("inventory.upsert_item", request, ApiAuth::Bearer(access_token))
        .await
}
