pub mod gemini;

pub use gemini::GeminiClient;

use crate::config::Lookup;
use crate::ebay::gateway::GatewayError;
use crate::models::{ImagePart, ListingDraft};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl LlmConfig {
    pub fn from_lookup(lookup: &Lookup<'_>) -> Self {
        Self {
            api_key: lookup("GEMINI_API_KEY").or_else(|| lookup("API_KEY")),
            model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: lookup("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("GEMINI_API_KEY is not configured")]
    MissingApiKey,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("invalid model output: {0}")]
    InvalidResponse(String),
}

/// Drafts a listing from product photos.
#[async_trait]
pub trait ListingGenerator: Send + Sync {
    async fn generate(
        &self,
        images: &[ImagePart],
        personal_note: Option<&str>,
    ) -> Result<ListingDraft, LlmError>;
}

pub(crate) fn build_prompt(personal_note: Option<&str>) -> String {
    let mut prompt = String::from(
        "Analyze the provided product image(s) and draft an eBay listing.\n\
         Respond with a single JSON object using exactly these keys:\n\
         {\"title\": string (80 characters max, brand, model, key features),\n\
          \"description\": string (features, visible condition notes, what is included),\n\
          \"category\": [string] (eBay category breadcrumb),\n\
          \"condition\": one of \"New\", \"Used - Excellent\", \"Used - Good\", \"Used - Fair\", \"For Parts/Not Working\",\n\
          \"price\": string (USD),\n\
          \"shippingCost\": string,\n\
          \"itemLocation\": string,\n\
          \"keywords\": [string] (10-15 search keywords),\n\
          \"itemSpecifics\": [{\"name\": string, \"value\": string}]}\n",
    );
    if let Some(note) = personal_note.map(str::trim).filter(|note| !note.is_empty()) {
        prompt.push_str("Seller notes to take into account: ");
        prompt.push_str(note);
        prompt.push('\n');
    }
    prompt
}

/// Takes the outermost `{...}` span from model text (models often wrap the
/// object in prose or code fences) and validates it.
pub fn parse_listing(text: &str) -> Result<ListingDraft, LlmError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(LlmError::InvalidResponse("no JSON object in model output".into()));
    };
    if end < start {
        return Err(LlmError::InvalidResponse("no JSON object in model output".into()));
    }
    let draft: ListingDraft = serde_json::from_str(&text[start..=end])
        .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
    draft.validate().map_err(LlmError::InvalidResponse)?;
    Ok(draft)
}
