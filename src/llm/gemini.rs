use super::{LlmConfig, LlmError, ListingGenerator, build_prompt, parse_listing};
use crate::ebay::gateway::{ApiAuth, Gateway};
use crate::models::{ImagePart, ListingDraft};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct GeminiClient {
    gateway: Gateway,
    config: LlmConfig,
}

impl GeminiClient {
    pub fn new(gateway: Gateway, config: LlmConfig) -> Self {
        Self { gateway, config }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: String },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        Some(text).filter(|t| !t.trim().is_empty())
    }
}

#[async_trait]
impl ListingGenerator for GeminiClient {
    async fn generate(
        &self,
        images: &[ImagePart],
        personal_note: Option<&str>,
    ) -> Result<ListingDraft, LlmError> {
        let api_key = self.config.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;

        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(Part::Text {
            text: build_prompt(personal_note),
        });
        parts.extend(images.iter().map(|image| Part::Inline {
            inline_data: InlineData {
                mime_type: &image.mime_type,
                data: &image.data,
            },
        }));
        let body = GenerateRequest {
            contents: [Content { role: "user", parts }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let request = self.gateway.http().post(url).json(&body);
        let response: GenerateResponse = self
            .gateway
            .send_json(
                "gemini.generate",
                request,
                ApiAuth::Header {
                    name: "x-goog-api-key",
                    value: api_key,
                },
            )
            .await?;

        let text = response
            .text()
            .ok_or_else(|| LlmError::InvalidResponse("model returned no text".into()))?;
        debug!(target = "lister.llm", chars = text.len(), "model output received");
        parse_listing(&text)
    }
}
