//! Remote text generation for follow-up questions.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::{LeafdocError, LeafdocResult};

/// Environment variables checked, in order, for the generation API key.
pub const API_KEY_ENV_VARS: [&str; 2] = ["LEAFDOC_API_KEY", "GEMINI_API_KEY"];

/// Default generation model.
pub const DEFAULT_AUGMENTATION_MODEL: &str = "gemini-1.5-flash";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Fixed instruction placed ahead of every context block.
pub const SYSTEM_INSTRUCTION: &str = "You are a crop health assistant helping a farmer understand a plant disease diagnosis made from a photo. \
Answer using the diagnosis context below. If the context does not cover the question, say so and give only general, \
safe agronomic advice. Never invent a disease name that is not in the context. Keep answers short, practical, and in plain language. \
For chemical treatments, remind the farmer to follow the product label and local regulations.";

/// A text-generation backend.
///
/// Implementations report a missing or rejected credential as
/// [`LeafdocError::AugmentationNotConfigured`] and every other failure as
/// [`LeafdocError::AugmentationCallFailed`].
#[async_trait]
pub trait AugmentationAdapter: Send + Sync {
    async fn generate_response(&self, question: &str, context: &str) -> LeafdocResult<String>;
}

/// Resolve the API key: explicit value first, then environment.
pub fn resolve_api_key(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| API_KEY_ENV_VARS.iter().find_map(|var| std::env::var(var).ok()))
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

/// Google Gemini `generateContent` client.
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiAdapter {
    pub fn new(api_key: Option<String>, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.to_string(),
            api_key: api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()),
        }
    }

    /// Point the client at a different host, e.g. a proxy.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl AugmentationAdapter for GeminiAdapter {
    async fn generate_response(&self, question: &str, context: &str) -> LeafdocResult<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            LeafdocError::AugmentationNotConfigured(format!(
                "No API key set. Export {} to enable follow-up questions.",
                API_KEY_ENV_VARS[0]
            ))
        })?;

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": format!("{context}\n\nQuestion: {question}") }]
            }]
        });

        tracing::debug!(model = %self.model, "Sending augmentation request");

        let resp = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| LeafdocError::AugmentationCallFailed(format!("Request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LeafdocError::AugmentationNotConfigured(format!(
                "API key rejected (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(LeafdocError::AugmentationCallFailed(format!(
                "HTTP {}: {snippet}",
                status.as_u16()
            )));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| LeafdocError::AugmentationCallFailed(format!("Invalid response body: {e}")))?;

        extract_text(&value).ok_or_else(|| {
            LeafdocError::AugmentationCallFailed("Response contained no text".to_string())
        })
    }
}

/// Join the text parts of the first candidate in a `generateContent` response.
pub fn extract_text(response: &Value) -> Option<String> {
    let parts = response["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
