use crate::core::config::Config;
use crate::core::model::to_data_uri;
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Failure taxonomy at the service-call boundary. The retry wrapper keys off
/// `is_transient`; everything else propagates on the first attempt.
#[derive(Debug, thiserror::Error)]
pub enum GenAiError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service overloaded: {0}")]
    Overloaded(String),

    /// Distinguished terminal error produced when retries are exhausted.
    #[error("API busy or quota exceeded. Please try again later.")]
    Busy,

    #[error("request blocked: {reason}")]
    Blocked { reason: String },

    #[error("empty response from model")]
    EmptyResponse,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GenAiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenAiError::RateLimited(_) | GenAiError::Overloaded(_))
    }
}

/// Classify a failed call from the HTTP status and the service's own status
/// string, so callers never pattern-match on message text.
fn classify(http_status: u16, api_status: Option<&str>, message: String) -> GenAiError {
    match (http_status, api_status) {
        (429, _) | (_, Some("RESOURCE_EXHAUSTED")) => GenAiError::RateLimited(message),
        (503, _) | (_, Some("UNAVAILABLE")) => GenAiError::Overloaded(message),
        _ => GenAiError::Api {
            status: http_status,
            message,
        },
    }
}

// --- Requests ---

pub struct TextRequest {
    pub system: String,
    pub prompt: String,
    /// Strict response schema the service must follow; output is JSON text.
    pub schema: serde_json::Value,
}

pub struct ReferenceImage {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

pub struct ImageRequest {
    pub prompt: String,
    /// Inline reference images, passed before the text part to bias the
    /// generated panel toward visual consistency.
    pub references: Vec<ReferenceImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn to_data_uri(&self) -> String {
        to_data_uri(&self.mime_type, &self.data)
    }
}

#[async_trait]
pub trait GenAiClient: Send + Sync + Debug {
    async fn generate_json(&self, request: TextRequest) -> Result<String, GenAiError>;
    async fn generate_image(&self, request: ImageRequest) -> Result<ImagePayload, GenAiError>;
}

pub fn create_client(config: &Config) -> Result<Arc<dyn GenAiClient>> {
    let cfg = &config.gemini;
    if cfg.api_key.trim().is_empty() {
        anyhow::bail!("gemini api_key is empty");
    }
    Ok(Arc::new(GeminiClient::new(
        &cfg.api_key,
        &cfg.text_model,
        &cfg.image_model,
    )))
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    text_model: String,
    image_model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, text_model: &str, image_model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            text_model: text_model.to_string(),
            image_model: image_model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn generate(
        &self,
        model: &str,
        request: &GeminiRequest,
    ) -> Result<GeminiResponse, GenAiError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            model, self.api_key
        );

        let resp = self.client.post(&url).json(request).send().await?;
        let http_status = resp.status().as_u16();
        let body = resp.text().await?;

        if !(200..300).contains(&http_status) {
            let (message, api_status) = match serde_json::from_str::<GeminiErrorEnvelope>(&body) {
                Ok(envelope) => (envelope.error.message, envelope.error.status),
                Err(_) => (body, None),
            };
            return Err(classify(http_status, api_status.as_deref(), message));
        }

        let result: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| GenAiError::Malformed(format!("{}. Body: {}", e, body)))?;

        if let Some(err) = result.error {
            return Err(classify(http_status, err.status.as_deref(), err.message));
        }

        Ok(result)
    }
}

#[async_trait]
impl GenAiClient for GeminiClient {
    async fn generate_json(&self, request: TextRequest) -> Result<String, GenAiError> {
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::text(request.prompt)],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart::text(request.system)],
            }),
            safety_settings: relaxed_safety_settings(),
            generation_config: Some(GeminiGenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(request.schema),
                response_modalities: None,
            }),
        };

        let response = self.generate(&self.text_model, &body).await?;
        extract_text(&response)
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImagePayload, GenAiError> {
        let mut parts: Vec<GeminiPart> = request
            .references
            .iter()
            .map(|r| GeminiPart::inline(&r.mime_type, &r.data))
            .collect();
        parts.push(GeminiPart::text(request.prompt));

        let body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            system_instruction: None,
            safety_settings: relaxed_safety_settings(),
            generation_config: Some(GeminiGenerationConfig {
                response_mime_type: None,
                response_schema: None,
                response_modalities: Some(vec!["IMAGE".to_string()]),
            }),
        };

        let response = self.generate(&self.image_model, &body).await?;
        extract_image(&response)
    }
}

fn extract_text(response: &GeminiResponse) -> Result<String, GenAiError> {
    let Some(first) = response.candidates.as_ref().and_then(|c| c.first()) else {
        return Err(GenAiError::EmptyResponse);
    };

    if let Some(content) = &first.content {
        if let Some(text) = content.parts.iter().find_map(|p| p.text.as_ref()) {
            return Ok(text.clone());
        }
    }

    match first.finish_reason.as_deref() {
        Some("STOP") | None => Err(GenAiError::EmptyResponse),
        Some(reason) => Err(GenAiError::Blocked {
            reason: reason.to_string(),
        }),
    }
}

fn extract_image(response: &GeminiResponse) -> Result<ImagePayload, GenAiError> {
    let Some(first) = response.candidates.as_ref().and_then(|c| c.first()) else {
        return Err(GenAiError::EmptyResponse);
    };

    if let Some(content) = &first.content {
        if let Some(inline) = content.parts.iter().find_map(|p| p.inline_data.as_ref()) {
            let data = general_purpose::STANDARD
                .decode(&inline.data)
                .map_err(|e| GenAiError::Malformed(format!("bad image payload: {}", e)))?;
            let mime_type = inline
                .mime_type
                .clone()
                .unwrap_or_else(|| "image/png".to_string());
            return Ok(ImagePayload { mime_type, data });
        }
    }

    match first.finish_reason.as_deref() {
        Some("STOP") | None => Err(GenAiError::EmptyResponse),
        Some(reason) => Err(GenAiError::Blocked {
            reason: reason.to_string(),
        }),
    }
}

/// Relaxed thresholds so valid storytelling is not over-blocked.
fn relaxed_safety_settings() -> Vec<GeminiSafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .iter()
    .map(|category| GeminiSafetySetting {
        category: category.to_string(),
        threshold: "BLOCK_ONLY_HIGH".to_string(),
    })
    .collect()
}

// --- Wire shapes ---

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<GeminiSafetySetting>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn inline(mime_type: &str, data: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(GeminiInlineData {
                mime_type: mime_type.to_string(),
                data: general_purpose::STANDARD.encode(data),
            }),
        }
    }
}

#[derive(Serialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GeminiSafetySetting {
    category: String,
    threshold: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(rename = "responseModalities", skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiApiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<GeminiInlineDataResponse>,
}

#[derive(Deserialize)]
struct GeminiInlineDataResponse {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorEnvelope {
    error: GeminiApiError,
}

#[derive(Deserialize, Debug)]
struct GeminiApiError {
    message: String,
    status: Option<String>,
}
