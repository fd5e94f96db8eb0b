//! Google Gemini `generateContent` client

use super::{GenerationError, GenerationErrorKind};
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Base64 image payload returned inline by the image model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64, as received
    pub data: String,
}

impl InlineImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Thin client over the REST API
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Single-turn text completion
    pub async fn generate_text(&self, model: &str, prompt: &str) -> Result<String, GenerationError> {
        let response = self.generate(model, GeminiRequest::text(prompt, None)).await?;
        response_text(response)
    }

    /// Text completion constrained to a JSON response
    pub async fn generate_json(&self, model: &str, prompt: &str) -> Result<String, GenerationError> {
        let request = GeminiRequest::text(prompt, Some("application/json"));
        let response = self.generate(model, request).await?;
        response_text(response)
    }

    /// Image generation. `Ok(None)` when the model answered without an image part.
    pub async fn generate_image(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<Option<InlineImage>, GenerationError> {
        let response = self.generate(model, GeminiRequest::image(prompt)).await?;
        first_inline_image(response)
    }

    async fn generate(
        &self,
        model: &str,
        request: GeminiRequest,
    ) -> Result<GeminiResponse, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.api_base, model);
        let start = Instant::now();

        let result = self.send(&url, &request).await;

        let duration = start.elapsed();
        match &result {
            Ok(_) => tracing::info!(
                model = %model,
                duration_ms = %duration.as_millis(),
                "Gemini request completed"
            ),
            Err(e) => tracing::error!(
                model = %model,
                duration_ms = %duration.as_millis(),
                kind = %e.kind,
                error = %e.message,
                "Gemini request failed"
            ),
        }
        result
    }

    async fn send(&self, url: &str, request: &GeminiRequest) -> Result<GeminiResponse, GenerationError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::timeout(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    GenerationError::network(format!("Connection failed: {e}"))
                } else {
                    GenerationError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            GenerationError::malformed(format!("Failed to parse response: {e} - body: {body}"))
        })
    }
}

/// Map a non-success HTTP status to an error
fn classify_status(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<GeminiErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message);

    match status {
        400 => GenerationError::invalid_request(format!("Invalid request: {message}")),
        401 | 403 => GenerationError::auth(format!("Authentication failed: {message}")),
        408 | 504 => GenerationError::timeout(format!("HTTP {status}: {message}")),
        429 => GenerationError::rate_limit(format!("Rate limit exceeded: {message}")),
        500..=599 => GenerationError::server_error(format!("Server error: {message}")),
        _ => GenerationError::unknown(format!("HTTP {status}: {message}")),
    }
}

fn first_candidate(response: GeminiResponse) -> Result<GeminiCandidate, GenerationError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::invalid_request(format!("Prompt blocked: {reason}")));
    }
    response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::malformed("No candidates in response"))
}

fn response_text(response: GeminiResponse) -> Result<String, GenerationError> {
    let candidate = first_candidate(response)?;
    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| match part {
            GeminiPart::Text { text } => Some(text),
            GeminiPart::InlineData { .. } | GeminiPart::Other(_) => None,
        })
        .collect();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(GenerationError::malformed(format!(
            "Empty response (finish reason: {reason})"
        )));
    }
    Ok(text)
}

fn first_inline_image(response: GeminiResponse) -> Result<Option<InlineImage>, GenerationError> {
    let candidate = match first_candidate(response) {
        Ok(candidate) => candidate,
        // No candidates means no image, not a failure
        Err(e) if e.kind == GenerationErrorKind::MalformedOutput => return Ok(None),
        Err(e) => return Err(e),
    };

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    for part in parts {
        let GeminiPart::InlineData { inline_data } = part else {
            continue;
        };
        if inline_data.data.is_empty() {
            continue;
        }
        // Reject garbage before it is uploaded anywhere
        base64::engine::general_purpose::STANDARD
            .decode(inline_data.data.as_bytes())
            .map_err(|e| GenerationError::malformed(format!("Image payload is not base64: {e}")))?;
        return Ok(Some(InlineImage {
            mime_type: inline_data
                .mime_type
                .unwrap_or_else(|| "image/png".to_string()),
            data: inline_data.data,
        }));
    }
    Ok(None)
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

impl GeminiRequest {
    fn user(prompt: &str, generation_config: Option<GeminiGenerationConfig>) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart::Text {
                    text: prompt.to_string(),
                }],
            }],
            generation_config,
        }
    }

    fn text(prompt: &str, response_mime_type: Option<&str>) -> Self {
        Self::user(
            prompt,
            response_mime_type.map(|mime| GeminiGenerationConfig {
                response_mime_type: Some(mime.to_string()),
                response_modalities: None,
            }),
        )
    }

    fn image(prompt: &str) -> Self {
        Self::user(
            prompt,
            Some(GeminiGenerationConfig {
                response_mime_type: None,
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            }),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}
