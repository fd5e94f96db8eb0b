//! Content generation
//!
//! Articles and cover images come from Gemini. Articles are requested as
//! strict JSON and validated before they can reach a session; cover images
//! are uploaded to an [`ImageHost`] so the post can reference them by URL.

mod gemini;
mod image_host;
mod parse;
mod prompts;

pub use gemini::{GeminiClient, InlineImage};
pub use image_host::{CloudinaryConfig, CloudinaryHost, DataUriHost, ImageHost};
pub use parse::parse_article;

use crate::state_machine::{Draft, ImageRef};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Produces drafts and cover images
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Write a draft about `topic`
    async fn generate_article(&self, topic: &str) -> Result<Draft, GenerationError>;

    /// Illustrate an article. `Ok(None)` means the provider produced no image,
    /// which is not an error.
    async fn generate_cover_image(&self, body: &str) -> Result<Option<ImageRef>, GenerationError>;
}

// ============================================================================
// Errors
// ============================================================================

/// Generation error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::InvalidRequest, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::MalformedOutput, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Unknown, message)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// Connection problems
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Bad or missing API key (401, 403)
    Auth,
    /// Bad request (400) or a blocked prompt
    InvalidRequest,
    /// The provider answered but the output could not be used
    MalformedOutput,
    /// No answer within the configured limit
    Timeout,
    Unknown,
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::Auth => "auth",
            Self::InvalidRequest => "invalid_request",
            Self::MalformedOutput => "malformed_output",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        })
    }
}

// ============================================================================
// Gemini generator
// ============================================================================

/// Gemini-backed generator
pub struct GeminiGenerator {
    client: GeminiClient,
    text_model: String,
    image_model: String,
    host: Arc<dyn ImageHost>,
}

impl GeminiGenerator {
    pub fn new(
        client: GeminiClient,
        text_model: impl Into<String>,
        image_model: impl Into<String>,
        host: Arc<dyn ImageHost>,
    ) -> Self {
        Self {
            client,
            text_model: text_model.into(),
            image_model: image_model.into(),
            host,
        }
    }
}

#[async_trait]
impl ContentGenerator for GeminiGenerator {
    async fn generate_article(&self, topic: &str) -> Result<Draft, GenerationError> {
        let raw = self
            .client
            .generate_json(&self.text_model, &prompts::article(topic))
            .await?;
        parse_article(&raw).inspect_err(|e| {
            tracing::warn!(model = %self.text_model, error = %e, "Unusable article output");
        })
    }

    async fn generate_cover_image(&self, body: &str) -> Result<Option<ImageRef>, GenerationError> {
        let description = self
            .client
            .generate_text(&self.text_model, &prompts::image_description(body))
            .await?;

        let Some(image) = self
            .client
            .generate_image(&self.image_model, description.trim())
            .await?
        else {
            tracing::info!(model = %self.image_model, "No image part in response");
            return Ok(None);
        };

        self.host.host(&image).await.map(Some)
    }
}
