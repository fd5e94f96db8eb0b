//! Where generated cover images end up

use super::{GenerationError, InlineImage};
use crate::state_machine::ImageRef;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Turns an inline image into something a post can reference
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn host(&self, image: &InlineImage) -> Result<ImageRef, GenerationError>;
}

/// Embeds the image in the post itself as a `data:` URI
pub struct DataUriHost;

#[async_trait]
impl ImageHost for DataUriHost {
    async fn host(&self, image: &InlineImage) -> Result<ImageRef, GenerationError> {
        Ok(ImageRef(image.data_uri()))
    }
}

// ============================================================================
// Cloudinary
// ============================================================================

const UPLOAD_FOLDER: &str = "blog";

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Signed uploads to Cloudinary.
///
/// Signatures use SHA-256, so the account must have SHA-256 request
/// signing enabled.
pub struct CloudinaryHost {
    client: Client,
    config: CloudinaryConfig,
    api_base: String,
}

impl CloudinaryHost {
    pub fn new(config: CloudinaryConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            api_base: "https://api.cloudinary.com/v1_1".to_string(),
        }
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/image/upload", self.api_base, self.config.cloud_name)
    }
}

#[async_trait]
impl ImageHost for CloudinaryHost {
    async fn host(&self, image: &InlineImage) -> Result<ImageRef, GenerationError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let public_id = format!(
            "blog-cover-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4()
        );

        let mut params = vec![
            ("folder", UPLOAD_FOLDER.to_string()),
            ("format", "png".to_string()),
            ("overwrite", "false".to_string()),
            ("public_id", public_id),
            ("timestamp", timestamp),
        ];
        let signature = sign(&params, &self.config.api_secret);
        params.push(("signature", signature));
        params.push(("signature_algorithm", "sha256".to_string()));
        params.push(("api_key", self.config.api_key.clone()));
        params.push(("file", image.data_uri()));

        let response = self
            .client
            .post(self.upload_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::timeout(format!("Image upload timeout: {e}"))
                } else {
                    GenerationError::network(format!("Image upload failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::network(format!("Failed to read upload response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<CloudinaryErrorResponse>(&body)
                .map_or(body, |e| e.error.message);
            return Err(match status.as_u16() {
                401 | 403 => GenerationError::auth(format!("Image upload rejected: {message}")),
                429 => GenerationError::rate_limit(format!("Image upload rate limited: {message}")),
                500..=599 => GenerationError::server_error(format!("Image host error: {message}")),
                _ => GenerationError::invalid_request(format!("Image upload rejected: {message}")),
            });
        }

        let uploaded: UploadResponse = serde_json::from_str(&body).map_err(|e| {
            GenerationError::unknown(format!("Unexpected upload response: {e}"))
        })?;
        tracing::info!(url = %uploaded.secure_url, "Uploaded cover image");
        Ok(ImageRef(uploaded.secure_url))
    }
}

/// Request signature: parameters sorted by name, joined as `k=v&k=v`, with
/// the API secret appended, hashed and hex encoded
fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort_by_key(|(name, _)| *name);
    let joined = sorted
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    hex::encode(Sha256::digest(format!("{joined}{api_secret}").as_bytes()))
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryErrorResponse {
    error: CloudinaryError,
}

#[derive(Debug, Deserialize)]
struct CloudinaryError {
    message: String,
}
