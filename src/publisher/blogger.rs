//! Blogger v3 publisher

use super::{Post, PublishError, Publisher};
use crate::auth::{AuthError, OAuthClient};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/blogger/v3";

/// Publishes posts to one blog with the operator's OAuth token
pub struct BloggerPublisher {
    client: Client,
    auth: Arc<OAuthClient>,
    blog_id: String,
    api_base: String,
}

impl BloggerPublisher {
    pub fn new(auth: Arc<OAuthClient>, blog_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            auth,
            blog_id: blog_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn posts_url(&self) -> String {
        format!("{}/blogs/{}/posts/", self.api_base, self.blog_id)
    }

    async fn insert(&self, body: &InsertPostRequest<'_>, token: &str) -> Result<Inserted, PublishError> {
        let response = self
            .client
            .post(self.posts_url())
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::timeout(format!("Request timeout: {e}"))
                } else {
                    PublishError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PublishError::network(format!("Failed to read response: {e}")))?;

        if status == StatusCode::UNAUTHORIZED {
            return Ok(Inserted::Unauthorized);
        }
        if !status.is_success() {
            return Err(classify_failure(status, &text));
        }

        let post: InsertPostResponse = serde_json::from_str(&text).map_err(|e| {
            PublishError::rejected(format!("Unexpected response: {e} - body: {text}"))
        })?;
        Ok(Inserted::Post(post))
    }
}

enum Inserted {
    Post(InsertPostResponse),
    Unauthorized,
}

#[async_trait]
impl Publisher for BloggerPublisher {
    async fn publish(&self, post: &Post) -> Result<String, PublishError> {
        let body = InsertPostRequest::from(post);

        let token = self.auth.access_token().await.map_err(auth_failure)?;
        let mut inserted = self.insert(&body, &token).await?;

        // The stored expiry can be wrong (revoked or clock skew): refresh once
        if matches!(inserted, Inserted::Unauthorized) {
            tracing::info!(blog_id = %self.blog_id, "Blogger rejected token, refreshing");
            let token = self.auth.force_refresh().await.map_err(auth_failure)?;
            inserted = self.insert(&body, &token).await?;
        }

        match inserted {
            Inserted::Post(created) => {
                tracing::info!(
                    blog_id = %self.blog_id,
                    post_id = %created.id,
                    url = %created.url,
                    "Published post"
                );
                Ok(created.url)
            }
            Inserted::Unauthorized => Err(PublishError::auth(
                "Blogger rejected the refreshed token; reconnect via /auth",
            )),
        }
    }
}

fn auth_failure(e: AuthError) -> PublishError {
    match e {
        AuthError::Http(e) => PublishError::network(format!("Token refresh failed: {e}")),
        other => PublishError::auth(other.to_string()),
    }
}

/// Map a non-success Blogger response to a publish error
fn classify_failure(status: StatusCode, body: &str) -> PublishError {
    let message = serde_json::from_str::<GoogleErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message);

    match status.as_u16() {
        401 | 403 => PublishError::auth(format!("Authentication failed: {message}")),
        408 | 504 => PublishError::timeout(format!("HTTP {status}: {message}")),
        _ => PublishError::rejected(format!("HTTP {status}: {message}")),
    }
}

// Blogger API types

#[derive(Debug, Serialize)]
struct InsertPostRequest<'a> {
    kind: &'static str,
    title: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "no_labels")]
    labels: &'a [String],
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde passes a reference to the field
fn no_labels(labels: &&[String]) -> bool {
    labels.is_empty()
}

impl<'a> From<&'a Post> for InsertPostRequest<'a> {
    fn from(post: &'a Post) -> Self {
        Self {
            kind: "blogger#post",
            title: &post.title,
            content: &post.body,
            labels: &post.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsertPostResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
}
