//! Publishing target abstraction
//!
//! A finished draft becomes a [`Post`]; the Blogger implementation commits it
//! and returns the canonical URL.

mod blogger;

pub use blogger::BloggerPublisher;

use crate::state_machine::{Draft, ImageRef};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Commits finished posts to the publishing target
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish the post and return its canonical URL
    async fn publish(&self, post: &Post) -> Result<String, PublishError>;
}

/// Title, formatted body and labels handed to the publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
}

impl Post {
    pub fn from_draft(draft: &Draft) -> Self {
        Self {
            title: draft.title.clone(),
            body: draft.body.clone(),
            tags: draft.tags.clone(),
        }
    }

    /// Prepend the cover image to the body; no image leaves the body untouched
    #[must_use]
    pub fn with_cover_image(mut self, image: Option<&ImageRef>) -> Self {
        if let Some(image) = image {
            self.body = embed_cover_image(&self.body, image);
        }
        self
    }
}

/// HTML block placed above the article body when a cover image exists
pub fn embed_cover_image(body: &str, image: &ImageRef) -> String {
    format!(
        "<img src=\"{}\" alt=\"Cover image\" style=\"max-width:100%; border-radius:10px;\" /><br><br>{body}",
        image.as_str().replace('"', "%22")
    )
}

/// Publish error with classification
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct PublishError {
    pub kind: PublishErrorKind,
    pub message: String,
}

impl PublishError {
    pub fn new(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Auth, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Rejected, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Timeout, message)
    }
}

/// Why a publish failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishErrorKind {
    /// Missing, expired or revoked credentials (401, 403)
    Auth,
    /// The blog refused the post
    Rejected,
    /// Transport failure
    Network,
    /// No answer within the configured limit
    Timeout,
}

impl fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auth => "auth",
            Self::Rejected => "rejected",
            Self::Network => "network",
            Self::Timeout => "timeout",
        })
    }
}
