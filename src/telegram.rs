//! Telegram transport
//!
//! Long-polls the Bot API for messages and button clicks, turns them into
//! state machine events, and delivers outbound messages as HTML.

mod client;
mod poller;

pub use client::{TelegramClient, DEFAULT_API_BASE};
pub use poller::run_poller;

use teloxide::{ApiError, RequestError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Bot API request failed: {0}")]
    Request(#[from] RequestError),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid Bot API base URL {0}")]
    InvalidApiBase(String),

    #[error("Message id {0} is out of range for the Bot API")]
    MessageIdOutOfRange(i64),
}

impl TelegramError {
    /// Telegram refused the HTML markup of a message
    pub fn is_markup_rejection(&self) -> bool {
        matches!(self, TelegramError::Request(RequestError::Api(e))
            if e.to_string().contains("can't parse entities"))
    }

    /// An edit that would not change anything
    pub fn is_not_modified(&self) -> bool {
        matches!(
            self,
            TelegramError::Request(RequestError::Api(ApiError::MessageNotModified))
        )
    }
}
