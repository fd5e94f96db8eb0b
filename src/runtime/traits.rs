//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::state_machine::{ChatId, DraftSession, Keyboard, MessageRef};
use crate::telegram::TelegramClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Storage for the single draft session of each chat
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, chat_id: ChatId) -> Result<Option<DraftSession>, String>;

    async fn set(&self, chat_id: ChatId, session: DraftSession) -> Result<(), String>;

    /// Deleting an absent session is not an error
    async fn delete(&self, chat_id: ChatId) -> Result<(), String>;

    /// Chats whose session has not been touched since `cutoff`
    async fn idle_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<ChatId>, String>;
}

/// Outbound side of the chat transport
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Send a new message, returning a reference usable for later edits
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<MessageRef, String>;

    /// Replace the text and buttons of an earlier message
    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_ref: MessageRef,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<(), String>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn get(&self, chat_id: ChatId) -> Result<Option<DraftSession>, String> {
        (**self).get(chat_id).await
    }

    async fn set(&self, chat_id: ChatId, session: DraftSession) -> Result<(), String> {
        (**self).set(chat_id, session).await
    }

    async fn delete(&self, chat_id: ChatId) -> Result<(), String> {
        (**self).delete(chat_id).await
    }

    async fn idle_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<ChatId>, String> {
        (**self).idle_since(cutoff).await
    }
}

#[async_trait]
impl<T: Outbox + ?Sized> Outbox for Arc<T> {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<MessageRef, String> {
        (**self).send_message(chat_id, text, buttons).await
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_ref: MessageRef,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<(), String> {
        (**self).edit_message(chat_id, message_ref, text, buttons).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use the Telegram Bot API as the outbox
#[derive(Clone)]
pub struct TelegramOutbox {
    client: Arc<TelegramClient>,
}

impl TelegramOutbox {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Outbox for TelegramOutbox {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<MessageRef, String> {
        self.client
            .send_message(chat_id, text, buttons)
            .await
            .map_err(|e| e.to_string())
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_ref: MessageRef,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<(), String> {
        self.client
            .edit_message(chat_id, message_ref, text, buttons)
            .await
            .map_err(|e| e.to_string())
    }
}
