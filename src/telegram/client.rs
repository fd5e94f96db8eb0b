//! Bot API client

use super::TelegramError;
use crate::markup::strip_markup;
use crate::state_machine::{ChatId, Keyboard, MessageRef};
use std::time::Duration;
use teloxide::payloads::{EditMessageTextSetters, GetUpdatesSetters, SendMessageSetters};
use teloxide::requests::Requester;
use teloxide::types::{
    AllowedUpdate, CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, MessageId,
    ParseMode, Update,
};
use teloxide::Bot;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Extra time the HTTP client waits beyond the long-poll window
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Formatting of an outgoing text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Html,
    Plain,
}

pub struct TelegramClient {
    bot: Bot,
    poll_timeout: Duration,
}

impl TelegramClient {
    pub fn new(
        token: impl Into<String>,
        api_base: &str,
        poll_timeout: Duration,
    ) -> Result<Self, TelegramError> {
        let api_url = reqwest::Url::parse(api_base)
            .map_err(|e| TelegramError::InvalidApiBase(format!("{api_base}: {e}")))?;
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout + POLL_GRACE)
            .build()?;
        Ok(Self {
            bot: Bot::with_client(token, client).set_api_url(api_url),
            poll_timeout,
        })
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i32) -> Result<Vec<Update>, TelegramError> {
        let timeout = u32::try_from(self.poll_timeout.as_secs()).unwrap_or(u32::MAX);
        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .timeout(timeout)
            .allowed_updates([AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .await?;
        Ok(updates)
    }

    /// Send HTML text, falling back to plain text when Telegram rejects the markup
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<MessageRef, TelegramError> {
        match self.send_formatted(chat_id, text, buttons, Format::Html).await {
            Err(e) if e.is_markup_rejection() => {
                tracing::warn!(%chat_id, error = %e, "HTML rejected, resending as plain text");
                self.send_formatted(chat_id, &strip_markup(text), buttons, Format::Plain)
                    .await
            }
            other => other,
        }
    }

    async fn send_formatted(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: Option<&Keyboard>,
        format: Format,
    ) -> Result<MessageRef, TelegramError> {
        let mut request = self
            .bot
            .send_message(teloxide::types::ChatId(chat_id.0), text);
        if format == Format::Html {
            request = request.parse_mode(ParseMode::Html);
        }
        if let Some(keyboard) = buttons {
            request = request.reply_markup(inline_keyboard(keyboard));
        }
        let sent = request.await?;
        Ok(MessageRef(i64::from(sent.id.0)))
    }

    /// Replace an earlier message, with the same plain-text fallback as sending
    pub async fn edit_message(
        &self,
        chat_id: ChatId,
        message_ref: MessageRef,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<(), TelegramError> {
        let message_id = i32::try_from(message_ref.0)
            .map(MessageId)
            .map_err(|_| TelegramError::MessageIdOutOfRange(message_ref.0))?;

        let result = match self
            .edit_formatted(chat_id, message_id, text, buttons, Format::Html)
            .await
        {
            Err(e) if e.is_markup_rejection() => {
                tracing::warn!(%chat_id, error = %e, "HTML rejected, editing as plain text");
                self.edit_formatted(chat_id, message_id, &strip_markup(text), buttons, Format::Plain)
                    .await
            }
            other => other,
        };

        match result {
            // Same text and buttons as before
            Err(e) if e.is_not_modified() => Ok(()),
            other => other,
        }
    }

    async fn edit_formatted(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        buttons: Option<&Keyboard>,
        format: Format,
    ) -> Result<(), TelegramError> {
        let mut request =
            self.bot
                .edit_message_text(teloxide::types::ChatId(chat_id.0), message_id, text);
        if format == Format::Html {
            request = request.parse_mode(ParseMode::Html);
        }
        if let Some(keyboard) = buttons {
            request = request.reply_markup(inline_keyboard(keyboard));
        }
        request.await?;
        Ok(())
    }

    /// Stop the button's loading spinner
    pub async fn answer_callback_query(&self, query: &CallbackQuery) -> Result<(), TelegramError> {
        self.bot.answer_callback_query(query.id.clone()).await?;
        Ok(())
    }
}

/// One callback button per action, laid out in the keyboard's rows
pub fn inline_keyboard(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|action| InlineKeyboardButton::callback(action.label(), action.callback_data()))
            .collect::<Vec<_>>()
    }))
}
