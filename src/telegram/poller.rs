//! Long-poll loop feeding updates into the chat runtimes

use super::TelegramClient;
use crate::generator::ContentGenerator;
use crate::publisher::Publisher;
use crate::runtime::{Outbox, RuntimeManager, SessionStore};
use crate::state_machine::{Action, ChatId, Command, Event, MessageRef};
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{Update, UpdateId, UpdateKind};
use tokio_util::sync::CancellationToken;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// An update that maps onto a state machine event
#[derive(Debug)]
pub struct Inbound {
    pub chat_id: ChatId,
    pub event: Event,
}

/// Translate an update. Non-text messages, unknown buttons and buttons whose
/// message is no longer available yield `None`.
pub fn to_event(update: &Update) -> Option<Inbound> {
    match &update.kind {
        UpdateKind::Message(message) => {
            let text = message.text()?;
            let event = match Command::parse(text) {
                Some(command) => Event::Command { command },
                None => Event::Text {
                    content: text.to_string(),
                },
            };
            Some(Inbound {
                chat_id: ChatId(message.chat.id.0),
                event,
            })
        }
        UpdateKind::CallbackQuery(query) => {
            let action = Action::from_callback_data(query.data.as_deref()?)?;
            let message = query.message.as_ref()?;
            Some(Inbound {
                chat_id: ChatId(message.chat().id.0),
                event: Event::Action {
                    action,
                    message_ref: MessageRef(i64::from(message.id().0)),
                },
            })
        }
        _ => None,
    }
}

/// Offset that acknowledges `id` and everything before it
fn next_offset(id: UpdateId) -> i32 {
    i32::try_from(id.0).map_or(i32::MAX, |id| id.saturating_add(1))
}

/// Poll until `shutdown` fires, dispatching every update to its chat
pub async fn run_poller<S, G, P, O>(
    client: Arc<TelegramClient>,
    manager: Arc<RuntimeManager<S, G, P, O>>,
    shutdown: CancellationToken,
) where
    S: SessionStore + 'static,
    G: ContentGenerator + 'static,
    P: Publisher + 'static,
    O: Outbox + 'static,
{
    tracing::info!("Telegram poller started");
    let mut offset = 0;

    loop {
        let updates = tokio::select! {
            () = shutdown.cancelled() => break,
            result = client.get_updates(offset) => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                tracing::error!(error = %e, "getUpdates failed");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(RETRY_DELAY) => {}
                }
                continue;
            }
        };

        for update in updates {
            offset = offset.max(next_offset(update.id));

            if let UpdateKind::CallbackQuery(query) = &update.kind {
                let client = Arc::clone(&client);
                let query = query.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.answer_callback_query(&query).await {
                        tracing::warn!(error = %e, "Failed to answer callback query");
                    }
                });
            }

            let Some(inbound) = to_event(&update) else {
                tracing::debug!(update_id = update.id.0, "Ignoring update");
                continue;
            };

            tracing::debug!(chat_id = %inbound.chat_id, event = inbound.event.kind(), "Dispatching update");
            if let Err(e) = manager.dispatch(inbound.chat_id, inbound.event).await {
                tracing::error!(chat_id = %inbound.chat_id, error = %e, "Failed to dispatch update");
            }
        }
    }

    tracing::info!("Telegram poller stopped");
}
