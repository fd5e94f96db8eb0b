//! Per-chat runtime executor

use super::traits::{Outbox, SessionStore};
use super::{Registry, Timeouts};

use crate::generator::{ContentGenerator, GenerationError};
use crate::publisher::{PublishError, Publisher};
use crate::state_machine::{
    transition, ChatContext, ChatId, Effect, Event, MessageRef, Phase, SessionUpdate,
    TransitionError,
};
use chrono::Utc;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Actor owning every state change of one chat.
///
/// Events are handled one at a time, so the read-transition-write cycle on a
/// session never interleaves with another event of the same chat. Adapter
/// calls run as background tasks and report back through `event_tx`.
///
/// Once the chat has no session and nothing in flight the actor removes
/// itself from the registry and stops; the next event starts a fresh one.
pub struct ChatRuntime<S, G, P, O>
where
    S: SessionStore + 'static,
    G: ContentGenerator + 'static,
    P: Publisher + 'static,
    O: Outbox + 'static,
{
    chat_id: ChatId,
    /// Highest generation issued so far, survives session deletion
    last_generation: u64,
    /// Adapter calls whose completion has not been processed yet
    in_flight: usize,
    has_session: bool,
    /// Events raised while executing effects, handled before the next queued one
    follow_ups: VecDeque<Event>,
    store: Arc<S>,
    generator: Arc<G>,
    publisher: Arc<P>,
    outbox: Arc<O>,
    timeouts: Timeouts,
    registry: Registry,
    event_rx: mpsc::UnboundedReceiver<Event>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl<S, G, P, O> ChatRuntime<S, G, P, O>
where
    S: SessionStore + 'static,
    G: ContentGenerator + 'static,
    P: Publisher + 'static,
    O: Outbox + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chat_id: ChatId,
        store: Arc<S>,
        generator: Arc<G>,
        publisher: Arc<P>,
        outbox: Arc<O>,
        timeouts: Timeouts,
        registry: Registry,
        event_rx: mpsc::UnboundedReceiver<Event>,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            chat_id,
            last_generation: 0,
            in_flight: 0,
            // Unknown until the first event reads the store
            has_session: true,
            follow_ups: VecDeque::new(),
            store,
            generator,
            publisher,
            outbox,
            timeouts,
            registry,
            event_rx,
            event_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(chat_id = %self.chat_id, "Starting chat runtime");

        loop {
            let event = match self.follow_ups.pop_front() {
                Some(event) => event,
                None => match self.event_rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Err(e) = self.process_event(event).await {
                tracing::error!(chat_id = %self.chat_id, error = %e, "Error handling event");
            }

            if self.is_quiescent() && self.retire().await {
                break;
            }
        }

        tracing::debug!(chat_id = %self.chat_id, "Chat runtime stopped");
    }

    fn is_quiescent(&self) -> bool {
        !self.has_session && self.in_flight == 0 && self.follow_ups.is_empty()
    }

    /// Leave the registry unless an event slipped in first.
    ///
    /// Dispatchers only send while holding the registry read lock, so with
    /// the write lock held an empty queue stays empty.
    async fn retire(&mut self) -> bool {
        let mut runtimes = self.registry.write().await;
        if let Ok(event) = self.event_rx.try_recv() {
            self.follow_ups.push_back(event);
            return false;
        }

        let registered = runtimes
            .get(&self.chat_id)
            .is_some_and(|handle| handle.event_tx.same_channel(&self.event_tx));
        if registered {
            runtimes.remove(&self.chat_id);
        }
        true
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        let kind = event.kind();
        let generation = event.generation();
        if event.is_completion() {
            self.in_flight = self.in_flight.saturating_sub(1);
        }

        let session = self.store.get(self.chat_id).await?;
        self.has_session = session.is_some();
        let ctx = ChatContext::new(self.last_generation, Utc::now());

        // Pure state transition
        let result = match transition(session.as_ref(), &ctx, event) {
            Ok(r) => r,
            Err(e @ TransitionError::StaleResult { .. }) => {
                tracing::debug!(chat_id = %self.chat_id, event = kind, generation, error = %e, "Dropping stale result");
                return Ok(());
            }
        };

        let before = session.as_ref().map(|s| s.phase);
        let after = result.phase_after(session.as_ref());
        if before != Some(after) {
            tracing::info!(
                chat_id = %self.chat_id,
                event = kind,
                from = before.map_or("none", Phase::as_str),
                phase = %after,
                "Phase changed"
            );
        }

        // Persist before any effect runs so completions find the new record
        let shown_generation = match result.update {
            SessionUpdate::Unchanged => session.as_ref().map(|s| s.generation),
            SessionUpdate::Save(next) => {
                let generation = next.generation;
                self.last_generation = self.last_generation.max(generation);
                self.store.set(self.chat_id, next).await?;
                self.has_session = true;
                Some(generation)
            }
            SessionUpdate::Remove(_) => {
                if session.is_some() {
                    self.store.delete(self.chat_id).await?;
                }
                self.has_session = false;
                None
            }
        };

        for effect in result.effects {
            if let Some(generation) = effect.generation() {
                self.last_generation = self.last_generation.max(generation);
            }
            self.execute_effect(effect, shown_generation).await;
        }

        Ok(())
    }

    /// Execute an effect. Message failures are logged and do not stop the
    /// remaining effects.
    ///
    /// A message carrying buttons is reported back as `DraftShown` for the
    /// session it was rendered for, so later clicks can be matched to it.
    async fn execute_effect(&mut self, effect: Effect, shown_generation: Option<u64>) {
        match effect {
            Effect::SendMessage { text, buttons } => {
                match self
                    .outbox
                    .send_message(self.chat_id, &text, buttons.as_ref())
                    .await
                {
                    Ok(message_ref) if buttons.is_some() => {
                        self.draft_shown(shown_generation, message_ref);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(chat_id = %self.chat_id, error = %e, "Failed to send message");
                    }
                }
            }

            Effect::EditMessage {
                message_ref,
                text,
                buttons,
            } => {
                let edited = self
                    .outbox
                    .edit_message(self.chat_id, message_ref, &text, buttons.as_ref())
                    .await;
                let shown = match edited {
                    Ok(()) => Some(message_ref),
                    Err(e) => {
                        // The original message may be gone or too old to edit
                        tracing::warn!(chat_id = %self.chat_id, error = %e, "Edit failed, sending new message");
                        match self
                            .outbox
                            .send_message(self.chat_id, &text, buttons.as_ref())
                            .await
                        {
                            Ok(sent) => Some(sent),
                            Err(e) => {
                                tracing::warn!(chat_id = %self.chat_id, error = %e, "Failed to send message");
                                None
                            }
                        }
                    }
                };
                if let (Some(message_ref), Some(_)) = (shown, &buttons) {
                    self.draft_shown(shown_generation, message_ref);
                }
            }

            Effect::GenerateArticle { generation, topic } => {
                let generator = self.generator.clone();
                let limit = self.timeouts.generation;
                self.spawn_call("generate_article", generation, async move {
                    match within(limit, generator.generate_article(&topic), || {
                        GenerationError::timeout(timeout_message("Article generation", limit))
                    })
                    .await
                    {
                        Ok(draft) => Event::ArticleGenerated { generation, draft },
                        Err(e) => Event::ArticleFailed {
                            generation,
                            error: format!("{}: {e}", e.kind),
                        },
                    }
                });
            }

            Effect::GenerateCoverImage { generation, body } => {
                let generator = self.generator.clone();
                let limit = self.timeouts.generation;
                self.spawn_call("generate_cover_image", generation, async move {
                    match within(limit, generator.generate_cover_image(&body), || {
                        GenerationError::timeout(timeout_message("Cover image generation", limit))
                    })
                    .await
                    {
                        Ok(image) => Event::CoverImageReady { generation, image },
                        Err(e) => Event::CoverImageFailed {
                            generation,
                            error: format!("{}: {e}", e.kind),
                        },
                    }
                });
            }

            Effect::Publish { generation, post } => {
                let publisher = self.publisher.clone();
                let limit = self.timeouts.publish;
                self.spawn_call("publish", generation, async move {
                    match within(limit, publisher.publish(&post), || {
                        PublishError::timeout(timeout_message("Publishing", limit))
                    })
                    .await
                    {
                        Ok(url) => Event::Published { generation, url },
                        Err(e) => Event::PublishFailed {
                            generation,
                            error: e.to_string(),
                        },
                    }
                });
            }
        }
    }

    fn draft_shown(&mut self, generation: Option<u64>, message_ref: MessageRef) {
        if let Some(generation) = generation {
            self.follow_ups.push_back(Event::DraftShown {
                generation,
                message_ref,
            });
        }
    }

    /// Run an adapter call in the background and feed its outcome back as an
    /// event of this chat
    fn spawn_call<F>(&mut self, call: &'static str, generation: u64, work: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        self.in_flight += 1;
        let event_tx = self.event_tx.clone();
        let chat_id = self.chat_id;

        tokio::spawn(async move {
            tracing::info!(%chat_id, generation, call, "Adapter call started");
            let start = Instant::now();
            let event = work.await;
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &event {
                Event::ArticleFailed { error, .. }
                | Event::CoverImageFailed { error, .. }
                | Event::PublishFailed { error, .. } => {
                    tracing::warn!(%chat_id, generation, call, duration_ms, error = %error, "Adapter call failed");
                }
                _ => {
                    tracing::info!(%chat_id, generation, call, duration_ms, "Adapter call completed");
                }
            }

            if event_tx.send(event).is_err() {
                tracing::warn!(%chat_id, generation, call, "Chat runtime gone, dropping result");
            }
        });
    }
}

/// Bound an adapter call, turning expiry into the adapter's own timeout error
async fn within<T, E>(
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(on_timeout()))
}

fn timeout_message(what: &str, limit: Duration) -> String {
    format!("{what} timed out after {}s", limit.as_secs())
}
