//! Runtime for driving conversations
//!
//! One actor per chat serializes that chat's events; different chats never
//! wait on each other. Queues are unbounded so a busy chat cannot hold up
//! the dispatcher. Actors exist only while their chat has something going
//! on. The manager owns the actors and the idle sweeper.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ChatRuntime;
pub use traits::*;

use crate::generator::{ContentGenerator, GeminiGenerator};
use crate::publisher::{BloggerPublisher, Publisher};
use crate::state_machine::{ChatId, Event};
use crate::store::InMemorySessionStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Type alias for the production manager with concrete implementations
pub type ProductionRuntime =
    RuntimeManager<InMemorySessionStore, GeminiGenerator, BloggerPublisher, TelegramOutbox>;

/// Upper bounds on adapter calls
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Article and cover image generation
    pub generation: Duration,
    pub publish: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            generation: Duration::from_secs(120),
            publish: Duration::from_secs(60),
        }
    }
}

/// Handle to interact with a running chat
#[derive(Clone)]
pub struct ChatHandle {
    pub event_tx: mpsc::UnboundedSender<Event>,
}

/// Live chat actors, shared with the actors so they can deregister themselves
pub type Registry = Arc<RwLock<HashMap<ChatId, ChatHandle>>>;

/// Manager for all chat runtimes
pub struct RuntimeManager<S, G, P, O>
where
    S: SessionStore + 'static,
    G: ContentGenerator + 'static,
    P: Publisher + 'static,
    O: Outbox + 'static,
{
    store: Arc<S>,
    generator: Arc<G>,
    publisher: Arc<P>,
    outbox: Arc<O>,
    timeouts: Timeouts,
    runtimes: Registry,
}

impl<S, G, P, O> RuntimeManager<S, G, P, O>
where
    S: SessionStore + 'static,
    G: ContentGenerator + 'static,
    P: Publisher + 'static,
    O: Outbox + 'static,
{
    pub fn new(
        store: Arc<S>,
        generator: Arc<G>,
        publisher: Arc<P>,
        outbox: Arc<O>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            store,
            generator,
            publisher,
            outbox,
            timeouts,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Send an event to a chat, starting its runtime if none is live.
    ///
    /// Sends happen under the registry read lock; a retiring runtime takes
    /// the write lock before it stops, so an event is never left in a queue
    /// nobody reads.
    pub async fn dispatch(&self, chat_id: ChatId, event: Event) -> Result<(), String> {
        let event = {
            let runtimes = self.runtimes.read().await;
            match runtimes.get(&chat_id) {
                Some(handle) => match handle.event_tx.send(event) {
                    Ok(()) => return Ok(()),
                    // Runtime ended without deregistering
                    Err(mpsc::error::SendError(event)) => event,
                },
                None => event,
            }
        };

        let mut runtimes = self.runtimes.write().await;
        let handle = match runtimes.get(&chat_id) {
            // Another dispatcher may have won the race for the write lock
            Some(handle) if !handle.event_tx.is_closed() => handle.clone(),
            _ => {
                let handle = self.spawn_runtime(chat_id);
                runtimes.insert(chat_id, handle.clone());
                handle
            }
        };
        handle
            .event_tx
            .send(event)
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Number of chats with a live runtime
    pub async fn active_chats(&self) -> usize {
        self.runtimes.read().await.len()
    }

    fn spawn_runtime(&self, chat_id: ChatId) -> ChatHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let runtime = ChatRuntime::new(
            chat_id,
            self.store.clone(),
            self.generator.clone(),
            self.publisher.clone(),
            self.outbox.clone(),
            self.timeouts,
            self.runtimes.clone(),
            event_rx,
            event_tx.clone(),
        );

        // Start runtime in background
        tokio::spawn(async move {
            runtime.run().await;
            tracing::debug!(%chat_id, "Chat runtime finished");
        });

        ChatHandle { event_tx }
    }

    /// Expire sessions untouched for longer than `ttl`.
    ///
    /// The expiry itself is an event, so it is ordered with everything else
    /// the chat is doing and the transition decides whether it applies.
    pub async fn sweep_idle(&self, ttl: Duration) -> Result<usize, String> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| format!("Invalid idle TTL: {e}"))?;
        let cutoff = Utc::now() - ttl;
        let idle = self.store.idle_since(cutoff).await?;

        for chat_id in &idle {
            self.dispatch(*chat_id, Event::IdleExpired { cutoff }).await?;
        }
        if !idle.is_empty() {
            tracing::info!(count = idle.len(), %cutoff, "Expiring idle sessions");
        }
        let active_chats = self.active_chats().await;
        tracing::debug!(active_chats, "Idle sweep finished");
        Ok(idle.len())
    }

    /// Start the background task that periodically expires idle sessions.
    /// Must be called once after creating the `RuntimeManager`
    pub fn start_idle_sweeper(self: &Arc<Self>, ttl: Duration, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = manager.sweep_idle(ttl).await {
                    tracing::error!(error = %e, "Idle sweep failed");
                }
            }
        })
    }
}
