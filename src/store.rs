//! In-memory session store
//!
//! Drafts in flight are lost on restart; nothing else depends on them.

use crate::runtime::SessionStore;
use crate::state_machine::{ChatId, DraftSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<ChatId, DraftSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, chat_id: ChatId) -> Result<Option<DraftSession>, String> {
        Ok(self.sessions.read().await.get(&chat_id).cloned())
    }

    async fn set(&self, chat_id: ChatId, session: DraftSession) -> Result<(), String> {
        self.sessions.write().await.insert(chat_id, session);
        Ok(())
    }

    async fn delete(&self, chat_id: ChatId) -> Result<(), String> {
        self.sessions.write().await.remove(&chat_id);
        Ok(())
    }

    async fn idle_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<ChatId>, String> {
        let sessions = self.sessions.read().await;
        let mut idle: Vec<ChatId> = sessions
            .iter()
            .filter(|(_, session)| session.updated_at <= cutoff)
            .map(|(chat_id, _)| *chat_id)
            .collect();
        idle.sort_unstable();
        Ok(idle)
    }
}
