//! Draft session state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identity
// ============================================================================

/// Stable key of a conversation (the Telegram chat id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a message previously sent to a chat, used for in-place edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(pub i64);

// ============================================================================
// Draft content
// ============================================================================

/// Title, body and tags produced by one generation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    /// Rich text using the generator's small HTML vocabulary
    pub body: String,
    pub tags: Vec<String>,
}

impl Draft {
    pub fn new(title: impl Into<String>, body: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            tags: dedup_tags(tags),
        }
    }
}

/// Trim tags, drop empty ones and remove duplicates while keeping first-seen order
pub fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || seen.iter().any(|t: &String| t == tag) {
            continue;
        }
        seen.push(tag.to_string());
    }
    seen
}

/// Hosted (or inline `data:`) URL of a generated cover image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Phase
// ============================================================================

/// Lifecycle phase of a conversation.
///
/// `AwaitingTopic` and `Done` are never stored on an established session: an
/// absent record is `AwaitingTopic`, and reaching `Done` deletes the record.
/// The one exception is the short window in which the very first draft is
/// being generated, where the record exists with phase `AwaitingTopic` so the
/// completion can be matched against its generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AwaitingTopic,
    ArticleReady,
    AwaitingEdit,
    Publishing,
    Done,
}

impl Phase {
    /// Phase of a conversation given its (possibly absent) session record
    pub fn of(session: Option<&DraftSession>) -> Phase {
        session.map_or(Phase::AwaitingTopic, |s| s.phase)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::AwaitingTopic => "awaiting_topic",
            Phase::ArticleReady => "article_ready",
            Phase::AwaitingEdit => "awaiting_edit",
            Phase::Publishing => "publishing",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Draft Session
// ============================================================================

/// The single in-flight draft record kept per conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSession {
    pub topic: String,
    /// Latest completed draft; `None` only while the first one is generating
    pub draft: Option<Draft>,
    pub phase: Phase,
    /// Tag of the most recent generator/publisher call issued for this session
    pub generation: u64,
    /// Message whose contents the next draft should replace (set by Regenerate)
    #[serde(default)]
    pub render_target: Option<MessageRef>,
    /// Message currently showing the draft and its buttons
    #[serde(default)]
    pub draft_message: Option<MessageRef>,
    pub updated_at: DateTime<Utc>,
}

impl DraftSession {
    /// New session for a topic whose first draft is being generated
    pub fn pending(topic: impl Into<String>, generation: u64, now: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            draft: None,
            phase: Phase::AwaitingTopic,
            generation,
            render_target: None,
            draft_message: None,
            updated_at: now,
        }
    }

    /// Whether a call tagged with `generation` is still the one this session waits on
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

/// Immutable per-event context handed to the transition function
#[derive(Debug, Clone)]
pub struct ChatContext {
    /// Highest generation ever issued in this chat, across deleted sessions too.
    /// New sessions continue from here so results of a cancelled session can
    /// never match a fresh one.
    pub last_generation: u64,
    pub now: DateTime<Utc>,
}

impl ChatContext {
    pub fn new(last_generation: u64, now: DateTime<Utc>) -> Self {
        Self {
            last_generation,
            now,
        }
    }

    pub fn next_generation(&self, session: Option<&DraftSession>) -> u64 {
        let current = session.map_or(0, |s| s.generation);
        self.last_generation.max(current) + 1
    }
}
