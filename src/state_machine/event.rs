//! Events that can occur in a conversation

use super::state::{Draft, ImageRef, MessageRef};
use chrono::{DateTime, Utc};
use std::fmt;

/// Slash commands understood by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
    Help,
    Unknown(String),
}

impl Command {
    /// Parse the leading `/command` token of a message.
    ///
    /// Accepts the `/cancel@SomeBot` form Telegram uses in group chats.
    pub fn parse(text: &str) -> Option<Command> {
        let token = text.trim().split_whitespace().next()?;
        let name = token.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        Some(match name {
            "start" => Command::Start,
            "cancel" => Command::Cancel,
            "help" => Command::Help,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// Button actions attached to a draft message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ConfirmArticle,
    RegenerateArticle,
    EditContent,
}

impl Action {
    pub const ALL: [Action; 3] = [
        Action::ConfirmArticle,
        Action::RegenerateArticle,
        Action::EditContent,
    ];

    /// Wire name carried in the button's callback data
    pub fn callback_data(self) -> &'static str {
        match self {
            Action::ConfirmArticle => "confirm_article",
            Action::RegenerateArticle => "regenerate_article",
            Action::EditContent => "edit_content",
        }
    }

    pub fn from_callback_data(data: &str) -> Option<Action> {
        Action::ALL
            .into_iter()
            .find(|action| action.callback_data() == data)
    }

    pub fn label(self) -> &'static str {
        match self {
            Action::ConfirmArticle => "✅ Confirm & Publish",
            Action::RegenerateArticle => "🔁 Regenerate Article",
            Action::EditContent => "🖋️ Edit Topic/Content",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.callback_data())
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    Command {
        command: Command,
    },
    Text {
        content: String,
    },
    Action {
        action: Action,
        message_ref: MessageRef,
    },

    // Generator events
    ArticleGenerated {
        generation: u64,
        draft: Draft,
    },
    ArticleFailed {
        generation: u64,
        error: String,
    },
    CoverImageReady {
        generation: u64,
        image: Option<ImageRef>,
    },
    CoverImageFailed {
        generation: u64,
        error: String,
    },

    // Publisher events
    Published {
        generation: u64,
        url: String,
    },
    PublishFailed {
        generation: u64,
        error: String,
    },

    // Transport feedback
    /// The draft of session `generation` is now displayed in `message_ref`
    DraftShown {
        generation: u64,
        message_ref: MessageRef,
    },

    // Housekeeping
    IdleExpired {
        cutoff: DateTime<Utc>,
    },
}

impl Event {
    /// Generation tag of a completion or transport report; `None` for user events
    pub fn generation(&self) -> Option<u64> {
        match self {
            Event::ArticleGenerated { generation, .. }
            | Event::ArticleFailed { generation, .. }
            | Event::CoverImageReady { generation, .. }
            | Event::CoverImageFailed { generation, .. }
            | Event::Published { generation, .. }
            | Event::PublishFailed { generation, .. }
            | Event::DraftShown { generation, .. } => Some(*generation),
            Event::Command { .. }
            | Event::Text { .. }
            | Event::Action { .. }
            | Event::IdleExpired { .. } => None,
        }
    }

    /// Whether this is the outcome of a generator or publisher call
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            Event::ArticleGenerated { .. }
                | Event::ArticleFailed { .. }
                | Event::CoverImageReady { .. }
                | Event::CoverImageFailed { .. }
                | Event::Published { .. }
                | Event::PublishFailed { .. }
        )
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Command { .. } => "command",
            Event::Text { .. } => "text",
            Event::Action { .. } => "action",
            Event::ArticleGenerated { .. } => "article_generated",
            Event::ArticleFailed { .. } => "article_failed",
            Event::CoverImageReady { .. } => "cover_image_ready",
            Event::CoverImageFailed { .. } => "cover_image_failed",
            Event::Published { .. } => "published",
            Event::PublishFailed { .. } => "publish_failed",
            Event::DraftShown { .. } => "draft_shown",
            Event::IdleExpired { .. } => "idle_expired",
        }
    }
}
