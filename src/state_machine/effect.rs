//! Effects produced by state transitions

use super::event::Action;
use super::state::MessageRef;
use crate::publisher::Post;

/// Inline keyboard attached to an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyboard {
    /// One button per row, in display order
    pub rows: Vec<Vec<Action>>,
}

impl Keyboard {
    /// The fixed catalog shown under every generated or regenerated draft
    pub fn draft_actions() -> Self {
        Self {
            rows: Action::ALL.iter().map(|action| vec![*action]).collect(),
        }
    }
}

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a new message to the chat
    SendMessage {
        text: String,
        buttons: Option<Keyboard>,
    },

    /// Replace the contents of an earlier message in place
    EditMessage {
        message_ref: MessageRef,
        text: String,
        buttons: Option<Keyboard>,
    },

    /// Ask the generator for a draft (spawns as background task)
    GenerateArticle { generation: u64, topic: String },

    /// Ask the generator for a cover image (spawns as background task)
    GenerateCoverImage { generation: u64, body: String },

    /// Commit the post to the blog (spawns as background task)
    Publish { generation: u64, post: Post },
}

impl Effect {
    pub fn notify(text: impl Into<String>) -> Self {
        Effect::SendMessage {
            text: text.into(),
            buttons: None,
        }
    }

    pub fn notify_with_actions(text: impl Into<String>) -> Self {
        Effect::SendMessage {
            text: text.into(),
            buttons: Some(Keyboard::draft_actions()),
        }
    }

    /// Whether executing this effect reaches out to an external adapter
    #[cfg(test)]
    pub fn is_adapter_call(&self) -> bool {
        matches!(
            self,
            Effect::GenerateArticle { .. } | Effect::GenerateCoverImage { .. } | Effect::Publish { .. }
        )
    }

    /// Generation tag of an adapter call
    pub fn generation(&self) -> Option<u64> {
        match self {
            Effect::GenerateArticle { generation, .. }
            | Effect::GenerateCoverImage { generation, .. }
            | Effect::Publish { generation, .. } => Some(*generation),
            Effect::SendMessage { .. } | Effect::EditMessage { .. } => None,
        }
    }
}
