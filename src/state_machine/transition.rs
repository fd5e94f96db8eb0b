//! Pure state transition function
//!
//! Given the same session, context and event this always produces the same
//! result. All I/O is expressed as [`Effect`]s for the runtime to execute.

use super::event::{Action, Command};
use super::state::{ChatContext, Draft, DraftSession, MessageRef, Phase};
use super::{Effect, Event, Keyboard};
use crate::markup::{escape_html, render_article};
use crate::publisher::Post;
use thiserror::Error;

const GREETING: &str = "👋 Hello! I'm your AI blogging assistant.\n\n\
    Just send me a topic and I'll help you create and publish a blog post.";
const CANCELLED: &str = "🚫 Process canceled. You can now send a new topic.";
const HELP: &str = "Send me a topic and I'll draft a blog post about it.\n\n\
    Under each draft you can publish it, ask for a fresh version, or send a new topic.\n\n\
    /cancel drops the current draft, /start resets the conversation.";
const STILL_GENERATING: &str = "⏳ Still writing your article. Send /cancel to start over.";
const DRAFT_HINT: &str = "Use the buttons under the article to publish, regenerate or edit it. \
    Send /cancel to start over with a new topic.";
const STILL_PUBLISHING: &str = "🚀 Your post is being published, hang on.";
const EDIT_PROMPT: &str = "🖋️ Send the updated topic or article content.";
const REGENERATING: &str = "🔄 Regenerating article...";
const REGENERATING_FROM_EDIT: &str = "🔄 Regenerating article with your new input...";
const GENERATING_COVER: &str = "🖼️ Generating cover image...";
const PUBLISHING: &str = "🚀 Publishing to Blogger...";
const GENERATE_FAILED: &str = "⚠️ Failed to generate article. Please try again.";
const REGENERATE_FAILED: &str = "⚠️ Failed to regenerate article.";
const EDIT_FAILED: &str =
    "⚠️ Failed to regenerate article. Send another topic, or /cancel to start over.";
const COVER_FAILED: &str =
    "❌ Failed to generate the cover image. Your draft is safe, tap Confirm to try again.";
const PUBLISH_FAILED: &str =
    "❌ Failed to publish post. Your draft is unchanged, tap Confirm to retry.";
const EXPIRED: &str = "⌛ Your draft expired after a period of inactivity. \
    Send a new topic whenever you're ready.";

/// What the runtime must do with the stored session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Leave the store untouched
    Unchanged,
    /// Write this record
    Save(DraftSession),
    /// Delete the record; the conversation ends up in the given phase
    Remove(Phase),
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub update: SessionUpdate,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn unchanged() -> Self {
        Self {
            update: SessionUpdate::Unchanged,
            effects: vec![],
        }
    }

    pub fn save(session: DraftSession) -> Self {
        Self {
            update: SessionUpdate::Save(session),
            effects: vec![],
        }
    }

    pub fn remove(phase: Phase) -> Self {
        Self {
            update: SessionUpdate::Remove(phase),
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Phase of the conversation once this result is applied
    pub fn phase_after(&self, before: Option<&DraftSession>) -> Phase {
        match &self.update {
            SessionUpdate::Unchanged => Phase::of(before),
            SessionUpdate::Save(session) => session.phase,
            SessionUpdate::Remove(phase) => *phase,
        }
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// An adapter completion no longer matches the session it was issued for.
    /// Never surfaced to the user.
    #[error("stale result for generation {generation} (current: {current:?})")]
    StaleResult {
        generation: u64,
        current: Option<u64>,
    },
}

/// Pure transition function
pub fn transition(
    session: Option<&DraftSession>,
    ctx: &ChatContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        Event::Command { command } => Ok(on_command(session, &command)),
        Event::Text { content } => Ok(on_text(session, ctx, content.trim())),
        Event::Action {
            action,
            message_ref,
        } => Ok(on_action(session, ctx, action, message_ref)),

        // ============================================================
        // Generator completions
        // ============================================================
        Event::ArticleGenerated { generation, draft } => {
            let session = awaited(session, generation, |p| {
                matches!(
                    p,
                    Phase::AwaitingTopic | Phase::ArticleReady | Phase::AwaitingEdit
                )
            })?;
            Ok(on_article_generated(session, ctx, draft))
        }

        Event::ArticleFailed { generation, .. } => {
            let session = awaited(session, generation, |p| {
                matches!(
                    p,
                    Phase::AwaitingTopic | Phase::ArticleReady | Phase::AwaitingEdit
                )
            })?;
            Ok(match session.phase {
                // The first draft never arrived: nothing worth keeping
                Phase::AwaitingTopic => TransitionResult::remove(Phase::AwaitingTopic)
                    .with_effect(Effect::notify(GENERATE_FAILED)),
                Phase::AwaitingEdit => {
                    TransitionResult::unchanged().with_effect(Effect::notify(EDIT_FAILED))
                }
                _ => TransitionResult::unchanged()
                    .with_effect(Effect::notify_with_actions(REGENERATE_FAILED)),
            })
        }

        Event::CoverImageReady { generation, image } => {
            let session = awaited(session, generation, |p| p == Phase::Publishing)?;
            let Some(draft) = &session.draft else {
                return Err(stale(Some(session), generation));
            };
            let post = Post::from_draft(draft).with_cover_image(image.as_ref());
            Ok(TransitionResult::unchanged()
                .with_effect(Effect::notify(PUBLISHING))
                .with_effect(Effect::Publish { generation, post }))
        }

        Event::CoverImageFailed { generation, .. } => {
            let session = awaited(session, generation, |p| p == Phase::Publishing)?;
            Ok(revert_to_ready(session, ctx).with_effect(Effect::notify_with_actions(COVER_FAILED)))
        }

        // ============================================================
        // Publisher completions
        // ============================================================
        Event::Published { generation, url } => {
            awaited(session, generation, |p| p == Phase::Publishing)?;
            Ok(TransitionResult::remove(Phase::Done).with_effect(Effect::notify(format!(
                "✅ Published successfully!\n{}",
                escape_html(&url)
            ))))
        }

        Event::PublishFailed { generation, .. } => {
            let session = awaited(session, generation, |p| p == Phase::Publishing)?;
            Ok(revert_to_ready(session, ctx).with_effect(Effect::notify_with_actions(PUBLISH_FAILED)))
        }

        // ============================================================
        // Transport feedback
        // ============================================================
        Event::DraftShown {
            generation,
            message_ref,
        } => {
            let session = awaited(session, generation, |p| {
                matches!(p, Phase::ArticleReady | Phase::AwaitingEdit)
            })?;
            Ok(TransitionResult::save(DraftSession {
                draft_message: Some(message_ref),
                ..session.clone()
            }))
        }

        // ============================================================
        // Housekeeping
        // ============================================================
        Event::IdleExpired { cutoff } => Ok(match session {
            Some(s) if s.phase != Phase::Publishing && s.updated_at <= cutoff => {
                TransitionResult::remove(Phase::AwaitingTopic).with_effect(Effect::notify(EXPIRED))
            }
            _ => TransitionResult::unchanged(),
        }),
    }
}

// ============================================================
// User events
// ============================================================

fn on_command(session: Option<&DraftSession>, command: &Command) -> TransitionResult {
    let reset = |text: &str| {
        let result = if session.is_some() {
            TransitionResult::remove(Phase::AwaitingTopic)
        } else {
            TransitionResult::unchanged()
        };
        result.with_effect(Effect::notify(text))
    };

    match command {
        Command::Start => reset(GREETING),
        Command::Cancel => reset(CANCELLED),
        Command::Help => TransitionResult::unchanged().with_effect(Effect::notify(HELP)),
        Command::Unknown(name) => TransitionResult::unchanged().with_effect(Effect::notify(
            format!("Unknown command /{}. Try /help.", escape_html(name)),
        )),
    }
}

fn on_text(session: Option<&DraftSession>, ctx: &ChatContext, topic: &str) -> TransitionResult {
    if topic.is_empty() {
        return TransitionResult::unchanged();
    }

    let Some(s) = session else {
        return start_session(session, ctx, topic);
    };

    match s.phase {
        // A record left in `Done` is treated as absent
        Phase::Done => start_session(session, ctx, topic),
        Phase::AwaitingTopic => {
            TransitionResult::unchanged().with_effect(Effect::notify(STILL_GENERATING))
        }
        Phase::ArticleReady => {
            TransitionResult::unchanged().with_effect(Effect::notify(DRAFT_HINT))
        }
        Phase::Publishing => {
            TransitionResult::unchanged().with_effect(Effect::notify(STILL_PUBLISHING))
        }
        Phase::AwaitingEdit => {
            let generation = ctx.next_generation(session);
            let next = DraftSession {
                topic: topic.to_string(),
                generation,
                render_target: None,
                updated_at: ctx.now,
                ..s.clone()
            };
            TransitionResult::save(next)
                .with_effect(Effect::notify(REGENERATING_FROM_EDIT))
                .with_effect(Effect::GenerateArticle {
                    generation,
                    topic: topic.to_string(),
                })
        }
    }
}

fn start_session(
    session: Option<&DraftSession>,
    ctx: &ChatContext,
    topic: &str,
) -> TransitionResult {
    let generation = ctx.next_generation(session);
    TransitionResult::save(DraftSession::pending(topic, generation, ctx.now))
        .with_effect(Effect::notify(format!(
            "📝 Generating article for: \"{}\"",
            escape_html(topic)
        )))
        .with_effect(Effect::GenerateArticle {
            generation,
            topic: topic.to_string(),
        })
}

fn on_action(
    session: Option<&DraftSession>,
    ctx: &ChatContext,
    action: Action,
    message_ref: MessageRef,
) -> TransitionResult {
    // Nothing to act on
    let Some(s) = session else {
        return TransitionResult::unchanged();
    };
    let Some(draft) = &s.draft else {
        return TransitionResult::unchanged();
    };

    match s.phase {
        Phase::AwaitingTopic | Phase::Done => TransitionResult::unchanged(),
        Phase::Publishing => TransitionResult::unchanged().with_effect(Effect::notify(STILL_PUBLISHING)),
        Phase::ArticleReady | Phase::AwaitingEdit => match action {
            Action::ConfirmArticle => {
                // Publishing takes a fresh generation so any regeneration still
                // in flight can no longer land on this session.
                let generation = ctx.next_generation(session);
                let next = DraftSession {
                    phase: Phase::Publishing,
                    generation,
                    render_target: None,
                    updated_at: ctx.now,
                    ..s.clone()
                };
                TransitionResult::save(next)
                    .with_effect(Effect::notify(GENERATING_COVER))
                    .with_effect(Effect::GenerateCoverImage {
                        generation,
                        body: draft.body.clone(),
                    })
            }
            Action::RegenerateArticle => {
                let generation = ctx.next_generation(session);
                // Buttons on an older message get the new draft as a fresh message
                let render_target = (s.draft_message == Some(message_ref)).then_some(message_ref);
                let next = DraftSession {
                    phase: Phase::ArticleReady,
                    generation,
                    render_target,
                    updated_at: ctx.now,
                    ..s.clone()
                };
                TransitionResult::save(next)
                    .with_effect(Effect::notify(REGENERATING))
                    .with_effect(Effect::GenerateArticle {
                        generation,
                        topic: s.topic.clone(),
                    })
            }
            Action::EditContent => {
                let next = DraftSession {
                    phase: Phase::AwaitingEdit,
                    updated_at: ctx.now,
                    ..s.clone()
                };
                TransitionResult::save(next).with_effect(Effect::notify(EDIT_PROMPT))
            }
        },
    }
}

// ============================================================
// Completions
// ============================================================

fn on_article_generated(session: &DraftSession, ctx: &ChatContext, draft: Draft) -> TransitionResult {
    let heading = if session.phase == Phase::AwaitingTopic {
        "📄 Here's your generated article:"
    } else {
        "📄 Here's your regenerated article:"
    };
    let text = render_article(heading, &draft);

    let effect = match (session.phase, session.render_target) {
        (Phase::ArticleReady, Some(message_ref)) => Effect::EditMessage {
            message_ref,
            text,
            buttons: Some(Keyboard::draft_actions()),
        },
        _ => Effect::notify_with_actions(text),
    };

    let next = DraftSession {
        draft: Some(draft),
        phase: Phase::ArticleReady,
        render_target: None,
        updated_at: ctx.now,
        ..session.clone()
    };
    TransitionResult::save(next).with_effect(effect)
}

fn revert_to_ready(session: &DraftSession, ctx: &ChatContext) -> TransitionResult {
    TransitionResult::save(DraftSession {
        phase: Phase::ArticleReady,
        updated_at: ctx.now,
        ..session.clone()
    })
}

// Helper functions

/// Resolve the session a completion belongs to, or report it stale
fn awaited(
    session: Option<&DraftSession>,
    generation: u64,
    phase_ok: impl Fn(Phase) -> bool,
) -> Result<&DraftSession, TransitionError> {
    match session {
        Some(s) if s.is_current(generation) && phase_ok(s.phase) => Ok(s),
        other => Err(stale(other, generation)),
    }
}

fn stale(session: Option<&DraftSession>, generation: u64) -> TransitionError {
    TransitionError::StaleResult {
        generation,
        current: session.map(|s| s.generation),
    }
}
