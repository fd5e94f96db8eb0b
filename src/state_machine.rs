//! Per-chat conversation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! the runtime feeds events in, applies the returned session update and
//! executes the returned effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, Keyboard};
pub use event::{Action, Command, Event};
pub use state::{ChatContext, ChatId, Draft, DraftSession, ImageRef, MessageRef, Phase};
pub use transition::{transition, SessionUpdate, TransitionError};
