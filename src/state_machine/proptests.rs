//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across arbitrary event sequences,
//! including adapter completions that arrive late, twice, or out of order.

use super::state::*;
use super::transition::*;
use super::*;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context(last_generation: u64) -> ChatContext {
    ChatContext::new(
        last_generation,
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    )
}

/// Mirrors what the runtime does with a transition result
struct Harness {
    session: Option<DraftSession>,
    last_generation: u64,
}

impl Harness {
    fn new() -> Self {
        Self {
            session: None,
            last_generation: 0,
        }
    }

    fn feed(&mut self, event: Event) -> Result<TransitionResult, TransitionError> {
        let ctx = test_context(self.last_generation);
        let result = transition(self.session.as_ref(), &ctx, event)?;
        match &result.update {
            SessionUpdate::Unchanged => {}
            SessionUpdate::Save(s) => {
                self.last_generation = self.last_generation.max(s.generation);
                self.session = Some(s.clone());
            }
            SessionUpdate::Remove(_) => self.session = None,
        }
        Ok(result)
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::AwaitingTopic),
        Just(Phase::ArticleReady),
        Just(Phase::AwaitingEdit),
        Just(Phase::Publishing),
    ]
}

fn arb_draft() -> impl Strategy<Value = Draft> {
    (
        "[A-Za-z ]{1,20}",
        "[A-Za-z <>/b]{0,40}",
        proptest::collection::vec("[a-z]{1,6}", 0..4),
    )
        .prop_map(|(title, body, tags)| Draft::new(title, body, tags))
}

fn arb_session() -> impl Strategy<Value = DraftSession> {
    (
        "[a-z ]{1,20}",
        arb_draft(),
        arb_phase(),
        1u64..20,
        proptest::option::of((1i64..100).prop_map(MessageRef)),
        proptest::option::of((1i64..100).prop_map(MessageRef)),
    )
        .prop_map(|(topic, draft, phase, generation, render_target, draft_message)| DraftSession {
            topic,
            // Only the pending first draft has no content
            draft: (phase != Phase::AwaitingTopic).then_some(draft),
            phase,
            generation,
            render_target,
            draft_message,
            updated_at: test_context(0).now,
        })
}

fn arb_publishing_session() -> impl Strategy<Value = DraftSession> {
    (arb_session(), arb_draft()).prop_map(|(session, draft)| DraftSession {
        phase: Phase::Publishing,
        draft: Some(session.draft.unwrap_or(draft)),
        ..session
    })
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::ConfirmArticle),
        Just(Action::RegenerateArticle),
        Just(Action::EditContent),
    ]
}

fn arb_user_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Command {
            command: Command::Start
        }),
        Just(Event::Command {
            command: Command::Cancel
        }),
        Just(Event::Command {
            command: Command::Help
        }),
        "[a-z ]{0,20}".prop_map(|content| Event::Text { content }),
        (arb_action(), 1i64..100).prop_map(|(action, id)| Event::Action {
            action,
            message_ref: MessageRef(id),
        }),
    ]
}

fn arb_completion(max_generation: u64) -> impl Strategy<Value = Event> {
    let generation = 0..=max_generation;
    prop_oneof![
        (generation.clone(), arb_draft())
            .prop_map(|(generation, draft)| Event::ArticleGenerated { generation, draft }),
        generation.clone().prop_map(|generation| Event::ArticleFailed {
            generation,
            error: "failed".to_string()
        }),
        generation.clone().prop_map(|generation| Event::CoverImageReady {
            generation,
            image: None
        }),
        generation.clone().prop_map(|generation| Event::CoverImageFailed {
            generation,
            error: "failed".to_string()
        }),
        generation.clone().prop_map(|generation| Event::Published {
            generation,
            url: "https://blog.example/p".to_string()
        }),
        generation.prop_map(|generation| Event::PublishFailed {
            generation,
            error: "failed".to_string()
        }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => arb_user_event(),
        3 => arb_completion(25),
        1 => (-120i64..120).prop_map(|minutes| Event::IdleExpired {
            cutoff: test_context(0).now + Duration::minutes(minutes)
        }),
    ]
}

// ============================================================================
// State Validity Checkers
// ============================================================================

fn is_valid_session(session: &DraftSession) -> bool {
    match session.phase {
        // Pending first draft
        Phase::AwaitingTopic => session.draft.is_none(),
        Phase::ArticleReady | Phase::AwaitingEdit | Phase::Publishing => session.draft.is_some(),
        // Done is never stored
        Phase::Done => false,
    }
}

fn effects_are_valid(effects: &[Effect], after: Option<&DraftSession>) -> bool {
    effects.iter().all(|effect| match effect {
        Effect::GenerateArticle { generation, .. } => after.is_some_and(|s| {
            s.generation == *generation
                && matches!(
                    s.phase,
                    Phase::AwaitingTopic | Phase::ArticleReady | Phase::AwaitingEdit
                )
        }),
        Effect::GenerateCoverImage { generation, .. } | Effect::Publish { generation, .. } => {
            after.is_some_and(|s| s.generation == *generation && s.phase == Phase::Publishing)
        }
        Effect::SendMessage { .. } | Effect::EditMessage { .. } => true,
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Any event sequence leaves a well-formed session, and every adapter call
    // carries the generation of the session that will await it
    #[test]
    fn prop_transitions_preserve_validity(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut harness = Harness::new();

        for event in events {
            if let Ok(result) = harness.feed(event) {
                if let Some(session) = &harness.session {
                    prop_assert!(is_valid_session(session), "Invalid session: {:?}", session);
                }
                prop_assert!(
                    effects_are_valid(&result.effects, harness.session.as_ref()),
                    "Invalid effects for {:?}: {:?}",
                    harness.session,
                    result.effects
                );
            }
        }
    }

    // A completion whose generation does not match is rejected without side effects
    #[test]
    fn prop_stale_completions_are_dropped(
        session in arb_session(),
        offset in 1u64..5,
        event in arb_completion(0),
    ) {
        let stale_generation = session.generation.saturating_sub(offset);
        let event = match event {
            Event::ArticleGenerated { draft, .. } => Event::ArticleGenerated { generation: stale_generation, draft },
            Event::ArticleFailed { error, .. } => Event::ArticleFailed { generation: stale_generation, error },
            Event::CoverImageReady { image, .. } => Event::CoverImageReady { generation: stale_generation, image },
            Event::CoverImageFailed { error, .. } => Event::CoverImageFailed { generation: stale_generation, error },
            Event::Published { url, .. } => Event::Published { generation: stale_generation, url },
            Event::PublishFailed { error, .. } => Event::PublishFailed { generation: stale_generation, error },
            other => other,
        };

        let result = transition(Some(&session), &test_context(session.generation), event);
        prop_assert!(
            matches!(result, Err(TransitionError::StaleResult { .. })),
            "Stale completion accepted: {:?}",
            result
        );
    }

    // Completions for a chat without a session are always stale
    #[test]
    fn prop_completions_without_session_are_stale(event in arb_completion(25)) {
        let result = transition(None, &test_context(25), event);
        let is_stale = matches!(result, Err(TransitionError::StaleResult { current: None, .. }));
        prop_assert!(is_stale);
    }

    // Generations handed to the generator strictly increase
    #[test]
    fn prop_generations_strictly_increase(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut harness = Harness::new();
        let mut last_issued = 0u64;

        for event in events {
            if let Ok(result) = harness.feed(event) {
                let generate_calls = result.effects.iter().filter(|e| {
                    matches!(e, Effect::GenerateArticle { .. } | Effect::GenerateCoverImage { .. })
                });
                for generation in generate_calls.filter_map(Effect::generation) {
                    prop_assert!(
                        generation > last_issued,
                        "generation {} issued after {}",
                        generation,
                        last_issued
                    );
                    last_issued = generation;
                }
            }
        }
    }

    // Cancel always lands in AwaitingTopic and is idempotent
    #[test]
    fn prop_cancel_always_resets(session in proptest::option::of(arb_session())) {
        let ctx = test_context(30);
        let cancel = Event::Command { command: Command::Cancel };

        let result = transition(session.as_ref(), &ctx, cancel.clone()).unwrap();
        prop_assert_eq!(result.phase_after(session.as_ref()), Phase::AwaitingTopic);
        prop_assert!(result.effects.iter().all(|e| !e.is_adapter_call()));

        let again = transition(None, &ctx, cancel).unwrap();
        prop_assert_eq!(again.update, SessionUpdate::Unchanged);
        prop_assert_eq!(again.effects, result.effects);
    }

    // Publishing only ever exits through a publisher completion, a cover image
    // failure, or a reset command
    #[test]
    fn prop_publishing_ignores_user_input(
        session in arb_publishing_session(),
        event in arb_user_event(),
    ) {
        let is_reset = matches!(
            event,
            Event::Command { command: Command::Start | Command::Cancel }
        );
        let result = transition(Some(&session), &test_context(session.generation), event).unwrap();
        if !is_reset {
            prop_assert_eq!(result.update, SessionUpdate::Unchanged);
            prop_assert!(result.effects.iter().all(|e| !e.is_adapter_call()));
        }
    }

    // A failed publish never loses the draft
    #[test]
    fn prop_publish_failure_keeps_draft(
        session in arb_publishing_session(),
    ) {
        let result = transition(
            Some(&session),
            &test_context(session.generation),
            Event::PublishFailed { generation: session.generation, error: "boom".to_string() },
        ).unwrap();
        match result.update {
            SessionUpdate::Save(reverted) => {
                prop_assert_eq!(reverted.phase, Phase::ArticleReady);
                prop_assert_eq!(reverted.draft, session.draft);
                prop_assert_eq!(reverted.generation, session.generation);
            }
            other => prop_assert!(false, "expected Save, got {:?}", other),
        }
    }
}
