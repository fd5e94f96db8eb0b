//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{RuntimeManager, Timeouts};
use crate::generator::{ContentGenerator, GenerationError};
use crate::publisher::{Post, PublishError, Publisher};
use crate::state_machine::{
    Action, ChatId, Command, Draft, DraftSession, Event, ImageRef, Keyboard, MessageRef,
};
use crate::store::InMemorySessionStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A canned adapter answer, optionally delivered late
struct Scripted<T> {
    delay: Duration,
    result: T,
}

// ============================================================================
// Mock Generator
// ============================================================================

/// Mock generator that returns queued drafts and images in call order
pub struct MockGenerator {
    articles: Mutex<VecDeque<Scripted<Result<Draft, GenerationError>>>>,
    images: Mutex<VecDeque<Scripted<Result<Option<ImageRef>, GenerationError>>>>,
    /// Topics of every article request, in call order
    pub topics: Mutex<Vec<String>>,
    /// Bodies of every cover image request
    pub image_requests: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            articles: Mutex::new(VecDeque::new()),
            images: Mutex::new(VecDeque::new()),
            topics: Mutex::new(Vec::new()),
            image_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_article(&self, draft: Draft) {
        self.queue_article_after(Duration::ZERO, draft);
    }

    /// Queue a draft that is only returned after `delay`
    pub fn queue_article_after(&self, delay: Duration, draft: Draft) {
        self.articles.lock().unwrap().push_back(Scripted {
            delay,
            result: Ok(draft),
        });
    }

    pub fn queue_article_error(&self, error: GenerationError) {
        self.articles.lock().unwrap().push_back(Scripted {
            delay: Duration::ZERO,
            result: Err(error),
        });
    }

    pub fn queue_image(&self, image: Option<ImageRef>) {
        self.images.lock().unwrap().push_back(Scripted {
            delay: Duration::ZERO,
            result: Ok(image),
        });
    }

    pub fn queue_image_error(&self, error: GenerationError) {
        self.images.lock().unwrap().push_back(Scripted {
            delay: Duration::ZERO,
            result: Err(error),
        });
    }

    pub fn article_calls(&self) -> usize {
        self.topics.lock().unwrap().len()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn generate_article(&self, topic: &str) -> Result<Draft, GenerationError> {
        self.topics.lock().unwrap().push(topic.to_string());
        let script = self.articles.lock().unwrap().pop_front();
        let Some(script) = script else {
            return Err(GenerationError::network("No mock article queued"));
        };
        tokio::time::sleep(script.delay).await;
        script.result
    }

    async fn generate_cover_image(&self, body: &str) -> Result<Option<ImageRef>, GenerationError> {
        self.image_requests.lock().unwrap().push(body.to_string());
        let script = self.images.lock().unwrap().pop_front();
        let Some(script) = script else {
            return Err(GenerationError::network("No mock image queued"));
        };
        tokio::time::sleep(script.delay).await;
        script.result
    }
}

// ============================================================================
// Mock Publisher
// ============================================================================

/// Mock publisher that returns queued outcomes and records every post
pub struct MockPublisher {
    results: Mutex<VecDeque<Result<String, PublishError>>>,
    /// Record of all posts handed to the publisher
    pub posts: Mutex<Vec<Post>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_url(&self, url: impl Into<String>) {
        self.results.lock().unwrap().push_back(Ok(url.into()));
    }

    pub fn queue_error(&self, error: PublishError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, post: &Post) -> Result<String, PublishError> {
        self.posts.lock().unwrap().push(post.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PublishError::network("No mock result queued")))
    }
}

// ============================================================================
// Recording Outbox
// ============================================================================

/// A message as the transport received it
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub message_ref: MessageRef,
    pub text: String,
    pub buttons: Option<Keyboard>,
    /// Whether this replaced an earlier message rather than adding one
    pub edited: bool,
}

/// Outbox that keeps everything it is asked to deliver
pub struct RecordingOutbox {
    messages: Mutex<Vec<OutboundMessage>>,
    next_ref: AtomicI64,
    fail_edits: AtomicBool,
    send_delay: Mutex<Duration>,
    /// Notified after every recorded message
    pub updated: Arc<Notify>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            next_ref: AtomicI64::new(100),
            fail_edits: AtomicBool::new(false),
            send_delay: Mutex::new(Duration::ZERO),
            updated: Arc::new(Notify::new()),
        }
    }

    /// Make every edit fail, as when the original message was deleted
    pub fn fail_edits(&self) {
        self.fail_edits.store(true, Ordering::SeqCst);
    }

    /// Make every send take `delay`, as with a slow Bot API
    pub fn slow_sends(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub fn messages(&self, chat_id: ChatId) -> Vec<OutboundMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn find(&self, chat_id: ChatId, needle: &str) -> Option<OutboundMessage> {
        self.messages(chat_id)
            .into_iter()
            .rev()
            .find(|m| m.text.contains(needle))
    }

    /// Wait until a message containing `needle` reaches the chat
    pub async fn wait_for(
        &self,
        chat_id: ChatId,
        needle: &str,
        timeout: Duration,
    ) -> Option<OutboundMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Some(found) = self.find(chat_id, needle) {
                return Some(found);
            }
            let _ = tokio::time::timeout(Duration::from_millis(20), self.updated.notified()).await;
        }
        self.find(chat_id, needle)
    }

    fn record(&self, message: OutboundMessage) {
        self.messages.lock().unwrap().push(message);
        self.updated.notify_waiters();
    }
}

impl Default for RecordingOutbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<MessageRef, String> {
        let delay = *self.send_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let message_ref = MessageRef(self.next_ref.fetch_add(1, Ordering::SeqCst));
        self.record(OutboundMessage {
            chat_id,
            message_ref,
            text: text.to_string(),
            buttons: buttons.cloned(),
            edited: false,
        });
        Ok(message_ref)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_ref: MessageRef,
        text: &str,
        buttons: Option<&Keyboard>,
    ) -> Result<(), String> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err("Bad Request: message to edit not found".to_string());
        }
        self.record(OutboundMessage {
            chat_id,
            message_ref,
            text: text.to_string(),
            buttons: buttons.cloned(),
            edited: true,
        });
        Ok(())
    }
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

pub type MockRuntimeManager =
    RuntimeManager<InMemorySessionStore, MockGenerator, MockPublisher, RecordingOutbox>;

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime {
    pub manager: Arc<MockRuntimeManager>,
    pub store: Arc<InMemorySessionStore>,
    pub generator: Arc<MockGenerator>,
    pub publisher: Arc<MockPublisher>,
    pub outbox: Arc<RecordingOutbox>,
    pub chat_id: ChatId,
}

pub struct TestRuntimeBuilder {
    chat_id: ChatId,
    generator: Option<MockGenerator>,
    publisher: Option<MockPublisher>,
    timeouts: Timeouts,
}

impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder::new()
    }
}

impl TestRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            chat_id: ChatId(4242),
            generator: None,
            publisher: None,
            timeouts: Timeouts {
                generation: Duration::from_secs(5),
                publish: Duration::from_secs(5),
            },
        }
    }

    pub fn generator(mut self, generator: MockGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn publisher(mut self, publisher: MockPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> TestRuntime {
        let store = Arc::new(InMemorySessionStore::new());
        let generator = Arc::new(self.generator.unwrap_or_default());
        let publisher = Arc::new(self.publisher.unwrap_or_default());
        let outbox = Arc::new(RecordingOutbox::new());

        let manager = Arc::new(RuntimeManager::new(
            store.clone(),
            generator.clone(),
            publisher.clone(),
            outbox.clone(),
            self.timeouts,
        ));

        TestRuntime {
            manager,
            store,
            generator,
            publisher,
            outbox,
            chat_id: self.chat_id,
        }
    }
}

impl Default for TestRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

const WAIT: Duration = Duration::from_secs(2);

impl TestRuntime {
    pub async fn send_text(&self, text: &str) {
        self.manager
            .dispatch(
                self.chat_id,
                Event::Text {
                    content: text.to_string(),
                },
            )
            .await
            .expect("Failed to send text");
    }

    pub async fn send_command(&self, command: Command) {
        self.manager
            .dispatch(self.chat_id, Event::Command { command })
            .await
            .expect("Failed to send command");
    }

    pub async fn click(&self, action: Action, message_ref: MessageRef) {
        self.manager
            .dispatch(
                self.chat_id,
                Event::Action {
                    action,
                    message_ref,
                },
            )
            .await
            .expect("Failed to send action");
    }

    pub async fn wait_for_message(&self, needle: &str) -> Option<OutboundMessage> {
        self.outbox.wait_for(self.chat_id, needle, WAIT).await
    }

    pub async fn session(&self) -> Option<DraftSession> {
        self.store.get(self.chat_id).await.expect("store read failed")
    }

    /// Wait until exactly `expected` chats have a live runtime
    pub async fn wait_for_active_chats(&self, expected: usize) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.manager.active_chats().await == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.manager.active_chats().await == expected
    }

    pub fn texts(&self) -> Vec<String> {
        self.outbox
            .messages(self.chat_id)
            .into_iter()
            .map(|m| m.text)
            .collect()
    }
}

/// Poll until `cond` holds or the wait runs out
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Phase;
    use chrono::{TimeDelta, Utc};

    fn coffee() -> Draft {
        Draft::new(
            "The Art of Coffee",
            "<strong>Coffee</strong> is great.<br>",
            vec!["coffee".to_string(), "drinks".to_string()],
        )
    }

    fn tea() -> Draft {
        Draft::new("All About Tea", "<em>Tea</em> is calm.", vec!["tea".to_string()])
    }

    /// Topic in, published URL out
    #[tokio::test]
    async fn test_coffee_topic_to_published_post() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_image(Some(ImageRef("https://img.example/c.png".to_string())));
        let publisher = MockPublisher::new();
        publisher.queue_url("https://blog.example/2024/coffee.html");

        let rt = TestRuntime::builder()
            .generator(generator)
            .publisher(publisher)
            .build();

        rt.send_text("coffee").await;
        assert!(rt.wait_for_message("Generating article for: \"coffee\"").await.is_some());

        let article = rt
            .wait_for_message("Here's your generated article:")
            .await
            .expect("article never arrived");
        assert!(article.text.contains("<b>Title:</b> The Art of Coffee"));
        assert_eq!(article.buttons, Some(Keyboard::draft_actions()));

        let session = rt.session().await.expect("session missing");
        assert_eq!(session.phase, Phase::ArticleReady);
        assert_eq!(session.draft, Some(coffee()));

        rt.click(Action::ConfirmArticle, article.message_ref).await;
        assert!(rt
            .wait_for_message("Published successfully!\nhttps://blog.example/2024/coffee.html")
            .await
            .is_some());

        let texts = rt.texts();
        let cover = texts.iter().position(|t| t.contains("Generating cover image"));
        let publishing = texts.iter().position(|t| t.contains("Publishing to Blogger"));
        assert!(cover.is_some() && cover < publishing);

        let posts = rt.publisher.recorded_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "The Art of Coffee");
        assert_eq!(posts[0].tags, vec!["coffee", "drinks"]);
        assert!(posts[0]
            .body
            .starts_with("<img src=\"https://img.example/c.png\""));
        assert!(posts[0].body.ends_with("<strong>Coffee</strong> is great.<br>"));

        assert!(wait_until(|| rt.generator.image_requests.lock().unwrap().len() == 1).await);
        assert_eq!(rt.session().await, None);
    }

    /// A result for a cancelled topic must not touch the new one
    #[tokio::test]
    async fn test_late_result_after_cancel_is_dropped() {
        let generator = MockGenerator::new();
        generator.queue_article_after(
            Duration::from_millis(300),
            Draft::new("Old Coffee", "stale", vec![]),
        );
        generator.queue_article(tea());

        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        assert!(wait_until(|| rt.generator.article_calls() == 1).await);

        rt.send_command(Command::Cancel).await;
        assert!(rt.wait_for_message("Process canceled").await.is_some());

        rt.send_text("tea").await;
        assert!(rt.wait_for_message("All About Tea").await.is_some());

        // Let the slow coffee result arrive
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(rt.outbox.find(rt.chat_id, "Old Coffee").is_none());
        let session = rt.session().await.expect("session missing");
        assert_eq!(session.topic, "tea");
        assert_eq!(session.draft, Some(tea()));
        assert_eq!(session.phase, Phase::ArticleReady);
    }

    #[tokio::test]
    async fn test_confirm_without_image_publishes_plain_body() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_image(None);
        let publisher = MockPublisher::new();
        publisher.queue_url("https://blog.example/coffee");

        let rt = TestRuntime::builder()
            .generator(generator)
            .publisher(publisher)
            .build();

        rt.send_text("coffee").await;
        let article = rt.wait_for_message("generated article").await.unwrap();
        rt.click(Action::ConfirmArticle, article.message_ref).await;

        assert!(rt.wait_for_message("Published successfully!").await.is_some());
        let posts = rt.publisher.recorded_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].body, coffee().body);
        assert_eq!(rt.session().await, None);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_draft_for_retry() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_image(None);
        generator.queue_image(None);
        let publisher = MockPublisher::new();
        publisher.queue_error(PublishError::rejected("Blog not found"));
        publisher.queue_url("https://blog.example/coffee");

        let rt = TestRuntime::builder()
            .generator(generator)
            .publisher(publisher)
            .build();

        rt.send_text("coffee").await;
        let article = rt.wait_for_message("generated article").await.unwrap();
        rt.click(Action::ConfirmArticle, article.message_ref).await;

        let failure = rt
            .wait_for_message("Failed to publish post")
            .await
            .expect("failure notice missing");
        assert_eq!(failure.buttons, Some(Keyboard::draft_actions()));

        let session = rt.session().await.expect("draft was dropped");
        assert_eq!(session.phase, Phase::ArticleReady);
        assert_eq!(session.draft, Some(coffee()));

        rt.click(Action::ConfirmArticle, failure.message_ref).await;
        assert!(rt.wait_for_message("Published successfully!").await.is_some());
        assert_eq!(rt.publisher.recorded_posts().len(), 2);
        assert_eq!(rt.session().await, None);
    }

    #[tokio::test]
    async fn test_cover_image_failure_reverts_to_ready() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_image_error(GenerationError::rate_limit("quota"));

        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        let article = rt.wait_for_message("generated article").await.unwrap();
        rt.click(Action::ConfirmArticle, article.message_ref).await;

        assert!(rt.wait_for_message("cover image").await.is_some());
        assert!(rt
            .wait_for_message("Failed to generate the cover image")
            .await
            .is_some());
        assert_eq!(rt.session().await.unwrap().phase, Phase::ArticleReady);
        assert!(rt.publisher.recorded_posts().is_empty());
    }

    #[tokio::test]
    async fn test_regenerate_replaces_article_in_place() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_article(Draft::new("Coffee, Again", "<b>New</b> take", vec![]));

        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        let article = rt.wait_for_message("generated article").await.unwrap();
        rt.click(Action::RegenerateArticle, article.message_ref).await;

        let regenerated = rt
            .wait_for_message("Here's your regenerated article:")
            .await
            .expect("regenerated article missing");
        assert!(regenerated.edited);
        assert_eq!(regenerated.message_ref, article.message_ref);
        assert!(regenerated.text.contains("<b>Title:</b> Coffee, Again"));
        assert_eq!(regenerated.buttons, Some(Keyboard::draft_actions()));

        let topics = rt.generator.topics.lock().unwrap().clone();
        assert_eq!(topics, vec!["coffee", "coffee"]);
        let session = rt.session().await.unwrap();
        assert_eq!(session.render_target, None);
        assert_eq!(session.draft.unwrap().title, "Coffee, Again");
    }

    /// Regenerate clicked twice: only the second draft may land
    #[tokio::test]
    async fn test_second_regenerate_supersedes_slow_first() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_article_after(
            Duration::from_millis(300),
            Draft::new("Slow Coffee", "slow take", vec![]),
        );
        generator.queue_article(Draft::new("Fast Coffee", "fast take", vec![]));

        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        let article = rt.wait_for_message("generated article").await.unwrap();

        rt.click(Action::RegenerateArticle, article.message_ref).await;
        assert!(wait_until(|| rt.generator.article_calls() == 2).await);
        rt.click(Action::RegenerateArticle, article.message_ref).await;

        let regenerated = rt
            .wait_for_message("<b>Title:</b> Fast Coffee")
            .await
            .expect("second regeneration missing");
        assert!(regenerated.edited);
        assert_eq!(regenerated.message_ref, article.message_ref);

        let session = rt.session().await.unwrap();
        assert_eq!(session.generation, 3);
        assert_eq!(session.draft.as_ref().unwrap().title, "Fast Coffee");
        let sent = rt.outbox.messages(rt.chat_id).len();

        // Let the slow first regeneration finish
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(rt.outbox.find(rt.chat_id, "Slow Coffee").is_none());
        assert_eq!(rt.outbox.messages(rt.chat_id).len(), sent);
        assert_eq!(rt.session().await, Some(session));
    }

    /// Buttons left on a cancelled session's message must not overwrite it
    #[tokio::test]
    async fn test_regenerate_on_old_session_message_sends_new_draft() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_article(tea());
        generator.queue_article(Draft::new("Tea, Again", "<em>More</em> tea", vec![]));

        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        let coffee_article = rt.wait_for_message("The Art of Coffee").await.unwrap();
        rt.send_command(Command::Cancel).await;
        assert!(rt.wait_for_message("Process canceled").await.is_some());

        rt.send_text("tea").await;
        let tea_article = rt.wait_for_message("All About Tea").await.unwrap();

        rt.click(Action::RegenerateArticle, coffee_article.message_ref).await;
        let regenerated = rt.wait_for_message("Tea, Again").await.unwrap();
        assert!(!regenerated.edited);
        assert_ne!(regenerated.message_ref, coffee_article.message_ref);
        assert_ne!(regenerated.message_ref, tea_article.message_ref);

        let coffee_edits = rt
            .outbox
            .messages(rt.chat_id)
            .into_iter()
            .filter(|m| m.message_ref == coffee_article.message_ref && m.edited)
            .count();
        assert_eq!(coffee_edits, 0);
    }

    #[tokio::test]
    async fn test_failed_edit_falls_back_to_new_message() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_article(Draft::new("Coffee, Again", "New take", vec![]));

        let rt = TestRuntime::builder().generator(generator).build();
        rt.outbox.fail_edits();

        rt.send_text("coffee").await;
        let article = rt.wait_for_message("generated article").await.unwrap();
        rt.click(Action::RegenerateArticle, article.message_ref).await;

        let regenerated = rt.wait_for_message("regenerated article").await.unwrap();
        assert!(!regenerated.edited);
        assert_ne!(regenerated.message_ref, article.message_ref);
    }

    #[tokio::test]
    async fn test_edit_content_regenerates_from_new_topic() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_article(tea());

        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        let article = rt.wait_for_message("generated article").await.unwrap();
        rt.click(Action::EditContent, article.message_ref).await;
        assert!(rt.wait_for_message("Send the updated topic").await.is_some());
        assert_eq!(rt.session().await.unwrap().phase, Phase::AwaitingEdit);

        rt.send_text("tea instead").await;
        let updated = rt.wait_for_message("All About Tea").await.unwrap();
        assert!(updated.text.contains("regenerated article"));

        let session = rt.session().await.unwrap();
        assert_eq!(session.topic, "tea instead");
        assert_eq!(session.phase, Phase::ArticleReady);
    }

    #[tokio::test]
    async fn test_generation_failure_clears_pending_session() {
        let generator = MockGenerator::new();
        generator.queue_article_error(GenerationError::malformed("not JSON"));

        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        assert!(rt.wait_for_message("Failed to generate article").await.is_some());
        assert_eq!(rt.session().await, None);
    }

    #[tokio::test]
    async fn test_slow_generation_times_out() {
        let generator = MockGenerator::new();
        generator.queue_article_after(Duration::from_secs(5), coffee());

        let rt = TestRuntime::builder()
            .generator(generator)
            .timeouts(Timeouts {
                generation: Duration::from_millis(50),
                publish: Duration::from_secs(1),
            })
            .build();

        rt.send_text("coffee").await;
        assert!(rt.wait_for_message("Failed to generate article").await.is_some());
        assert_eq!(rt.session().await, None);
        assert!(rt.outbox.find(rt.chat_id, "The Art of Coffee").is_none());
    }

    #[tokio::test]
    async fn test_user_input_while_publishing_is_deferred() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        generator.queue_image(None);
        let publisher = MockPublisher::new();
        publisher.queue_url("https://blog.example/coffee");

        let rt = TestRuntime::builder()
            .generator(generator)
            .publisher(publisher)
            .build();

        rt.send_text("coffee").await;
        let article = rt.wait_for_message("generated article").await.unwrap();
        rt.click(Action::ConfirmArticle, article.message_ref).await;
        // Queued behind the confirm in the same chat
        rt.click(Action::RegenerateArticle, article.message_ref).await;

        assert!(rt.wait_for_message("Published successfully!").await.is_some());
        assert_eq!(rt.generator.article_calls(), 1);
        assert_eq!(rt.publisher.recorded_posts().len(), 1);
    }

    #[tokio::test]
    async fn test_chats_do_not_block_each_other() {
        let generator = MockGenerator::new();
        generator.queue_article_after(Duration::from_millis(500), coffee());
        generator.queue_article(tea());

        let rt = TestRuntime::builder().generator(generator).build();
        let other = ChatId(7);

        rt.send_text("coffee").await;
        assert!(wait_until(|| rt.generator.article_calls() == 1).await);

        rt.manager
            .dispatch(
                other,
                Event::Text {
                    content: "tea".to_string(),
                },
            )
            .await
            .unwrap();

        let tea_article = rt
            .outbox
            .wait_for(other, "All About Tea", Duration::from_millis(300))
            .await;
        assert!(tea_article.is_some());
        // Chat one is still waiting on its slow draft
        assert!(rt.outbox.find(rt.chat_id, "The Art of Coffee").is_none());
        assert_eq!(rt.session().await.unwrap().phase, Phase::AwaitingTopic);

        assert!(rt.wait_for_message("The Art of Coffee").await.is_some());
    }

    #[tokio::test]
    async fn test_busy_chat_does_not_hold_up_dispatch() {
        let rt = TestRuntime::builder().build();
        rt.outbox.slow_sends(Duration::from_millis(50));
        let busy = ChatId(1);

        let started = std::time::Instant::now();
        for _ in 0..40 {
            rt.manager
                .dispatch(
                    busy,
                    Event::Command {
                        command: Command::Help,
                    },
                )
                .await
                .unwrap();
        }
        rt.send_command(Command::Help).await;
        // Draining the busy chat takes two seconds
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(rt.wait_for_message("/cancel drops").await.is_some());
        assert!(rt.outbox.messages(busy).len() < 40);
    }

    #[tokio::test]
    async fn test_runtimes_end_when_chat_goes_quiet() {
        let generator = MockGenerator::new();
        generator.queue_article(coffee());
        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        assert!(rt.wait_for_message("generated article").await.is_some());

        for id in 0..200 {
            rt.manager
                .dispatch(
                    ChatId(id),
                    Event::Command {
                        command: Command::Cancel,
                    },
                )
                .await
                .unwrap();
        }
        assert!(wait_until(|| (0..200).all(|id| !rt.outbox.messages(ChatId(id)).is_empty())).await);

        // Only the chat holding a draft keeps its runtime
        assert!(rt.wait_for_active_chats(1).await);

        rt.send_command(Command::Cancel).await;
        assert!(rt.wait_for_message("Process canceled").await.is_some());
        assert!(rt.wait_for_active_chats(0).await);

        // A retired chat starts over on its next event
        rt.manager
            .dispatch(
                ChatId(3),
                Event::Command {
                    command: Command::Help,
                },
            )
            .await
            .unwrap();
        assert!(rt
            .outbox
            .wait_for(ChatId(3), "/cancel drops", WAIT)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_runtime_waits_for_cancelled_call() {
        let generator = MockGenerator::new();
        generator.queue_article_after(Duration::from_millis(200), coffee());
        let rt = TestRuntime::builder().generator(generator).build();

        rt.send_text("coffee").await;
        assert!(wait_until(|| rt.generator.article_calls() == 1).await);
        rt.send_command(Command::Cancel).await;
        assert!(rt.wait_for_message("Process canceled").await.is_some());

        // The generator call is still out
        assert_eq!(rt.manager.active_chats().await, 1);

        assert!(rt.wait_for_active_chats(0).await);
        assert!(rt.outbox.find(rt.chat_id, "The Art of Coffee").is_none());
        assert_eq!(rt.session().await, None);
    }

    #[tokio::test]
    async fn test_idle_sweep_expires_ready_draft() {
        let rt = TestRuntime::builder().build();
        let stale = Utc::now() - TimeDelta::hours(2);
        rt.store
            .set(
                rt.chat_id,
                DraftSession {
                    topic: "coffee".to_string(),
                    draft: Some(coffee()),
                    phase: Phase::ArticleReady,
                    generation: 1,
                    render_target: None,
                    draft_message: None,
                    updated_at: stale,
                },
            )
            .await
            .unwrap();

        let swept = rt.manager.sweep_idle(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(swept, 1);
        assert!(rt.wait_for_message("expired").await.is_some());
        assert_eq!(rt.session().await, None);
    }

    #[tokio::test]
    async fn test_idle_sweep_spares_publishing_and_fresh_sessions() {
        let rt = TestRuntime::builder().build();
        let stale = Utc::now() - TimeDelta::hours(2);
        let publishing = DraftSession {
            topic: "coffee".to_string(),
            draft: Some(coffee()),
            phase: Phase::Publishing,
            generation: 3,
            render_target: None,
            draft_message: None,
            updated_at: stale,
        };
        rt.store.set(rt.chat_id, publishing.clone()).await.unwrap();
        rt.store
            .set(ChatId(9), DraftSession::pending("tea", 1, Utc::now()))
            .await
            .unwrap();

        rt.manager.sweep_idle(Duration::from_secs(3600)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(rt.session().await, Some(publishing));
        assert!(rt.store.get(ChatId(9)).await.unwrap().is_some());
        assert!(rt.texts().is_empty());
    }
}
