//! Request orchestration: session lookup, grounding, conversation, history.

use crate::conversation::{BotReply, ConversationGateway};
use crate::error::ChatError;
use crate::grounding::{ImageAsset, ImageGrounding};
use crate::session::{Session, SessionRegistry, Turn};
use std::sync::Arc;

/// Ties the registry, gateway and grounding pipeline together.
#[derive(Clone)]
pub struct ChatService {
    registry: SessionRegistry,
    gateway: ConversationGateway,
    grounding: ImageGrounding,
}

impl ChatService {
    pub fn new(
        registry: SessionRegistry,
        gateway: ConversationGateway,
        grounding: ImageGrounding,
    ) -> Self {
        Self {
            registry,
            gateway,
            grounding,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Plain text turn.
    pub async fn ask(&self, user_id: &str, question: &str) -> Result<BotReply, ChatError> {
        let user_id = require("id", user_id)?;
        let question = require("q", question)?;

        let session = self.registry.get_or_create(user_id);
        self.run_turn(&session, question).await
    }

    /// Image turn. Grounding finishes before the session is resolved, so a
    /// failed fetch, decode or classification creates and records nothing.
    pub async fn ask_about_image(
        &self,
        user_id: &str,
        question: &str,
        asset: ImageAsset,
    ) -> Result<BotReply, ChatError> {
        let user_id = require("id", user_id)?;
        let question = require("q", question)?;

        let prompt = self.grounding.ground(question, asset).await?;

        let session = self.registry.get_or_create(user_id);
        self.run_turn(&session, &prompt).await
    }

    async fn run_turn(&self, session: &Arc<Session>, prompt: &str) -> Result<BotReply, ChatError> {
        let _turn = session.begin_turn().await;

        // The question is recorded even if no answer comes back.
        session.append(Turn::user(prompt)).await;

        let reply = self.gateway.send(session.conversation(), prompt).await?;
        session.append(Turn::bot(&reply.text)).await;

        let history = session.history_len().await;
        tracing::info!(session_id = %session.id(), history, "Turn completed");
        Ok(reply)
    }
}

/// Empty parameters count as missing.
fn require<'a>(name: &str, value: &'a str) -> Result<&'a str, ChatError> {
    if value.is_empty() {
        Err(ChatError::Validation(format!("Missing required parameter: {name}")))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::testing::EchoProvider;
    use crate::grounding::decode::png_fixture;
    use crate::grounding::testing::{StaticClassifier, StaticFetcher};
    use crate::session::Speaker;
    use parley_common::SessionConfig;

    struct Harness {
        service: ChatService,
        provider: Arc<EchoProvider>,
    }

    fn harness_with(provider: EchoProvider, fetcher: StaticFetcher) -> Harness {
        let provider = Arc::new(provider);
        let gateway = ConversationGateway::new(provider.clone());
        let registry = SessionRegistry::new(gateway.clone(), SessionConfig::default(), 25);
        let grounding = ImageGrounding::new(
            Arc::new(fetcher),
            Arc::new(StaticClassifier::labels(&[
                ("cat", 0.9),
                ("sofa", 0.6),
                ("pillow", 0.3),
            ])),
            3,
        );
        Harness {
            service: ChatService::new(registry, gateway, grounding),
            provider,
        }
    }

    fn harness() -> Harness {
        harness_with(EchoProvider::default(), StaticFetcher::ok(png_fixture(2, 2)))
    }

    #[tokio::test]
    async fn test_ask_records_user_then_bot() {
        let h = harness();
        let reply = h.service.ask("u1", "Hello").await.unwrap();
        assert_eq!(reply.text, "echo: Hello");

        let history = h.service.registry().get("u1").unwrap().history().await;
        assert_eq!(history.len(), 2);
        assert_eq!((history[0].speaker, history[0].text.as_str()), (Speaker::User, "Hello"));
        assert_eq!(
            (history[1].speaker, history[1].text.as_str()),
            (Speaker::Bot, "echo: Hello")
        );
    }

    #[tokio::test]
    async fn test_history_bounded_after_many_turns() {
        let h = harness();
        for i in 0..30 {
            h.service.ask("u1", &format!("q{i}")).await.unwrap();
        }

        let history = h.service.registry().get("u1").unwrap().history().await;
        assert_eq!(history.len(), 25);
        // 60 turns written, the oldest 35 dropped: starts at the bot reply to q17
        assert_eq!(history[0].text, "echo: q17");
        assert_eq!(history[24].text, "echo: q29");
        // The external conversation still saw every message.
        assert_eq!(h.provider.all_sent().len(), 30);
    }

    #[tokio::test]
    async fn test_conversation_failure_keeps_user_turn() {
        let h = harness_with(EchoProvider::failing(), StaticFetcher::ok(Vec::new()));
        let err = h.service.ask("u1", "Hello").await.unwrap_err();
        assert!(matches!(err, ChatError::Conversation(_)));

        let history = h.service.registry().get("u1").unwrap().history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].speaker, Speaker::User);
    }

    #[tokio::test]
    async fn test_missing_parameters_rejected_without_session() {
        let h = harness();
        assert!(matches!(
            h.service.ask("", "Hello").await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            h.service.ask("u1", "").await,
            Err(ChatError::Validation(_))
        ));
        assert!(h.service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_question_is_forwarded() {
        let h = harness();
        let reply = h.service.ask("u1", "   ").await.unwrap();
        assert_eq!(reply.text, "echo:    ");
        assert_eq!(h.provider.all_sent(), vec!["   "]);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_turn_futures_are_send() {
        // axum handlers need Send futures
        let h = harness();
        assert_send(&h.service.ask("u1", "Hello"));
        let asset = ImageAsset::uploaded(png_fixture(2, 2), None);
        assert_send(&h.service.ask_about_image("u1", "What?", asset));
    }

    #[tokio::test]
    async fn test_image_turn_sends_grounded_prompt() {
        let h = harness();
        let asset = ImageAsset::remote("https://images.example.com/cat.png").unwrap();
        h.service
            .ask_about_image("u2", "What is this?", asset)
            .await
            .unwrap();

        assert_eq!(
            h.provider.all_sent(),
            vec!["The image contains: cat, sofa, pillow. What is this?"]
        );
        let history = h.service.registry().get("u2").unwrap().history().await;
        assert_eq!(
            history[0].text,
            "The image contains: cat, sofa, pillow. What is this?"
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_no_trace() {
        let h = harness_with(EchoProvider::default(), StaticFetcher::failing("HTTP 404"));
        let asset = ImageAsset::remote("https://images.example.com/gone.png").unwrap();
        let err = h
            .service
            .ask_about_image("u2", "What is this?", asset)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::ImageFetch(_)));
        assert!(h.service.registry().get("u2").is_none());
        assert!(h.provider.all_sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_existing_session_unmodified() {
        let h = harness_with(EchoProvider::default(), StaticFetcher::failing("HTTP 404"));
        h.service.ask("u2", "Hello").await.unwrap();

        let asset = ImageAsset::remote("https://images.example.com/gone.png").unwrap();
        assert!(h
            .service
            .ask_about_image("u2", "What is this?", asset)
            .await
            .is_err());

        let history = h.service.registry().get("u2").unwrap().history().await;
        assert_eq!(history.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_session_turns_stay_paired() {
        let h = harness();
        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let service = h.service.clone();
                tokio::spawn(async move { service.ask("shared", &format!("m{i}")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let history = h.service.registry().get("shared").unwrap().history().await;
        assert_eq!(history.len(), 20);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].speaker, Speaker::User);
            assert_eq!(pair[1].text, format!("echo: {}", pair[0].text));
        }
    }
}
