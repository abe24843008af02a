use std::sync::Arc;

use tracing::{error, info, warn};

use crate::completion::{CompletionClient, CompletionProfile, CompletionRequest};
use crate::error::{ChatError, Result, StoreError};
use crate::prompting::render_chat_system_prompt;
use crate::registry::{normalize_session_id, SessionRegistry};
use crate::store::MessageStore;
use crate::types::Message;

/// Result of one chat turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub session_id: String,
    pub response: String,
    /// History after the trim, as it was handed to the store.
    pub conversation: Vec<Message>,
    /// Set when the completion succeeded but the final write did not.
    pub persistence_error: Option<StoreError>,
}

pub struct ConversationEngine {
    store: Arc<dyn MessageStore>,
    registry: Arc<SessionRegistry>,
    client: Arc<dyn CompletionClient>,
    model: String,
    window: usize,
    system_prompt: String,
}

/// Keeps the newest `window` messages.
pub fn trim_history(history: &mut Vec<Message>, window: usize) {
    if history.len() > window {
        let excess = history.len() - window;
        history.drain(..excess);
    }
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<SessionRegistry>,
        client: Arc<dyn CompletionClient>,
        model: impl Into<String>,
        window: usize,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            model: model.into(),
            window: window.max(2),
            system_prompt: render_chat_system_prompt(),
        }
    }

    /// System message followed by the stored history, oldest first.
    fn build_request(&self, history: &[Message]) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(history.iter().map(Message::for_prompt));
        CompletionRequest {
            model: self.model.clone(),
            messages,
            profile: CompletionProfile::CHAT,
        }
    }

    pub async fn submit_turn(&self, session_id: &str, user_text: &str) -> Result<TurnOutcome> {
        if user_text.trim().is_empty() {
            return Err(ChatError::Validation("Message is required".to_string()));
        }

        let session = self
            .registry
            .resolve_or_create(&normalize_session_id(Some(session_id)));
        let _turn = session.lock().await;

        let mut history = self.store.get(session.id()).await?.unwrap_or_default();
        history.push(Message::user(user_text));

        let reply = match self.client.complete(self.build_request(&history)).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(session_id = session.id(), error = %err, "completion failed, keeping user turn");
                trim_history(&mut history, self.window);
                if let Err(store_err) = self.store.put(session.id(), &history).await {
                    error!(session_id = session.id(), error = %store_err, "failed to persist user turn");
                }
                return Err(err.into());
            }
        };

        history.push(Message::assistant(reply.clone()));
        trim_history(&mut history, self.window);

        let persistence_error = match self.store.put(session.id(), &history).await {
            Ok(()) => None,
            Err(err) => {
                error!(session_id = session.id(), error = %err, "failed to persist conversation");
                Some(err)
            }
        };

        info!(
            session_id = session.id(),
            messages = history.len(),
            "chat turn completed"
        );
        Ok(TurnOutcome {
            session_id: session.id().to_string(),
            response: reply,
            conversation: history,
            persistence_error,
        })
    }

    /// Stored history, empty for an unknown session.
    pub async fn conversation(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self.store.get(session_id).await?.unwrap_or_default())
    }

    /// Idempotent: unknown sessions succeed.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        {
            let session = self.registry.resolve_or_create(session_id);
            let _turn = session.lock().await;
            self.store.delete(session.id()).await?;
        }
        self.registry.forget(session_id);
        info!(session_id, "conversation cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::store::MemoryStore;
    use crate::testing::{FlakyStore, ScriptedClient};
    use crate::types::Role;

    fn engine_with(
        store: Arc<dyn MessageStore>,
        client: Arc<ScriptedClient>,
        window: usize,
    ) -> ConversationEngine {
        ConversationEngine::new(
            store,
            Arc::new(SessionRegistry::new()),
            client,
            "test-model",
            window,
        )
    }

    #[test]
    fn trim_keeps_newest() {
        let mut history = (0..25).map(|i| Message::user(i.to_string())).collect::<Vec<_>>();
        trim_history(&mut history, 20);
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "5");
        assert_eq!(history[19].content, "24");

        let mut short = vec![Message::user("a")];
        trim_history(&mut short, 20);
        assert_eq!(short.len(), 1);
    }

    #[tokio::test]
    async fn first_turn_stores_user_then_assistant() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::replying(["Hello! What industry are you in?"]));
        let engine = engine_with(store.clone(), client.clone(), 20);

        let outcome = engine.submit_turn("s1", "Hi").await.unwrap();
        assert_eq!(outcome.response, "Hello! What industry are you in?");
        assert_eq!(outcome.conversation.len(), 2);
        assert_eq!(outcome.conversation[0].role, Role::User);
        assert_eq!(outcome.conversation[1].role, Role::Assistant);
        assert!(outcome.persistence_error.is_none());
        assert_eq!(store.get("s1").await.unwrap().unwrap(), outcome.conversation);
    }

    #[tokio::test]
    async fn request_is_system_prompt_plus_full_history() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::replying(["first", "second"]));
        let engine = engine_with(store, client.clone(), 20);

        engine.submit_turn("s1", "one").await.unwrap();
        engine.submit_turn("s1", "two").await.unwrap();

        let requests = client.requests();
        let last = requests.last().unwrap();
        assert_eq!(last.model, "test-model");
        assert_eq!(last.profile, CompletionProfile::CHAT);
        let roles = last.messages.iter().map(|m| m.role).collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert!(last.messages[0].content.starts_with("You are the Nio AI Assistant"));
        assert_eq!(last.messages[3].content, "two");
        assert!(last.messages.iter().all(|m| m.timestamp.is_none()));
    }

    #[tokio::test]
    async fn blank_message_is_rejected_before_any_call() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::replying(["unused"]));
        let engine = engine_with(store.clone(), client.clone(), 20);

        let err = engine.submit_turn("s1", "   \n").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(client.requests().is_empty());
        assert_eq!(store.get("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fifteen_turns_keep_last_twenty() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::echo());
        let engine = engine_with(store.clone(), client, 20);

        for n in 1..=15 {
            let outcome = engine.submit_turn("s1", &format!("turn {n}")).await.unwrap();
            assert_eq!(outcome.conversation.len(), (2 * n).min(20));
        }

        let history = store.get("s1").await.unwrap().unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "turn 6");
        assert_eq!(history[18].content, "turn 15");
        assert_eq!(history[19].content, "Echo: turn 15");
    }

    #[tokio::test]
    async fn upstream_failure_keeps_user_turn() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::new(vec![Err(UpstreamError::QuotaExceeded(
            "insufficient_quota".to_string(),
        ))]));
        let engine = engine_with(store.clone(), client, 20);

        let err = engine.submit_turn("s1", "Hi there").await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::Upstream(UpstreamError::QuotaExceeded(_))
        ));
        let history = store.get("s1").await.unwrap().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hi there");
    }

    #[tokio::test]
    async fn failed_write_still_returns_completion() {
        let store = Arc::new(FlakyStore::new());
        store.fail_writes(true);
        let client = Arc::new(ScriptedClient::replying(["paid-for answer"]));
        let engine = engine_with(store.clone(), client, 20);

        let outcome = engine.submit_turn("s1", "Hi").await.unwrap();
        assert_eq!(outcome.response, "paid-for answer");
        assert!(outcome.persistence_error.is_some());
        assert_eq!(store.get("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), Arc::new(ScriptedClient::echo()), 20);

        engine.submit_turn("s1", "hello").await.unwrap();
        engine.clear("s1").await.unwrap();
        engine.clear("s1").await.unwrap();
        engine.clear("unknown").await.unwrap();
        assert!(engine.conversation("s1").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_turns_on_one_session_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::echo().with_delay_ms(5));
        let engine = Arc::new(engine_with(store.clone(), client, 20));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..10 {
            let engine = Arc::clone(&engine);
            tasks.spawn(async move { engine.submit_turn("shared", &format!("msg {i}")).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let history = store.get("shared").await.unwrap().unwrap();
        assert_eq!(history.len(), 20);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[1].content, format!("Echo: {}", pair[0].content));
        }
        let mut users = history
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>();
        users.sort();
        let mut expected = (0..10).map(|i| format!("msg {i}")).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(users, expected);
    }
}
