//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::{StoreError, UpstreamError};
use crate::store::{MemoryStore, MessageStore};
use crate::types::{ConversationSummary, Message, Role, StoredLead};

/// Replays queued results, then echoes the last user message.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<String, UpstreamError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Duration,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<String, UpstreamError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn replying<const N: usize>(replies: [&str; N]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn echo() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_delay_ms(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, UpstreamError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!("Echo: {last_user}"))
    }
}

/// Memory store whose writes can be switched off.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn get(&self, session_id: &str) -> Result<Option<Vec<Message>>, StoreError> {
        self.inner.get(session_id).await
    }

    async fn put(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(session_id, messages).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(session_id).await
    }

    async fn list_all(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.inner.list_all().await
    }

    async fn save_lead(&self, session_id: &str, lead: &StoredLead) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_lead(session_id, lead).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
