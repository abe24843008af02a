use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{ConversationSummary, Message, StoredLead};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// `None` when nothing was ever stored under `session_id`.
    async fn get(&self, session_id: &str) -> Result<Option<Vec<Message>>, StoreError>;

    async fn put(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_all(&self) -> Result<Vec<ConversationSummary>, StoreError>;

    /// Fails with `MissingLeadColumns` on an old schema.
    async fn save_lead(&self, session_id: &str, lead: &StoredLead) -> Result<(), StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    fn backend_name(&self) -> &'static str;
}
