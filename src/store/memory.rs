use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MessageStore;
use crate::error::StoreError;
use crate::types::{now_iso, ConversationSummary, Message, StoredLead};

#[derive(Debug, Clone)]
struct Entry {
    messages: Vec<Message>,
    created_at: String,
    updated_at: String,
    lead: Option<StoredLead>,
}

pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    lead_columns: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            lead_columns: true,
        }
    }

    /// Behaves like a database whose table predates the lead columns.
    pub fn without_lead_columns() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            lead_columns: false,
        }
    }

    pub async fn lead(&self, session_id: &str) -> Option<StoredLead> {
        let entries = self.entries.read().await;
        entries.get(session_id).and_then(|entry| entry.lead.clone())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<Vec<Message>>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(session_id).map(|entry| entry.messages.clone()))
    }

    async fn put(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let now = now_iso();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(session_id.to_string())
            .or_insert_with(|| Entry {
                messages: Vec::new(),
                created_at: now.clone(),
                updated_at: now.clone(),
                lead: None,
            });
        entry.messages = messages.to_vec();
        entry.updated_at = now;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(session_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let entries = self.entries.read().await;
        let mut list = entries
            .iter()
            .map(|(id, entry)| ConversationSummary {
                conversation_id: id.clone(),
                created_at: entry.created_at.clone(),
                updated_at: entry.updated_at.clone(),
                message_count: entry.messages.len(),
                messages: entry.messages.clone(),
                lead: if self.lead_columns {
                    entry.lead.clone()
                } else {
                    None
                },
            })
            .collect::<Vec<_>>();
        list.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        Ok(list)
    }

    async fn save_lead(&self, session_id: &str, lead: &StoredLead) -> Result<(), StoreError> {
        if !self.lead_columns {
            return Err(StoreError::MissingLeadColumns);
        }
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(session_id) {
            entry.lead = Some(lead.clone());
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.entries.read().await.len() as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LeadQuality, LeadRecord};

    fn lead(quality: LeadQuality) -> StoredLead {
        StoredLead {
            record: LeadRecord {
                lead_quality: quality,
                ..LeadRecord::default()
            },
            analyzed_at: now_iso(),
        }
    }

    #[tokio::test]
    async fn unknown_session_reads_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nobody").await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn put_replaces_and_keeps_created_at() {
        let store = MemoryStore::new();
        store.put("s1", &[Message::user("one")]).await.unwrap();
        let first = store.list_all().await.unwrap()[0].created_at.clone();

        let replacement = vec![Message::user("two"), Message::assistant("three")];
        store.put("s1", &replacement).await.unwrap();

        assert_eq!(store.get("s1").await.unwrap(), Some(replacement));
        let summaries = store.list_all().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].created_at, first);
        assert_eq!(summaries[0].message_count, 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.put("s1", &[Message::user("hi")]).await.unwrap();
        store.delete("s1").await.unwrap();
        store.delete("s1").await.unwrap();
        store.delete("never-seen").await.unwrap();
        assert_eq!(store.get("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lead_is_overwritten_not_merged() {
        let store = MemoryStore::new();
        store.put("s1", &[Message::user("hi")]).await.unwrap();
        store.save_lead("s1", &lead(LeadQuality::Spam)).await.unwrap();
        store.save_lead("s1", &lead(LeadQuality::Good)).await.unwrap();

        let saved = store.lead("s1").await.unwrap();
        assert_eq!(saved.record.lead_quality, LeadQuality::Good);
        let summaries = store.list_all().await.unwrap();
        assert_eq!(
            summaries[0].lead.as_ref().map(|l| l.record.lead_quality),
            Some(LeadQuality::Good)
        );
    }

    #[tokio::test]
    async fn old_schema_rejects_lead_but_still_lists() {
        let store = MemoryStore::without_lead_columns();
        store.put("s1", &[Message::user("hi")]).await.unwrap();
        let err = store.save_lead("s1", &lead(LeadQuality::Ok)).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingLeadColumns));

        let summaries = store.list_all().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].lead.is_none());
    }
}
