//! In-memory store: used by tests and one-shot runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use webpilot_core::error::StoreError;
use webpilot_core::history::ChatRecord;
use webpilot_core::store::HistoryStore;

#[derive(Default)]
pub struct InMemoryHistoryStore {
    chats: Arc<RwLock<HashMap<String, ChatRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn load(&self, chat_id: &str) -> Result<ChatRecord, StoreError> {
        Ok(self
            .chats
            .read()
            .await
            .get(chat_id)
            .cloned()
            .unwrap_or_else(|| ChatRecord::new(chat_id)))
    }

    async fn save(&self, record: &ChatRecord) -> Result<(), StoreError> {
        let mut chats = self.chats.write().await;
        chats
            .entry(record.chat_id.clone())
            .or_insert_with(|| ChatRecord::new(&record.chat_id))
            .merge_from(record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.chats.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
