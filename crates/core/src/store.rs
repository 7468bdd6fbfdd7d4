//! HistoryStore trait: persistence for chat records.
//!
//! Implementations: in-memory (tests, one-shot runs), JSONL files.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::history::ChatRecord;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load a chat. Unknown chats come back as an empty record.
    async fn load(&self, chat_id: &str) -> Result<ChatRecord, StoreError>;

    /// Persist a chat, merging with whatever is already stored.
    async fn save(&self, record: &ChatRecord) -> Result<(), StoreError>;

    /// Ids of every stored chat.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    fn name(&self) -> &str;
}
