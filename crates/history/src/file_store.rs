//! File-based history store: one JSON-lines file per chat.
//!
//! Layout under the history directory:
//! - `<chat>.jsonl`: one `HistoryEntry` per line
//! - `<chat>.meta.json`: aggregate progress and timing
//!
//! Corrupted lines are skipped on load rather than failing the whole chat.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use webpilot_core::error::StoreError;
use webpilot_core::history::{ChatRecord, HistoryEntry};
use webpilot_core::store::HistoryStore;
use webpilot_core::task::{TaskProgress, TaskTiming};

const ENTRIES_EXT: &str = "jsonl";
const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChatMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    progress: Option<TaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timing: Option<TaskTiming>,
}

pub struct FileHistoryStore {
    dir: PathBuf,
    // Serializes read-merge-write cycles.
    write_lock: Mutex<()>,
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File history store");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Chat ids become file names, so only a safe alphabet is accepted.
    fn check_id(chat_id: &str) -> Result<(), StoreError> {
        let valid = !chat_id.is_empty()
            && chat_id.len() <= 128
            && chat_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(StoreError::Storage(format!("Invalid chat id '{chat_id}'")))
        }
    }

    fn entries_path(&self, chat_id: &str) -> PathBuf {
        self.dir.join(format!("{chat_id}.{ENTRIES_EXT}"))
    }

    fn meta_path(&self, chat_id: &str) -> PathBuf {
        self.dir.join(format!("{chat_id}{META_SUFFIX}"))
    }

    fn read_entries(path: &Path) -> Vec<HistoryEntry> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Skipping corrupted history entry");
                    None
                }
            })
            .collect()
    }

    fn read_meta(path: &Path) -> ChatMeta {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "Ignoring corrupted chat metadata");
                ChatMeta::default()
            }),
            Err(_) => ChatMeta::default(),
        }
    }

    fn read_record(&self, chat_id: &str) -> ChatRecord {
        let meta = Self::read_meta(&self.meta_path(chat_id));
        ChatRecord {
            chat_id: chat_id.to_string(),
            entries: Self::read_entries(&self.entries_path(chat_id)),
            progress: meta.progress,
            timing: meta.timing,
        }
    }

    fn write_record(&self, record: &ChatRecord) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            StoreError::Storage(format!("Failed to create history directory: {e}"))
        })?;

        let mut content = String::new();
        for entry in &record.entries {
            let line = serde_json::to_string(entry).map_err(|e| {
                StoreError::Storage(format!("Failed to serialize history entry: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }
        std::fs::write(self.entries_path(&record.chat_id), content)
            .map_err(|e| StoreError::Storage(format!("Failed to write history file: {e}")))?;

        let meta = ChatMeta {
            progress: record.progress.clone(),
            timing: record.timing.clone(),
        };
        let meta = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize chat metadata: {e}")))?;
        std::fs::write(self.meta_path(&record.chat_id), meta)
            .map_err(|e| StoreError::Storage(format!("Failed to write chat metadata: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self, chat_id: &str) -> Result<ChatRecord, StoreError> {
        Self::check_id(chat_id)?;
        Ok(self.read_record(chat_id))
    }

    async fn save(&self, record: &ChatRecord) -> Result<(), StoreError> {
        Self::check_id(&record.chat_id)?;
        let _guard = self.write_lock.lock().await;
        let mut stored = self.read_record(&record.chat_id);
        stored.merge_from(record.clone());
        self.write_record(&stored)?;
        debug!(chat = %record.chat_id, entries = stored.entries.len(), "History saved");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read history directory: {e}"
                )));
            }
        };

        let mut ids: Vec<String> = read_dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                (path.extension()?.to_str()? == ENTRIES_EXT)
                    .then(|| path.file_stem()?.to_str().map(String::from))
                    .flatten()
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn name(&self) -> &str {
        "file"
    }
}
