//! `webpilot history`: show a stored chat, or list the stored chats.

use webpilot_config::AppConfig;
use webpilot_core::history::{ChatRecord, EntryRole, HistoryEntry};
use webpilot_core::store::HistoryStore;
use webpilot_history::FileHistoryStore;

pub async fn run(chat_id: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = FileHistoryStore::new(config.history.resolved_dir());

    let Some(chat_id) = chat_id else {
        let chats = store.list().await?;
        if chats.is_empty() {
            println!("No chats stored yet.");
        }
        for chat in chats {
            println!("{chat}");
        }
        return Ok(());
    };

    let record = store.load(&chat_id).await?;
    if record.entries.is_empty() {
        return Err(format!("No history for chat '{chat_id}'").into());
    }
    print!("{}", render(&record));
    Ok(())
}

fn render(record: &ChatRecord) -> String {
    let mut out = format!("📜 Chat {}\n\n", record.chat_id);
    for entry in &record.entries {
        out.push_str(&render_entry(entry));
        out.push('\n');
    }
    if let Some(progress) = &record.progress {
        out.push_str(&format!(
            "\nProgress: {}/{} ({})\n",
            progress.completed, progress.total, progress.kind
        ));
    }
    if let Some(timing) = &record.timing {
        out.push_str(&format!("Elapsed: {:.1}s\n", timing.elapsed_ms() as f64 / 1000.0));
    }
    out.push_str(&format!("Tokens: {}\n", record.total_tokens()));
    out
}

fn render_entry(entry: &HistoryEntry) -> String {
    let time = entry.timestamp.format("%H:%M:%S");
    match entry.role {
        EntryRole::User => format!("[{time}] 🧑 {}", entry.content_text),
        EntryRole::Ai => {
            let action = entry
                .action
                .as_ref()
                .map_or_else(|| "(unreadable reply)".to_string(), ToString::to_string);
            let thought = webpilot_agent::parser::extract_tag(&entry.content_text, "thought")
                .map(|t| format!("\n           {t}"))
                .unwrap_or_default();
            format!("[{time}] 🤖 {action}{thought}")
        }
        EntryRole::Error => format!("[{time}] ✗  {}", entry.content_text),
    }
}
