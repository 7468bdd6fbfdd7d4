//! `webpilot run`: carry out one instruction in a browser tab.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use webpilot_agent::{RunSettings, TaskOrchestrator};
use webpilot_config::AppConfig;
use webpilot_core::action::ArgValue;
use webpilot_core::event::SessionEvent;
use webpilot_core::history::EntryRole;
use webpilot_core::task::TaskStatus;
use webpilot_providers::ModelGateway;

use crate::RunArgs;

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = &args.model {
        config.default_model = model.clone();
    }
    if args.no_stream {
        config.streaming = false;
    }

    // Fail on model or credential problems before a browser is launched.
    let gateway = Arc::new(ModelGateway::from_config(&config));
    let target = gateway.resolve(&config.default_model)?;
    gateway.check(&target)?;

    let start_url = args
        .url
        .clone()
        .or_else(|| config.browser.start_url.clone())
        .unwrap_or_else(|| "about:blank".into());
    let chat_id = args
        .chat
        .clone()
        .unwrap_or_else(|| format!("chat-{}", uuid::Uuid::new_v4().simple()));

    let page = launch_page(&config, &start_url).await?;
    let registry = Arc::new(webpilot_browser::ElementRegistry::new());
    let executor = webpilot_browser::DomExecutor::from_config(
        page.clone(),
        registry,
        &config.browser,
        config.agent.max_wait_secs,
    );
    let snapshots = webpilot_browser::ScriptSnapshotSource::new(page);
    let store = webpilot_history::FileHistoryStore::new(config.history.resolved_dir());

    let orchestrator = Arc::new(TaskOrchestrator::new(
        gateway,
        Arc::new(executor),
        Arc::new(snapshots),
        Arc::new(store),
        RunSettings::from_config(&config),
    ));

    println!("🧭 WebPilot — {target}");
    println!("   Chat: {chat_id}");
    println!("   Task: {}\n", args.instructions);

    let printer = {
        let mut rx = orchestrator.subscribe();
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(line) = describe_event(&event, &mut seen) {
                            println!("{line}");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Progress display fell behind"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };
    let interrupter = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping after the current step");
                orchestrator.interrupt();
            }
        })
    };

    let session = orchestrator.start(&args.instructions, &chat_id).await?;
    interrupter.abort();
    // Give the printer a moment to drain the final events.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    printer.abort();

    println!();
    println!("{}", summary(session.task.status));
    println!(
        "   Steps: {}   Progress: {}/{}   Tokens: {}",
        session.steps,
        session.task.progress.completed,
        session.task.progress.total,
        session.total_tokens()
    );
    if let Some(last) = session.record.entries.last() {
        if last.role == EntryRole::Error {
            println!("   {}", last.content_text);
        } else if let Some(ArgValue::Text(message)) =
            last.action.as_ref().and_then(|a| a.args.get("message"))
        {
            println!("   {message}");
        }
    }
    println!("   History: webpilot history {chat_id}");

    if matches!(session.task.status, TaskStatus::Failed | TaskStatus::Error) {
        return Err(format!("Task ended with status {:?}", session.task.status).into());
    }
    Ok(())
}

#[cfg(feature = "chromium")]
async fn launch_page(
    config: &AppConfig,
    start_url: &str,
) -> Result<Arc<dyn webpilot_core::page::Page>, Box<dyn std::error::Error>> {
    let page = webpilot_browser::ChromiumPage::launch(&config.browser, start_url).await?;
    Ok(Arc::new(page))
}

#[cfg(not(feature = "chromium"))]
async fn launch_page(
    _config: &AppConfig,
    _start_url: &str,
) -> Result<Arc<dyn webpilot_core::page::Page>, Box<dyn std::error::Error>> {
    Err("This build has no browser driver. Rebuild with `--features chromium`.".into())
}

/// One progress line per finished history entry.
fn describe_event(event: &SessionEvent, seen: &mut HashSet<String>) -> Option<String> {
    let SessionEvent::StateChanged(state) = event else {
        return None;
    };
    let entry = state.last_entry.as_ref()?;
    if entry.is_streaming() || entry.role == EntryRole::User || !seen.insert(entry.id.clone()) {
        return None;
    }
    match entry.role {
        EntryRole::Ai => Some(match &entry.action {
            Some(action) => format!("  → {action}"),
            None => "  → (unreadable reply)".into(),
        }),
        EntryRole::Error => Some(format!("  ✗ {}", entry.content_text)),
        EntryRole::User => None,
    }
}

fn summary(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Success => "✅ Task succeeded",
        TaskStatus::Completed => "✅ Task completed",
        TaskStatus::Failed => "❌ Task failed",
        TaskStatus::Error => "❌ Task stopped on an error",
        TaskStatus::Idle => "⏹  Task interrupted",
        TaskStatus::Running => "…  Task still running",
    }
}
