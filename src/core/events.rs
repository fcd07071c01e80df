use std::io::Write;

use vpk_manager_core::core::events::{AppEvent, EventEmitter};
use vpk_manager_core::models::task::TaskStatus;

/// Terminal sink for engine events. In JSON mode every event becomes one line
/// on stdout (`{"topic": ..., "payload": ...}`); otherwise events go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleEventEmitter {
    json: bool,
}

impl ConsoleEventEmitter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }
}

impl EventEmitter for ConsoleEventEmitter {
    fn emit(&self, event: AppEvent) {
        if self.json {
            if let Ok(line) = serde_json::to_string(&event) {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{}", line);
            }
            return;
        }

        match &event {
            AppEvent::ScanProgress(p)
            | AppEvent::ConflictCheckProgress(p)
            | AppEvent::ExportProgress(p) => {
                tracing::debug!("[{}] {}/{} {}", event.topic(), p.current, p.total, p.message);
            }
            AppEvent::TaskUpdated(task) => match task.status {
                TaskStatus::Failed => {
                    tracing::warn!("[download] {} failed: {}", task.filename, task.error)
                }
                _ => tracing::info!("[download] {} is {}", task.filename, task.status),
            },
            AppEvent::TaskProgress(task) => {
                tracing::info!(
                    "[download] {} {}% {}",
                    task.filename,
                    task.progress,
                    task.speed
                );
            }
            AppEvent::TasksCleared => tracing::debug!("[download] finished tasks cleared"),
            AppEvent::Error(e) => tracing::warn!("[{}] {}: {}", e.kind, e.file, e.message),
        }
    }
}
