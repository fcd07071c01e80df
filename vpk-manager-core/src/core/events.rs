use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::task::DownloadTaskInfo;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressInfo {
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressInfo {
    pub fn new(current: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
        }
    }
}

/// Flattened error notification. `kind` lets the receiver group errors
/// (`vpk_parse`, `download`, ...); `file` names the item involved, if any.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub file: String,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            file: file.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum AppEvent {
    ScanProgress(ProgressInfo),
    ConflictCheckProgress(ProgressInfo),
    ExportProgress(ProgressInfo),
    TaskUpdated(DownloadTaskInfo),
    TaskProgress(DownloadTaskInfo),
    TasksCleared,
    Error(ErrorInfo),
}

impl AppEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            AppEvent::ScanProgress(_) => "scan_progress",
            AppEvent::ConflictCheckProgress(_) => "conflict_check_progress",
            AppEvent::ExportProgress(_) => "export_progress",
            AppEvent::TaskUpdated(_) => "task_updated",
            AppEvent::TaskProgress(_) => "task_progress",
            AppEvent::TasksCleared => "tasks_cleared",
            AppEvent::Error(_) => "error",
        }
    }
}

/// Fire-and-forget sink for progress and completion notifications.
/// Implementations must not block the caller.
pub trait EventEmitter: Send + Sync + Clone + 'static {
    fn emit(&self, event: AppEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: AppEvent) {}
}

/// Forwards every event into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_topic_tag() {
        let event = AppEvent::ConflictCheckProgress(ProgressInfo::new(5, 10, "scanning"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "conflict_check_progress");
        assert_eq!(json["payload"]["current"], 5);
        assert_eq!(event.topic(), "conflict_check_progress");
    }

    #[test]
    fn error_info_uses_type_key() {
        let event = AppEvent::Error(ErrorInfo::new("vpk_parse", "bad header", "a.vpk"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "vpk_parse");
        assert_eq!(json["payload"]["file"], "a.vpk");
    }

    #[test]
    fn channel_emitter_survives_dropped_receiver() {
        let (emitter, rx) = ChannelEmitter::new();
        drop(rx);
        emitter.emit(AppEvent::TasksCleared);
    }
}
