use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Downloading)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Edges of the task lifecycle. `Failed`/`Cancelled` only go back to
    /// `Pending` through a retry; `Completed` has no way out.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Cancelled)
                | (Failed, Pending)
                | (Cancelled, Pending)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// Snapshot of a task as it crosses the event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadTaskInfo {
    pub id: String,
    pub workshop_id: String,
    pub title: String,
    pub filename: String,
    pub preview_url: String,
    pub file_url: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub speed: String,
    pub error: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSummary {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}
