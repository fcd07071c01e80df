use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::direct_downloader::{self, WorkerContext};
use crate::core::events::{AppEvent, EventEmitter};
use crate::core::filename::clean_filename;
use crate::core::root_dir::RootDir;
use crate::models::settings::DownloadSettings;
use crate::models::task::{DownloadTaskInfo, TaskStatus, TaskSummary};
use crate::models::workshop::WorkshopFileDetails;

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

pub struct DownloadTask {
    pub info: DownloadTaskInfo,
    pub cancel_token: CancellationToken,
    generation: u64,
}

/// Owns every task. Writes coming from a worker carry the run generation
/// they were started with and are dropped once the task has been retried.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, DownloadTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: DownloadTaskInfo) -> (CancellationToken, u64) {
        let token = CancellationToken::new();
        self.tasks.insert(
            info.id.clone(),
            DownloadTask {
                info,
                cancel_token: token.clone(),
                generation: 0,
            },
        );
        (token, 0)
    }

    pub fn get(&self, id: &str) -> Option<&DownloadTask> {
        self.tasks.get(id)
    }

    pub fn snapshot(&self, id: &str) -> Option<DownloadTaskInfo> {
        self.tasks.get(id).map(|t| t.info.clone())
    }

    pub fn get_state(&self) -> Vec<DownloadTaskInfo> {
        self.tasks.values().map(|t| t.info.clone()).collect()
    }

    fn current_mut(&mut self, id: &str, generation: u64) -> Option<&mut DownloadTask> {
        self.tasks
            .get_mut(id)
            .filter(|t| t.generation == generation)
    }

    /// Field updates from the running worker. Ignored for stale runs and for
    /// tasks that already reached a terminal state.
    pub fn update(
        &mut self,
        id: &str,
        generation: u64,
        f: impl FnOnce(&mut DownloadTaskInfo),
    ) -> Option<DownloadTaskInfo> {
        let task = self.current_mut(id, generation)?;
        if !task.info.status.is_active() {
            return None;
        }
        f(&mut task.info);
        Some(task.info.clone())
    }

    /// Moves the task along its lifecycle; any edge the lifecycle does not
    /// allow is rejected.
    pub fn set_status(
        &mut self,
        id: &str,
        generation: u64,
        next: TaskStatus,
        error: &str,
    ) -> Option<DownloadTaskInfo> {
        let task = self.current_mut(id, generation)?;
        if !task.info.status.can_transition_to(next) {
            tracing::debug!(
                "[download] rejected transition {} -> {} for {}",
                task.info.status,
                next,
                id
            );
            return None;
        }
        task.info.status = next;
        task.info.error = error.to_string();
        if next.is_terminal() {
            task.info.speed.clear();
        }
        if next == TaskStatus::Completed {
            task.info.progress = 100;
        }
        Some(task.info.clone())
    }

    pub fn cancel(&mut self, id: &str) -> Option<DownloadTaskInfo> {
        let task = self.tasks.get_mut(id)?;
        if !task.info.status.can_transition_to(TaskStatus::Cancelled) {
            return None;
        }
        task.cancel_token.cancel();
        task.info.status = TaskStatus::Cancelled;
        task.info.error = CANCELLED_MESSAGE.to_string();
        task.info.speed.clear();
        Some(task.info.clone())
    }

    /// Resets a failed or cancelled task for another run and hands out the
    /// fresh token and generation for it.
    pub fn retry(&mut self, id: &str) -> Option<(DownloadTaskInfo, CancellationToken, u64)> {
        let task = self.tasks.get_mut(id)?;
        if !task.info.status.is_retryable() {
            return None;
        }
        task.info.status = TaskStatus::Pending;
        task.info.progress = 0;
        task.info.downloaded_size = 0;
        task.info.error.clear();
        task.info.speed.clear();
        task.cancel_token = CancellationToken::new();
        task.generation += 1;
        Some((task.info.clone(), task.cancel_token.clone(), task.generation))
    }

    pub fn clear_finished(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| t.info.status.is_active());
        before - self.tasks.len()
    }

    pub fn has_active(&self) -> bool {
        self.tasks.values().any(|t| t.info.status.is_active())
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| t.info.status.is_active())
            .map(|t| t.info.id.clone())
            .collect()
    }

    pub fn summary(&self) -> TaskSummary {
        let mut summary = TaskSummary::default();
        for task in self.tasks.values() {
            match task.info.status {
                TaskStatus::Pending | TaskStatus::Downloading => summary.active += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// Front door for downloads: registers tasks, launches one worker per run and
/// reports every change through the emitter.
#[derive(Clone)]
pub struct DownloadManager<E: EventEmitter> {
    registry: Arc<Mutex<TaskRegistry>>,
    root: RootDir,
    client: reqwest::Client,
    settings: Arc<DownloadSettings>,
    emitter: E,
    seq: Arc<AtomicU64>,
    workers: TaskTracker,
}

impl<E: EventEmitter> DownloadManager<E> {
    pub fn new(root: RootDir, client: reqwest::Client, settings: DownloadSettings, emitter: E) -> Self {
        Self {
            registry: Arc::new(Mutex::new(TaskRegistry::new())),
            root,
            client,
            settings: Arc::new(settings),
            emitter,
            seq: Arc::new(AtomicU64::new(0)),
            workers: TaskTracker::new(),
        }
    }

    fn next_task_id(&self) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", millis, n)
    }

    fn spawn_worker(&self, id: String, generation: u64, cancel: CancellationToken) {
        let ctx = WorkerContext {
            registry: self.registry.clone(),
            root: self.root.clone(),
            client: self.client.clone(),
            settings: self.settings.clone(),
            emitter: self.emitter.clone(),
            id,
            generation,
            cancel,
        };
        self.workers.spawn(direct_downloader::run_download(ctx));
    }

    pub async fn start_download_task(&self, details: WorkshopFileDetails) -> String {
        let id = self.next_task_id();
        let filename = clean_filename(&details.filename);
        let title = if details.is_direct() {
            filename.clone()
        } else {
            details.title.clone()
        };

        let info = DownloadTaskInfo {
            id: id.clone(),
            workshop_id: details.published_file_id.clone(),
            title,
            filename,
            preview_url: details.preview_url.clone(),
            file_url: details.file_url.clone(),
            status: TaskStatus::Pending,
            progress: 0,
            total_size: details.parsed_file_size(),
            downloaded_size: 0,
            speed: String::new(),
            error: String::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let (token, generation) = {
            let mut registry = self.registry.lock().await;
            registry.insert(info.clone())
        };
        tracing::info!("[download] task {} queued: {}", id, info.title);
        self.emitter.emit(AppEvent::TaskUpdated(info));

        self.spawn_worker(id.clone(), generation, token);
        id
    }

    pub async fn cancel_download_task(&self, id: &str) {
        let updated = self.registry.lock().await.cancel(id);
        if let Some(info) = updated {
            tracing::info!("[download] task {} cancelled", id);
            self.emitter.emit(AppEvent::TaskUpdated(info));
        }
    }

    pub async fn retry_download_task(&self, id: &str) {
        let retried = self.registry.lock().await.retry(id);
        if let Some((info, token, generation)) = retried {
            tracing::info!("[download] retrying task {} (run {})", id, generation);
            self.emitter.emit(AppEvent::TaskUpdated(info));
            self.spawn_worker(id.to_string(), generation, token);
        }
    }

    pub async fn get_download_tasks(&self) -> Vec<DownloadTaskInfo> {
        self.registry.lock().await.get_state()
    }

    pub async fn get_download_task(&self, id: &str) -> Option<DownloadTaskInfo> {
        self.registry.lock().await.snapshot(id)
    }

    pub async fn clear_completed_tasks(&self) {
        let removed = self.registry.lock().await.clear_finished();
        tracing::debug!("[download] cleared {} finished tasks", removed);
        self.emitter.emit(AppEvent::TasksCleared);
    }

    pub async fn has_active_downloads(&self) -> bool {
        self.registry.lock().await.has_active()
    }

    pub async fn task_summary(&self) -> TaskSummary {
        self.registry.lock().await.summary()
    }

    /// Cancels everything still pending or downloading.
    pub async fn cancel_all(&self) {
        let ids = self.registry.lock().await.active_ids();
        for id in ids {
            self.cancel_download_task(&id).await;
        }
    }

    /// Waits until every worker run has returned, including the temp file
    /// cleanup that follows a cancel. A task reads `cancelled` before its
    /// worker is done, so callers about to exit must wait here.
    pub async fn shutdown(&self) {
        self.workers.close();
        self.workers.wait().await;
        tracing::debug!("[download] all workers finished");
    }
}
