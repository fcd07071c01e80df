use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE, REFERER, USER_AGENT};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::events::{AppEvent, EventEmitter};
use crate::core::extract::extract_vpks;
use crate::core::filename::{
    clean_filename, content_disposition_filename, is_placeholder, is_rejected_content_type,
    needs_synthesized_name, synthesized_name, temp_file_name,
};
use crate::core::queue::TaskRegistry;
use crate::core::root_dir::{RootDir, TEMP_DIR};
use crate::models::settings::DownloadSettings;
use crate::models::task::{DownloadTaskInfo, TaskStatus};
use crate::models::workshop::DIRECT_SOURCE_PREFIX;

const REFERER_URL: &str = "https://steamcommunity.com/";

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Cancelled by user")]
    Cancelled,

    #[error("HTTP status: {0}")]
    Status(u16),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransferError {
    /// Errors that another attempt cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::Cancelled | TransferError::Status(404))
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    if bytes_per_sec < KB {
        format!("{:.0} B/s", bytes_per_sec)
    } else if bytes_per_sec < MB {
        format!("{:.1} KB/s", bytes_per_sec / KB)
    } else {
        format!("{:.1} MB/s", bytes_per_sec / MB)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub downloaded: u64,
    pub progress: u8,
    pub speed: Option<String>,
}

/// Counts every received byte but only asks for a publish when the whole
/// percentage grows or a speed sample is due.
pub struct ProgressTracker {
    total: u64,
    downloaded: u64,
    last_percent: u8,
    sample_bytes: u64,
    sample_at: Instant,
    interval: Duration,
}

impl ProgressTracker {
    pub fn new(total: u64, interval: Duration) -> Self {
        Self::starting_at(total, interval, Instant::now())
    }

    fn starting_at(total: u64, interval: Duration, now: Instant) -> Self {
        Self {
            total,
            downloaded: 0,
            last_percent: 0,
            sample_bytes: 0,
            sample_at: now,
            interval,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn record(&mut self, n: u64) -> Option<ProgressUpdate> {
        self.record_at(n, Instant::now())
    }

    fn record_at(&mut self, n: u64, now: Instant) -> Option<ProgressUpdate> {
        self.downloaded += n;

        let mut speed = None;
        let elapsed = now.saturating_duration_since(self.sample_at);
        if elapsed >= self.interval {
            let secs = elapsed.as_secs_f64().max(f64::EPSILON);
            let bytes = self.downloaded - self.sample_bytes;
            speed = Some(format_speed(bytes as f64 / secs));
            self.sample_bytes = self.downloaded;
            self.sample_at = now;
        }

        let mut grew = false;
        if self.total > 0 {
            let percent = (self.downloaded.saturating_mul(100) / self.total).min(100) as u8;
            if percent > self.last_percent {
                self.last_percent = percent;
                grew = true;
            }
        }

        (grew || speed.is_some()).then(|| ProgressUpdate {
            downloaded: self.downloaded,
            progress: self.last_percent,
            speed,
        })
    }
}

/// Everything one run of one task needs. Dropped when the run ends.
pub(crate) struct WorkerContext<E: EventEmitter> {
    pub(crate) registry: Arc<Mutex<TaskRegistry>>,
    pub(crate) root: RootDir,
    pub(crate) client: reqwest::Client,
    pub(crate) settings: Arc<DownloadSettings>,
    pub(crate) emitter: E,
    pub(crate) id: String,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
}

impl<E: EventEmitter> WorkerContext<E> {
    async fn set_status(&self, next: TaskStatus, error: &str) -> Option<DownloadTaskInfo> {
        let updated = self
            .registry
            .lock()
            .await
            .set_status(&self.id, self.generation, next, error);
        if let Some(info) = &updated {
            self.emitter.emit(AppEvent::TaskUpdated(info.clone()));
        }
        updated
    }

    async fn update(&self, f: impl FnOnce(&mut DownloadTaskInfo)) -> Option<DownloadTaskInfo> {
        let updated = self
            .registry
            .lock()
            .await
            .update(&self.id, self.generation, f);
        if let Some(info) = &updated {
            self.emitter.emit(AppEvent::TaskUpdated(info.clone()));
        }
        updated
    }

    async fn publish_progress(&self, update: ProgressUpdate) {
        let updated = self
            .registry
            .lock()
            .await
            .update(&self.id, self.generation, |t| {
                t.downloaded_size = update.downloaded;
                t.progress = update.progress;
                if let Some(speed) = update.speed {
                    t.speed = speed;
                }
            });
        if let Some(info) = updated {
            self.emitter.emit(AppEvent::TaskProgress(info));
        }
    }

    async fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[download] task {} failed: {}", self.id, message);
        self.set_status(TaskStatus::Failed, &message).await;
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("[download] could not remove {}: {}", path.display(), e);
        }
    }
}

async fn send_request(
    client: &reqwest::Client,
    url: &str,
    settings: &DownloadSettings,
) -> Result<reqwest::Response, TransferError> {
    let request = client
        .get(url)
        .header(USER_AGENT, settings.user_agent.as_str())
        .header(REFERER, REFERER_URL)
        .header(ACCEPT, "*/*");

    let response = tokio::time::timeout(settings.header_timeout(), request.send())
        .await
        .map_err(|_| anyhow!("Timed out waiting for response headers"))?
        .map_err(|e| anyhow!("Request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()));
    }
    Ok(response)
}

async fn fetch_with_retry<E: EventEmitter>(
    ctx: &WorkerContext<E>,
    url: &str,
) -> Result<reqwest::Response, TransferError> {
    let attempts = ctx.settings.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        if ctx.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        if attempt > 0 {
            tracing::info!(
                "[download] retrying task {} ({}/{})",
                ctx.id,
                attempt + 1,
                attempts
            );
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(ctx.settings.retry_backoff()) => {}
            }
        }

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            r = send_request(&ctx.client, url, &ctx.settings) => r,
        };

        match result {
            Ok(response) => return Ok(response),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "[download] attempt {}/{} for task {} failed: {}",
                    attempt + 1,
                    attempts,
                    ctx.id,
                    e
                );
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("Download failed after {} attempts", attempts).into()))
}

async fn stream_to_file<E: EventEmitter>(
    ctx: &WorkerContext<E>,
    response: reqwest::Response,
    temp_path: &Path,
    total: u64,
) -> Result<u64, TransferError> {
    let file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| anyhow!("Failed to create temp file: {}", e))?;
    let mut file = tokio::io::BufWriter::with_capacity(256 * 1024, file);
    let mut tracker = ProgressTracker::new(total, ctx.settings.speed_interval());
    let mut stream = response.bytes_stream();
    let stall = ctx.settings.stall_timeout();

    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(TransferError::Cancelled),
            n = tokio::time::timeout(stall, stream.next()) => n,
        };
        match next {
            Ok(Some(Ok(chunk))) => {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| anyhow!("Write failed (disk full?): {}", e))?;
                if let Some(update) = tracker.record(chunk.len() as u64) {
                    ctx.publish_progress(update).await;
                }
            }
            Ok(Some(Err(e))) => {
                if ctx.cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                return Err(anyhow!("Download stream error: {}", e).into());
            }
            Ok(None) => break,
            Err(_) => {
                return Err(anyhow!("No data received for {} seconds", stall.as_secs()).into());
            }
        }
    }

    file.flush().await.map_err(|e| anyhow!("Flush failed: {}", e))?;
    drop(file);

    if total > 0 && tracker.downloaded() < total {
        return Err(anyhow!(
            "Incomplete download: expected {} bytes, received {}",
            total,
            tracker.downloaded()
        )
        .into());
    }
    Ok(tracker.downloaded())
}

/// One run of a task, from `downloading` to a terminal state.
pub(crate) async fn run_download<E: EventEmitter>(ctx: WorkerContext<E>) {
    let Some(task) = ctx.set_status(TaskStatus::Downloading, "").await else {
        tracing::debug!("[download] task {} no longer runnable", ctx.id);
        return;
    };

    let Some(root) = ctx.root.get() else {
        ctx.fail("Root directory not set").await;
        return;
    };
    if task.file_url.trim().is_empty() {
        ctx.fail("Download URL is empty").await;
        return;
    }

    let temp_dir = root.join(TEMP_DIR);
    if let Err(e) = tokio::fs::create_dir_all(&temp_dir).await {
        ctx.fail(format!("Failed to create temp dir: {}", e)).await;
        return;
    }
    let temp_path = temp_dir.join(temp_file_name(&task.filename));

    let response = match fetch_with_retry(&ctx, &task.file_url).await {
        Ok(r) => r,
        Err(TransferError::Cancelled) => {
            tracing::info!("[download] task {} cancelled before transfer", ctx.id);
            return;
        }
        Err(e) => {
            ctx.fail(e.to_string()).await;
            return;
        }
    };

    let is_direct = task.workshop_id.starts_with(DIRECT_SOURCE_PREFIX);
    let mut filename = task.filename.clone();

    let served_name = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(content_disposition_filename)
        .map(|n| clean_filename(&n))
        .filter(|n| !n.is_empty());
    if let Some(served) = served_name {
        if is_direct || is_placeholder(&filename) {
            filename = served;
            let name = filename.clone();
            ctx.update(|t| {
                t.filename = name.clone();
                if is_direct {
                    t.title = name;
                }
            })
            .await;
        }
    }

    if needs_synthesized_name(&filename) {
        filename = synthesized_name();
        let name = filename.clone();
        ctx.update(|t| t.filename = name).await;
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if is_rejected_content_type(&content_type) {
        ctx.fail(format!("Invalid content type: {}", content_type)).await;
        return;
    }

    let mut total = task.total_size;
    if total == 0 {
        if let Some(len) = response.content_length().filter(|l| *l > 0) {
            total = len;
            ctx.update(|t| t.total_size = len).await;
        }
    }

    tracing::info!(
        "[download] task {} streaming {} ({} bytes)",
        ctx.id,
        filename,
        total
    );
    match stream_to_file(&ctx, response, &temp_path, total).await {
        Ok(_) => {}
        Err(TransferError::Cancelled) => {
            remove_quietly(&temp_path).await;
            tracing::info!("[download] task {} cancelled, temp removed", ctx.id);
            return;
        }
        Err(e) => {
            remove_quietly(&temp_path).await;
            ctx.fail(e.to_string()).await;
            return;
        }
    }

    if ctx.cancel.is_cancelled() {
        remove_quietly(&temp_path).await;
        return;
    }

    let target: PathBuf = root.join(&filename);
    if !install(&ctx, &temp_path, &target).await {
        return;
    }

    if is_direct && filename.to_lowercase().ends_with(".zip") {
        match extract_vpks(target.clone(), root.clone()).await {
            Ok(n) => tracing::info!("[download] extracted {} vpk files from {}", n, filename),
            Err(e) => tracing::warn!("[download] could not extract {}: {}", filename, e),
        }
    }
}

/// Moves the finished temp file to `target` and marks the task completed.
/// When a cancel reaches the registry first the installed file is removed
/// again and `false` is returned.
async fn install<E: EventEmitter>(ctx: &WorkerContext<E>, temp_path: &Path, target: &Path) -> bool {
    if tokio::fs::try_exists(target).await.unwrap_or(false) {
        remove_quietly(temp_path).await;
        ctx.fail(format!("File already exists: {}", target.display())).await;
        return false;
    }
    if let Err(e) = tokio::fs::rename(temp_path, target).await {
        remove_quietly(temp_path).await;
        ctx.fail(format!("Rename failed: {}", e)).await;
        return false;
    }

    if ctx.set_status(TaskStatus::Completed, "").await.is_none() {
        remove_quietly(target).await;
        tracing::info!(
            "[download] task {} cancelled while installing, {} removed",
            ctx.id,
            target.display()
        );
        return false;
    }
    tracing::info!("[download] task {} completed: {}", ctx.id, target.display());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::ChannelEmitter;
    use crate::core::queue::{DownloadManager, CANCELLED_MESSAGE};
    use crate::core::test_http::{Reply, TestServer};
    use crate::models::workshop::WorkshopFileDetails;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_settings() -> DownloadSettings {
        DownloadSettings {
            retry_backoff_ms: 20,
            header_timeout_secs: 5,
            stall_timeout_secs: 30,
            ..Default::default()
        }
    }

    fn manager(root: &Path) -> (DownloadManager<ChannelEmitter>, UnboundedReceiver<AppEvent>) {
        manager_with(root, test_settings())
    }

    fn manager_with(
        root: &Path,
        settings: DownloadSettings,
    ) -> (DownloadManager<ChannelEmitter>, UnboundedReceiver<AppEvent>) {
        let (emitter, rx) = ChannelEmitter::new();
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let manager = DownloadManager::new(
            RootDir::new(Some(root.to_path_buf())),
            client,
            settings,
            emitter,
        );
        (manager, rx)
    }

    fn workshop(url: &str, filename: &str) -> WorkshopFileDetails {
        WorkshopFileDetails {
            result: 1,
            published_file_id: "2153386243".into(),
            filename: filename.into(),
            file_url: url.into(),
            title: "Workshop Item".into(),
            ..Default::default()
        }
    }

    async fn wait_for<E: EventEmitter>(
        manager: &DownloadManager<E>,
        id: &str,
        pred: impl Fn(&DownloadTaskInfo) -> bool,
    ) -> DownloadTaskInfo {
        for _ in 0..500 {
            if let Some(task) = manager.get_download_task(id).await {
                if pred(&task) {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached the expected state", id);
    }

    async fn wait_terminal<E: EventEmitter>(manager: &DownloadManager<E>, id: &str) -> DownloadTaskInfo {
        wait_for(manager, id, |t| t.status.is_terminal()).await
    }

    fn temp_files(root: &Path) -> usize {
        std::fs::read_dir(root.join(TEMP_DIR))
            .map(|d| d.count())
            .unwrap_or(0)
    }

    #[test]
    fn speed_formatting() {
        assert_eq!(format_speed(512.0), "512 B/s");
        assert_eq!(format_speed(1023.4), "1023 B/s");
        assert_eq!(format_speed(1024.0), "1.0 KB/s");
        assert_eq!(format_speed(1536.0), "1.5 KB/s");
        assert_eq!(format_speed(5.0 * 1024.0 * 1024.0), "5.0 MB/s");
    }

    #[test]
    fn tracker_publishes_on_percent_growth() {
        let start = Instant::now();
        let mut t = ProgressTracker::starting_at(1000, Duration::from_secs(3), start);
        assert_eq!(t.record_at(5, start), None);
        let u = t.record_at(5, start).unwrap();
        assert_eq!((u.downloaded, u.progress, u.speed), (10, 1, None));
        assert_eq!(t.record_at(1, start), None);
        assert_eq!(t.record_at(989, start).unwrap().progress, 100);
    }

    #[test]
    fn tracker_samples_speed_without_total() {
        let start = Instant::now();
        let mut t = ProgressTracker::starting_at(0, Duration::from_secs(3), start);
        assert_eq!(t.record_at(2048, start + Duration::from_secs(1)), None);
        let u = t.record_at(4096, start + Duration::from_secs(4)).unwrap();
        assert_eq!(u.downloaded, 6144);
        assert_eq!(u.progress, 0);
        assert_eq!(u.speed.as_deref(), Some("1.5 KB/s"));
        assert_eq!(t.record_at(1, start + Duration::from_secs(5)), None);
    }

    #[test]
    fn only_cancel_and_not_found_are_fatal() {
        assert!(TransferError::Cancelled.is_fatal());
        assert!(TransferError::Status(404).is_fatal());
        assert!(!TransferError::Status(500).is_fatal());
        assert!(!TransferError::Other(anyhow!("connection reset")).is_fatal());
        assert_eq!(TransferError::Status(404).to_string(), "HTTP status: 404");
    }

    #[tokio::test]
    async fn completes_and_reports_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let body = vec![7u8; 4096];
        let server = TestServer::start(vec![Reply::bytes(&body)]).await;
        let (manager, mut rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/file"), "myl4d2addons_map.vpk"))
            .await;
        let task = wait_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.filename, "map.vpk");
        assert_eq!(task.title, "Workshop Item");
        assert_eq!(task.downloaded_size, 4096);
        assert_eq!(std::fs::read(tmp.path().join("map.vpk")).unwrap(), body);
        assert_eq!(temp_files(tmp.path()), 0);
        assert!(!manager.has_active_downloads().await);

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::TaskUpdated(info) = event {
                statuses.push(info.status);
            }
        }
        assert_eq!(statuses.first(), Some(&TaskStatus::Pending));
        assert_eq!(statuses.get(1), Some(&TaskStatus::Downloading));
        assert_eq!(statuses.last(), Some(&TaskStatus::Completed));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::Status(404)]).await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/gone"), "a.vpk"))
            .await;
        let task = wait_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, "HTTP status: 404");
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::Status(500), Reply::bytes(b"vpk")]).await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/flaky"), "a.vpk"))
            .await;
        let task = wait_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_with_last_error() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::Status(503)]).await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/down"), "a.vpk"))
            .await;
        let task = wait_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, "HTTP status: 503");
        assert_eq!(server.hits(), 3);
        assert_eq!(manager.task_summary().await.failed, 1);
    }

    #[tokio::test]
    async fn html_responses_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let server =
            TestServer::start(vec![Reply::typed(b"<html></html>", "text/html; charset=utf-8")]).await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/login"), "a.vpk"))
            .await;
        let task = wait_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.starts_with("Invalid content type: text/html"));
        assert!(!tmp.path().join("a.vpk").exists());
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn empty_url_and_missing_root_fail_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, _rx) = manager(tmp.path());
        let id = manager.start_download_task(workshop("", "a.vpk")).await;
        assert_eq!(wait_terminal(&manager, &id).await.error, "Download URL is empty");

        let (emitter, _rx) = ChannelEmitter::new();
        let rootless = DownloadManager::new(
            RootDir::default(),
            reqwest::Client::new(),
            test_settings(),
            emitter,
        );
        let id = rootless
            .start_download_task(workshop("http://127.0.0.1:9/a.vpk", "a.vpk"))
            .await;
        assert_eq!(wait_terminal(&rootless, &id).await.error, "Root directory not set");
    }

    #[tokio::test]
    async fn direct_downloads_adopt_served_name() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::attachment(
            b"vpk",
            r#"attachment; filename="Cool Map.vpk""#,
        )])
        .await;
        let (manager, _rx) = manager(tmp.path());

        let details = WorkshopFileDetails::direct(&server.url("/dl?id=1"), "");
        let id = manager.start_download_task(details).await;
        let task = wait_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.filename, "Cool Map.vpk");
        assert_eq!(task.title, "Cool Map.vpk");
        assert!(tmp.path().join("Cool Map.vpk").exists());
    }

    #[tokio::test]
    async fn workshop_names_are_kept_unless_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::attachment(
            b"vpk",
            "attachment; filename=served.vpk",
        )])
        .await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/a"), "mine.vpk"))
            .await;
        assert_eq!(wait_terminal(&manager, &id).await.filename, "mine.vpk");

        let id = manager
            .start_download_task(workshop(&server.url("/b"), "unknown.vpk"))
            .await;
        assert_eq!(wait_terminal(&manager, &id).await.filename, "served.vpk");
    }

    #[tokio::test]
    async fn unnamed_downloads_get_synthesized_name() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::bytes(b"vpk")]).await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/x"), "unknown.vpk"))
            .await;
        let task = wait_terminal(&manager, &id).await;
        assert!(task.filename.starts_with("unknown_"));
        assert!(tmp.path().join(&task.filename).exists());
    }

    #[tokio::test]
    async fn existing_target_is_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.vpk"), b"original").unwrap();
        let server = TestServer::start(vec![Reply::bytes(b"replacement")]).await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/a"), "a.vpk"))
            .await;
        let task = wait_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.starts_with("File already exists"));
        assert_eq!(std::fs::read(tmp.path().join("a.vpk")).unwrap(), b"original");
        assert_eq!(temp_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn cancel_mid_transfer_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::Stall {
            declared: 100_000,
            sent: vec![1u8; 5_000],
        }])
        .await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/slow"), "big.vpk"))
            .await;
        wait_for(&manager, &id, |t| t.downloaded_size > 0).await;
        assert!(manager.has_active_downloads().await);

        manager.cancel_download_task(&id).await;
        let task = manager.get_download_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.error, CANCELLED_MESSAGE);

        for _ in 0..200 {
            if temp_files(tmp.path()) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(temp_files(tmp.path()), 0);
        assert!(!tmp.path().join("big.vpk").exists());

        let summary = manager.task_summary().await;
        assert_eq!((summary.cancelled, summary.failed), (1, 0));
    }

    #[tokio::test]
    async fn retry_after_failure_starts_clean() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::Status(404), Reply::bytes(b"second time")]).await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/r"), "r.vpk"))
            .await;
        assert_eq!(wait_terminal(&manager, &id).await.status, TaskStatus::Failed);

        manager.retry_download_task(&id).await;
        let task = wait_for(&manager, &id, |t| t.status == TaskStatus::Completed).await;
        assert!(task.error.is_empty());
        assert_eq!(task.downloaded_size, 11);
        assert_eq!(std::fs::read(tmp.path().join("r.vpk")).unwrap(), b"second time");
    }

    #[tokio::test]
    async fn retry_is_ignored_for_completed_tasks() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::bytes(b"x")]).await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/c"), "c.vpk"))
            .await;
        wait_terminal(&manager, &id).await;
        manager.retry_download_task(&id).await;
        manager.cancel_download_task(&id).await;

        let task = manager.get_download_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn clearing_keeps_nothing_finished() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::bytes(b"x")]).await;
        let (manager, mut rx) = manager(tmp.path());

        let id = manager
            .start_download_task(workshop(&server.url("/c"), "c.vpk"))
            .await;
        wait_terminal(&manager, &id).await;
        manager.clear_completed_tasks().await;

        assert!(manager.get_download_tasks().await.is_empty());
        let mut cleared = false;
        while let Ok(event) = rx.try_recv() {
            cleared |= matches!(event, AppEvent::TasksCleared);
        }
        assert!(cleared);
    }

    #[tokio::test]
    async fn direct_zip_is_extracted() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = crate::core::extract::fixtures::build(&[("inner/addon.vpk", b"VPK")]);
        let server = TestServer::start(vec![Reply::attachment(
            &zip,
            "attachment; filename=pack.zip",
        )])
        .await;
        let (manager, _rx) = manager(tmp.path());

        let id = manager
            .start_download_task(WorkshopFileDetails::direct(&server.url("/z"), "unknown.vpk"))
            .await;
        let task = wait_terminal(&manager, &id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(tmp.path().join("pack.zip").exists());
        assert_eq!(std::fs::read(tmp.path().join("addon.vpk")).unwrap(), b"VPK");
    }

    #[tokio::test]
    async fn cancel_during_retry_backoff() {
        let tmp = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![Reply::Status(500)]).await;
        let settings = DownloadSettings {
            retry_backoff_ms: 10_000,
            ..test_settings()
        };
        let (manager, _rx) = manager_with(tmp.path(), settings);

        let id = manager
            .start_download_task(workshop(&server.url("/flaky"), "a.vpk"))
            .await;
        for _ in 0..500 {
            if server.hits() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        manager.cancel_download_task(&id).await;
        tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
            .await
            .expect("worker still sleeping after cancel");

        let task = manager.get_download_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.error, CANCELLED_MESSAGE);
        assert_eq!(server.hits(), 1);
        assert_eq!(temp_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn cancel_before_completion_removes_installed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(Mutex::new(TaskRegistry::new()));
        let info = DownloadTaskInfo {
            id: "t".into(),
            workshop_id: "1".into(),
            title: "t".into(),
            filename: "a.vpk".into(),
            preview_url: String::new(),
            file_url: "http://127.0.0.1:9/a.vpk".into(),
            status: TaskStatus::Pending,
            progress: 0,
            total_size: 0,
            downloaded_size: 0,
            speed: String::new(),
            error: String::new(),
            created_at: String::new(),
        };
        let (cancel, generation) = registry.lock().await.insert(info);
        registry
            .lock()
            .await
            .set_status("t", generation, TaskStatus::Downloading, "");
        let (emitter, _rx) = ChannelEmitter::new();
        let ctx = WorkerContext {
            registry: registry.clone(),
            root: RootDir::new(Some(tmp.path().to_path_buf())),
            client: reqwest::Client::new(),
            settings: Arc::new(test_settings()),
            emitter,
            id: "t".into(),
            generation,
            cancel,
        };

        let temp_path = tmp.path().join("partial");
        std::fs::write(&temp_path, b"vpk").unwrap();
        registry.lock().await.cancel("t");

        let target = tmp.path().join("a.vpk");
        assert!(!install(&ctx, &temp_path, &target).await);
        assert!(!target.exists());
        assert!(!temp_path.exists());
        assert_eq!(
            registry.lock().await.snapshot("t").unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn cancel_during_extraction_keeps_completed_pack() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = crate::core::extract::fixtures::build(&[("addon.vpk", b"VPK")]);
        let server = TestServer::start(vec![Reply::attachment(
            &zip,
            "attachment; filename=pack.zip",
        )])
        .await;
        let (manager, mut rx) = manager(tmp.path());

        let id = manager
            .start_download_task(WorkshopFileDetails::direct(&server.url("/z"), ""))
            .await;
        while let Some(event) = rx.recv().await {
            if matches!(&event, AppEvent::TaskUpdated(t) if t.status == TaskStatus::Completed) {
                break;
            }
        }
        manager.cancel_download_task(&id).await;
        manager.shutdown().await;

        let task = manager.get_download_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(tmp.path().join("pack.zip").exists());
        assert_eq!(std::fs::read(tmp.path().join("addon.vpk")).unwrap(), b"VPK");
    }
}
