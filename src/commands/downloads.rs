use std::future::Future;
use std::time::Duration;

use vpk_manager_core::core::events::EventEmitter;
use vpk_manager_core::core::filename::filename_from_url;
use vpk_manager_core::core::queue::DownloadManager;
use vpk_manager_core::core::workshop::WorkshopClient;
use vpk_manager_core::models::task::{DownloadTaskInfo, TaskStatus};
use vpk_manager_core::models::workshop::WorkshopFileDetails;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Workshop page links and bare ids go through the details API; any other
/// URL is downloaded as-is.
pub fn is_workshop_input(input: &str) -> bool {
    let input = input.trim();
    input.contains("steamcommunity.com") || (!input.is_empty() && input.chars().all(|c| c.is_ascii_digit()))
}

pub async fn resolve_details(
    input: &str,
    workshop: &WorkshopClient,
) -> anyhow::Result<WorkshopFileDetails> {
    if is_workshop_input(input) {
        return workshop.fetch_file_details(input).await;
    }
    let url = input.trim();
    Ok(WorkshopFileDetails::direct(url, &filename_from_url(url)))
}

pub async fn start_downloads<E: EventEmitter>(
    manager: &DownloadManager<E>,
    details: Vec<WorkshopFileDetails>,
) -> Vec<String> {
    let mut ids = Vec::with_capacity(details.len());
    for d in details {
        ids.push(manager.start_download_task(d).await);
    }
    ids
}

/// Waits until nothing is pending or downloading. When `shutdown` resolves
/// first, every active task is cancelled. Returns only after every worker has
/// exited, so no partial file is left in `temp`.
pub async fn wait_for_downloads<E, F>(
    manager: &DownloadManager<E>,
    ids: &[String],
    shutdown: F,
) -> Vec<DownloadTaskInfo>
where
    E: EventEmitter,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut interrupted = false;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown, if !interrupted => {
                tracing::warn!("[download] interrupted, cancelling active downloads");
                manager.cancel_all().await;
                interrupted = true;
            }
            _ = ticker.tick() => {}
        }
        if !manager.has_active_downloads().await {
            break;
        }
    }
    manager.shutdown().await;

    let mut tasks = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(task) = manager.get_download_task(id).await {
            tasks.push(task);
        }
    }
    tasks
}

pub fn render_tasks(tasks: &[DownloadTaskInfo]) -> String {
    let mut out = String::new();
    for t in tasks {
        match t.status {
            TaskStatus::Failed | TaskStatus::Cancelled => {
                out.push_str(&format!("{:<10} {}  ({})\n", t.status, t.filename, t.error))
            }
            _ => out.push_str(&format!("{:<10} {}\n", t.status, t.filename)),
        }
    }
    let failed = tasks.iter().filter(|t| t.status != TaskStatus::Completed).count();
    out.push_str(&format!(
        "{} completed, {} not completed",
        tasks.len() - failed,
        failed
    ));
    out
}
