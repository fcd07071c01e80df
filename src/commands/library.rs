use std::path::{Path, PathBuf};

use serde::Serialize;
use vpk_manager_core::core::events::EventEmitter;
use vpk_manager_core::core::library::Library;
use vpk_manager_core::core::vpk::ArchiveReader;
use vpk_manager_core::models::addon::{AddonRecord, BatchOutcome, ExportSummary};

#[derive(Debug, Clone, Default)]
pub struct AddonFilter {
    pub query: String,
    pub primary: Option<String>,
    pub secondary: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TagOverview {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
}

pub async fn scan_addons<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    filter: &AddonFilter,
) -> anyhow::Result<Vec<AddonRecord>> {
    library.scan().await?;
    Ok(library
        .search(&filter.query, filter.primary.as_deref(), &filter.secondary)
        .await)
}

pub async fn list_tags<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    primary: Option<&str>,
) -> anyhow::Result<TagOverview> {
    library.scan().await?;
    Ok(TagOverview {
        primary: library.primary_tags(),
        secondary: library.secondary_tags(primary).await,
    })
}

pub async fn toggle_addon<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    path: &Path,
) -> anyhow::Result<AddonRecord> {
    library.scan().await?;
    let record = library.toggle(path).await?;
    tracing::info!(
        "[library] {} is now {}",
        record.name,
        if record.enabled { "enabled" } else { "disabled" }
    );
    Ok(record)
}

pub async fn promote_addon<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    path: &Path,
) -> anyhow::Result<AddonRecord> {
    library.scan().await?;
    let record = library.promote_workshop(path).await?;
    tracing::info!("[library] {} moved to {}", record.name, record.path.display());
    Ok(record)
}

pub async fn toggle_visibility<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    path: &Path,
) -> anyhow::Result<AddonRecord> {
    library.scan().await?;
    Ok(library.toggle_visibility(path).await?)
}

pub async fn set_addon_tags<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    path: &Path,
    primary: Option<&str>,
    secondary: &[String],
) -> anyhow::Result<AddonRecord> {
    library.scan().await?;
    let record = library
        .set_tags(path, primary.unwrap_or_default(), secondary)
        .await?;
    tracing::info!("[library] {} tagged {}", record.name, record.primary_tag);
    Ok(record)
}

pub async fn rename_addon<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    path: &Path,
    new_name: &str,
) -> anyhow::Result<AddonRecord> {
    library.scan().await?;
    Ok(library.rename(path, new_name).await?)
}

pub async fn delete_addons<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    paths: &[PathBuf],
) -> anyhow::Result<BatchOutcome> {
    Ok(library.delete_many(paths).await?)
}

pub async fn export_addons<R: ArchiveReader, E: EventEmitter>(
    library: &Library<R, E>,
    paths: &[PathBuf],
    output: &Path,
) -> anyhow::Result<ExportSummary> {
    library.export_zip(paths, output).await
}

pub fn render_outcome(verb: &str, outcome: &BatchOutcome) -> String {
    let mut out = String::new();
    for failure in &outcome.failed {
        out.push_str(&format!("failed  {}  ({})\n", failure.path.display(), failure.error));
    }
    out.push_str(&format!(
        "{} {}, {} failed",
        outcome.succeeded.len(),
        verb,
        outcome.failed.len()
    ));
    out
}

pub fn render_export(summary: &ExportSummary) -> String {
    let mut out = String::new();
    for skipped in &summary.skipped {
        out.push_str(&format!("skipped {}  ({})\n", skipped.path.display(), skipped.error));
    }
    out.push_str(&format!(
        "{} files exported to {}",
        summary.exported,
        summary.path.display()
    ));
    out
}

fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB {
        format!("{:.1} MB", bytes as f64 / MB)
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}

pub fn render_addons(addons: &[AddonRecord]) -> String {
    let mut out = String::new();
    for a in addons {
        let state = if a.enabled { " " } else { "x" };
        let mut line = format!(
            "[{}] {:<40} {:<9} {:>10}  {}",
            state,
            a.name,
            a.primary_tag,
            format_size(a.size),
            a.location
        );
        if !a.title.is_empty() {
            line.push_str(&format!("  \"{}\"", a.title));
        }
        if !a.secondary_tags.is_empty() {
            line.push_str(&format!("  [{}]", a.secondary_tags.join(", ")));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&format!("{} addons", addons.len()));
    out
}
