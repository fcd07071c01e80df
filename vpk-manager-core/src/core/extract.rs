use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::events::{AppEvent, EventEmitter, ProgressInfo};
use crate::core::filename::clean_filename;
use crate::models::addon::{BatchFailure, ExportSummary};

/// Copies every `.vpk` entry of a zip into `dest`, flattening directories.
/// Entries whose target already exists or that fail to copy are skipped.
pub fn extract_vpks_from_zip(zip_path: &Path, dest: &Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(zip_path)
        .map_err(|e| anyhow!("Failed to open archive: {}", e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| anyhow!("Failed to open zip: {}", e))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("[extract] unreadable entry #{} in {}: {}", i, zip_path.display(), e);
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        if !name.to_lowercase().ends_with(".vpk") {
            continue;
        }
        let base = clean_filename(&name);
        if base.is_empty() {
            continue;
        }

        let target = dest.join(&base);
        if target.exists() {
            tracing::warn!("[extract] {} already exists, skipping", target.display());
            continue;
        }

        let copied = std::fs::File::create(&target)
            .and_then(|mut out| std::io::copy(&mut entry, &mut out));
        match copied {
            Ok(_) => {
                extracted += 1;
                tracing::info!("[extract] {} -> {}", name, target.display());
            }
            Err(e) => {
                tracing::warn!("[extract] failed to extract {}: {}", name, e);
                let _ = std::fs::remove_file(&target);
            }
        }
    }

    if extracted == 0 {
        return Err(anyhow!("No VPK files found in {}", zip_path.display()));
    }
    Ok(extracted)
}

pub async fn extract_vpks(zip_path: PathBuf, dest: PathBuf) -> anyhow::Result<usize> {
    tokio::task::spawn_blocking(move || extract_vpks_from_zip(&zip_path, &dest))
        .await
        .map_err(|e| anyhow!("Spawn blocking failed: {}", e))?
}

fn add_to_zip(
    writer: &mut ZipWriter<File>,
    source: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> anyhow::Result<()> {
    let mut input = File::open(source).map_err(|e| anyhow!("Failed to open: {}", e))?;
    writer
        .start_file(name, options)
        .map_err(|e| anyhow!("Failed to add entry: {}", e))?;
    std::io::copy(&mut input, writer).map_err(|e| anyhow!("Failed to copy: {}", e))?;
    Ok(())
}

/// Writes `sources` into a new deflated zip at `dest`, each under its base
/// name. Unreadable files and repeated names are skipped and reported;
/// `export_progress` fires once per source.
pub fn export_to_zip<E: EventEmitter>(
    sources: &[PathBuf],
    dest: &Path,
    emitter: &E,
) -> anyhow::Result<ExportSummary> {
    let file = File::options()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| anyhow!("Failed to create {}: {}", dest.display(), e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let total = sources.len();
    let mut names = HashSet::new();
    let mut summary = ExportSummary {
        path: dest.to_path_buf(),
        exported: 0,
        skipped: Vec::new(),
    };

    for (i, source) in sources.iter().enumerate() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        emitter.emit(AppEvent::ExportProgress(ProgressInfo::new(
            i + 1,
            total,
            format!("Exporting: {}", name),
        )));

        let added = if name.is_empty() {
            Err(anyhow!("No file name"))
        } else if !names.insert(name.to_lowercase()) {
            Err(anyhow!("Duplicate name in archive: {}", name))
        } else {
            add_to_zip(&mut writer, source, &name, options)
        };
        match added {
            Ok(()) => summary.exported += 1,
            Err(e) => {
                tracing::warn!("[export] skipping {}: {}", source.display(), e);
                summary.skipped.push(BatchFailure {
                    path: source.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    writer
        .finish()
        .map_err(|e| anyhow!("Failed to finish {}: {}", dest.display(), e))?;
    if summary.exported == 0 {
        let _ = std::fs::remove_file(dest);
        bail!("No files could be exported to {}", dest.display());
    }
    tracing::info!("[export] {} files -> {}", summary.exported, dest.display());
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;
    use std::path::Path;

    pub(crate) fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    pub(crate) fn write(path: &Path, entries: &[(&str, &[u8])]) {
        std::fs::write(path, build(entries)).unwrap();
    }
}
