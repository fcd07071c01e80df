use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::core::events::{AppEvent, EventEmitter, ProgressInfo};
use crate::core::root_dir::{RootDir, WORKSHOP_DIR};
use crate::core::vpk::ArchiveReader;
use crate::error::ManagerError;
use crate::models::conflict::{ConflictGroup, ConflictResult, Severity};

const PROGRESS_EVERY: usize = 5;

const IGNORED_PATHS: &[&str] = &["", "addoninfo.txt", "addonimage.vtf", "addonimage.jpg"];
const IGNORED_PREFIXES: &[&str] = &["materials/dev/", "materials/temp/"];

const CRITICAL_PATHS: &[&str] = &["particles/particles_manifest.txt", "scripts/soundmixers.txt"];
const CRITICAL_EXTENSIONS: &[&str] = &[".bsp", ".nav"];
const WARNING_EXTENSIONS: &[&str] = &[
    ".phy", ".vscript", ".nut", ".nuc", ".db", ".vtx", ".vvd", ".ttf", ".otf",
];

type PathIndex = HashMap<String, BTreeSet<String>>;

/// How much damage a duplicated internal path can do once both archives load.
pub fn classify_path(path: &str) -> Severity {
    let p = path.replace('\\', "/").to_lowercase();

    if CRITICAL_PATHS.contains(&p.as_str())
        || CRITICAL_EXTENSIONS.iter().any(|ext| p.ends_with(ext))
        || (p.starts_with("missions/") && p.ends_with(".txt"))
    {
        return Severity::Critical;
    }
    if p.starts_with("scripts/vscripts/") {
        return Severity::Warning;
    }
    if p.starts_with("scripts/") && p.ends_with(".txt") {
        return Severity::Critical;
    }
    if p == "sound/sound.cache"
        || (p.starts_with("resource/") && p.ends_with(".res"))
        || WARNING_EXTENSIONS.iter().any(|ext| p.ends_with(ext))
    {
        return Severity::Warning;
    }
    Severity::Info
}

pub fn normalize_internal_path(path: &str) -> String {
    path.replace('\\', "/").trim().to_lowercase()
}

/// Metadata and scratch files every addon ships; overlaps there are harmless.
pub fn is_ignored_path(normalized: &str) -> bool {
    IGNORED_PATHS.contains(&normalized)
        || IGNORED_PREFIXES.iter().any(|p| normalized.starts_with(p))
}

pub fn scan_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub(crate) fn is_vpk_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("vpk"))
}

pub(crate) fn vpk_files_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && is_vpk_file(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Archives that actually load in game: top level of the root and of
/// `workshop`. `disabled` is never looked at.
pub fn discover_archives(root: &Path) -> Result<Vec<PathBuf>, ManagerError> {
    let mut archives = vpk_files_in(root)?;
    let workshop = root.join(WORKSHOP_DIR);
    if workshop.is_dir() {
        archives.extend(vpk_files_in(&workshop)?);
    }
    Ok(archives)
}

/// Path relative to the root with forward slashes, e.g. `workshop/123.vpk`.
pub fn display_name(root: &Path, archive: &Path) -> String {
    match archive.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    }
}

/// Turns the path → owners index into groups keyed by the exact owner set.
pub fn group_conflicts(index: PathIndex) -> ConflictResult {
    let mut by_owners: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
    for (path, owners) in index {
        if owners.len() < 2 {
            continue;
        }
        by_owners
            .entry(owners.into_iter().collect())
            .or_default()
            .push(path);
    }

    let mut groups: Vec<ConflictGroup> = by_owners
        .into_iter()
        .map(|(vpk_files, mut files)| {
            files.sort();
            files.dedup();
            let severity = files
                .iter()
                .map(|f| classify_path(f))
                .max()
                .unwrap_or(Severity::Info);
            ConflictGroup {
                vpk_files,
                files,
                severity,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.files.len().cmp(&a.files.len()))
            .then_with(|| a.vpk_files.cmp(&b.vpk_files))
    });

    ConflictResult {
        total_conflicts: groups.len(),
        conflict_groups: groups,
    }
}

pub struct ConflictChecker<R: ArchiveReader, E: EventEmitter> {
    root: RootDir,
    reader: Arc<R>,
    emitter: E,
}

impl<R: ArchiveReader, E: EventEmitter> ConflictChecker<R, E> {
    pub fn new(root: RootDir, reader: Arc<R>, emitter: E) -> Self {
        Self {
            root,
            reader,
            emitter,
        }
    }

    fn progress(&self, current: usize, total: usize, message: impl Into<String>) {
        self.emitter.emit(AppEvent::ConflictCheckProgress(ProgressInfo::new(
            current, total, message,
        )));
    }

    pub async fn check_conflicts(&self) -> Result<ConflictResult, ManagerError> {
        let root = self.root.require()?;
        let archives = discover_archives(&root)?;
        let total = archives.len();
        if total == 0 {
            return Ok(ConflictResult::default());
        }

        tracing::info!("[conflict] checking {} archives under {}", total, root.display());
        self.progress(0, total, "Starting conflict scan...");

        let index: Arc<Mutex<PathIndex>> = Arc::new(Mutex::new(HashMap::new()));
        let processed = Arc::new(Mutex::new(0usize));
        let semaphore = Arc::new(Semaphore::new(scan_parallelism()));
        let mut join_set = JoinSet::new();

        for archive in archives {
            let index = index.clone();
            let processed = processed.clone();
            let semaphore = semaphore.clone();
            let reader = self.reader.clone();
            let emitter = self.emitter.clone();
            let name = display_name(&root, &archive);

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                let listing = {
                    let archive = archive.clone();
                    tokio::task::spawn_blocking(move || reader.list_paths(&archive)).await
                };

                let current = {
                    let mut count = processed.lock().await;
                    *count += 1;
                    *count
                };
                if current % PROGRESS_EVERY == 0 || current == total {
                    let file = archive
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    emitter.emit(AppEvent::ConflictCheckProgress(ProgressInfo::new(
                        current,
                        total,
                        format!("Analyzing: {}", file),
                    )));
                }

                let paths = match listing {
                    Ok(Ok(paths)) => paths,
                    Ok(Err(e)) => {
                        tracing::warn!("[conflict] skipping {}: {}", name, e);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("[conflict] reader task for {} failed: {}", name, e);
                        return;
                    }
                };

                let mut index = index.lock().await;
                for path in paths {
                    let normalized = normalize_internal_path(&path);
                    if is_ignored_path(&normalized) {
                        continue;
                    }
                    index.entry(normalized).or_default().insert(name.clone());
                }
            });
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                tracing::warn!("[conflict] scan unit aborted: {}", e);
            }
        }

        self.progress(total, total, "Collating conflict results...");

        let index = std::mem::take(&mut *index.lock().await);
        let result = group_conflicts(index);
        tracing::info!(
            "[conflict] found {} conflict groups across {} archives",
            result.total_conflicts,
            total
        );
        Ok(result)
    }
}
