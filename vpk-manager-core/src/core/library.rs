//! In-memory catalogue of the addons under the root directory.
//!
//! Records are keyed by absolute path and survive between scans: a file whose
//! size and modification time are unchanged is not parsed again, only its
//! location is refreshed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::core::addoninfo::{AddonInfo, ADDONINFO_PATH};
use crate::core::classifier::{
    compose_filename, parse_filename_tags, split_filename_tags, ClassifierRules, TAG_OTHER,
};
use crate::core::conflict::{is_vpk_file, normalize_internal_path, scan_parallelism, vpk_files_in};
use crate::core::events::{AppEvent, ErrorInfo, EventEmitter, ProgressInfo};
use crate::core::extract::export_to_zip;
use crate::core::preview::find_preview;
use crate::core::root_dir::{RootDir, DISABLED_DIR, WORKSHOP_DIR};
use crate::core::vpk::ArchiveReader;
use crate::error::ManagerError;
use crate::models::addon::{AddonRecord, BatchFailure, BatchOutcome, ExportSummary, Location};

const PROGRESS_EVERY: usize = 5;

#[derive(Debug, Clone)]
struct CachedAddon {
    record: AddonRecord,
    modified: SystemTime,
    size: u64,
}

/// Everything taken from inside the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAddon {
    pub primary_tag: String,
    pub secondary_tags: Vec<String>,
    pub info: AddonInfo,
    pub preview_image: Option<String>,
}

pub fn parse_addon<R: ArchiveReader + ?Sized>(
    reader: &R,
    rules: &ClassifierRules,
    archive: &Path,
) -> anyhow::Result<ParsedAddon> {
    let paths = reader.list_paths(archive)?;
    let normalized: Vec<String> = paths.iter().map(|p| normalize_internal_path(p)).collect();

    let info = match paths
        .iter()
        .zip(&normalized)
        .find(|(_, n)| n.as_str() == ADDONINFO_PATH)
    {
        Some((stored, _)) => match reader.read_entry(archive, stored) {
            Ok(Some(data)) => AddonInfo::from_bytes(&data),
            Ok(None) => AddonInfo::default(),
            Err(e) => {
                tracing::debug!("[library] addoninfo unreadable in {}: {}", archive.display(), e);
                AddonInfo::default()
            }
        },
        None => AddonInfo::default(),
    };

    let mut classification = rules.classify(&normalized, &info.search_text());
    let filename = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Some((primary, secondary)) = parse_filename_tags(&filename) {
        classification.primary_tag = primary;
        classification.secondary_tags = secondary;
    }

    Ok(ParsedAddon {
        primary_tag: classification.primary_tag,
        secondary_tags: classification.secondary_tags,
        preview_image: find_preview(reader, archive, &paths),
        info,
    })
}

/// Derived from the first component below the root.
pub fn location_of(root: &Path, path: &Path) -> Location {
    let first = path
        .strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .and_then(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        });
    match first {
        Some(WORKSHOP_DIR) => Location::Workshop,
        Some(DISABLED_DIR) => Location::Disabled,
        _ => Location::Root,
    }
}

fn collect_recursive(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_recursive(&path, out)?;
        } else if file_type.is_file() && is_vpk_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// `.vpk` files directly in the root plus everything below `workshop` and
/// `disabled`.
pub fn collect_addon_files(root: &Path) -> Result<Vec<PathBuf>, ManagerError> {
    let mut files = vpk_files_in(root)?;
    for sub in [WORKSHOP_DIR, DISABLED_DIR] {
        let dir = root.join(sub);
        if dir.is_dir() {
            collect_recursive(&dir, &mut files)?;
        }
    }
    files.sort();
    Ok(files)
}

fn build_record(root: &Path, path: &Path, size: u64, modified: SystemTime, parsed: ParsedAddon) -> AddonRecord {
    let location = location_of(root, path);
    AddonRecord {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        size,
        primary_tag: parsed.primary_tag,
        secondary_tags: parsed.secondary_tags,
        location,
        enabled: location.is_enabled(),
        last_modified: chrono::DateTime::<chrono::Utc>::from(modified).to_rfc3339(),
        title: parsed.info.title,
        author: parsed.info.author,
        version: parsed.info.version,
        description: parsed.info.description,
        addon_url: parsed.info.url,
        preview_image: parsed.preview_image,
    }
}

pub struct Library<R: ArchiveReader, E: EventEmitter> {
    root: RootDir,
    reader: Arc<R>,
    emitter: E,
    rules: Arc<ClassifierRules>,
    cache: Arc<Mutex<HashMap<PathBuf, CachedAddon>>>,
}

impl<R: ArchiveReader, E: EventEmitter> Library<R, E> {
    pub fn new(root: RootDir, reader: Arc<R>, emitter: E, rules: ClassifierRules) -> Self {
        Self {
            root,
            reader,
            emitter,
            rules: Arc::new(rules),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Refreshes the catalogue and returns the number of known addons.
    pub async fn scan(&self) -> Result<usize, ManagerError> {
        let root = self.root.require()?;
        let files = collect_addon_files(&root)?;
        let total = files.len();

        {
            let present: HashSet<&PathBuf> = files.iter().collect();
            let mut cache = self.cache.lock().await;
            cache.retain(|path, _| {
                let keep = present.contains(path);
                if !keep {
                    tracing::debug!("[library] dropping vanished {}", path.display());
                }
                keep
            });
        }

        tracing::info!("[library] scanning {} addons under {}", total, root.display());
        self.emitter.emit(AppEvent::ScanProgress(ProgressInfo::new(
            0,
            total,
            "Scanning addons...",
        )));

        let processed = Arc::new(Mutex::new(0usize));
        let semaphore = Arc::new(Semaphore::new(scan_parallelism()));
        let mut join_set = JoinSet::new();

        for path in files {
            let root = root.clone();
            let reader = self.reader.clone();
            let rules = self.rules.clone();
            let cache = self.cache.clone();
            let emitter = self.emitter.clone();
            let processed = processed.clone();
            let semaphore = semaphore.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                refresh_one(&root, &path, reader, rules, &cache, &emitter).await;

                let current = {
                    let mut count = processed.lock().await;
                    *count += 1;
                    *count
                };
                if current % PROGRESS_EVERY == 0 || current == total {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    emitter.emit(AppEvent::ScanProgress(ProgressInfo::new(
                        current,
                        total,
                        format!("Parsed: {}", name),
                    )));
                }
            });
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                tracing::warn!("[library] scan unit aborted: {}", e);
            }
        }

        let count = self.cache.lock().await.len();
        tracing::info!("[library] {} addons in catalogue", count);
        Ok(count)
    }

    pub async fn addons(&self) -> Vec<AddonRecord> {
        let cache = self.cache.lock().await;
        let mut records: Vec<AddonRecord> = cache.values().map(|c| c.record.clone()).collect();
        records.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.path.cmp(&b.path))
        });
        records
    }

    pub async fn get(&self, path: &Path) -> Option<AddonRecord> {
        let key = self.resolve(path).ok()?;
        self.cache.lock().await.get(&key).map(|c| c.record.clone())
    }

    /// Case-insensitive text match over name, title and author; `primary`
    /// must be equal when given; every tag in `secondary` must be present.
    pub async fn search(
        &self,
        query: &str,
        primary: Option<&str>,
        secondary: &[String],
    ) -> Vec<AddonRecord> {
        let query = query.trim().to_lowercase();
        self.addons()
            .await
            .into_iter()
            .filter(|r| {
                query.is_empty()
                    || r.name.to_lowercase().contains(&query)
                    || r.title.to_lowercase().contains(&query)
                    || r.author.to_lowercase().contains(&query)
            })
            .filter(|r| primary.is_none_or(|p| r.primary_tag == p))
            .filter(|r| secondary.iter().all(|t| r.secondary_tags.contains(t)))
            .collect()
    }

    /// Primary tags in rule order, `other` last.
    pub fn primary_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for rule in &self.rules.primary {
            if !tags.contains(&rule.tag) {
                tags.push(rule.tag.clone());
            }
        }
        tags.retain(|t| t != TAG_OTHER);
        tags.push(TAG_OTHER.to_string());
        tags
    }

    pub async fn secondary_tags(&self, primary: Option<&str>) -> Vec<String> {
        let cache = self.cache.lock().await;
        let tags: BTreeSet<String> = cache
            .values()
            .filter(|c| primary.is_none_or(|p| c.record.primary_tag == p))
            .flat_map(|c| c.record.secondary_tags.iter().cloned())
            .collect();
        tags.into_iter().collect()
    }

    /// Enables or disables an addon by moving it between the root (or
    /// `workshop`) and `disabled`.
    pub async fn toggle(&self, path: &Path) -> Result<AddonRecord, ManagerError> {
        let root = self.root.require()?;
        self.relocate(&root, path, |record| match record.location {
            Location::Root | Location::Workshop => Ok(root.join(DISABLED_DIR).join(&record.name)),
            Location::Disabled => Ok(root.join(&record.name)),
        })
        .await
    }

    /// Moves a workshop subscription into the root so it is managed locally.
    pub async fn promote_workshop(&self, path: &Path) -> Result<AddonRecord, ManagerError> {
        let root = self.root.require()?;
        self.relocate(&root, path, |record| match record.location {
            Location::Workshop => Ok(root.join(&record.name)),
            other => Err(ManagerError::InvalidLocation(other.to_string())),
        })
        .await
    }

    /// Hides or shows an addon by adding or removing the leading `_`.
    pub async fn toggle_visibility(&self, path: &Path) -> Result<AddonRecord, ManagerError> {
        let root = self.root.require()?;
        self.relocate(&root, path, |record| {
            let name = match record.name.strip_prefix('_') {
                Some(rest) => rest.to_string(),
                None => format!("_{}", record.name),
            };
            if name.is_empty() {
                return Err(ManagerError::InvalidName(record.name.clone()));
            }
            Ok(record.path.with_file_name(name))
        })
        .await
    }

    /// Writes the tags into the file name as `[primary,secondary...]`. With
    /// no tags the bracket is removed and the archive is classified again.
    pub async fn set_tags(
        &self,
        path: &Path,
        primary: &str,
        secondary: &[String],
    ) -> Result<AddonRecord, ManagerError> {
        let root = self.root.require()?;
        let record = self
            .relocate(&root, path, |record| {
                let parts = split_filename_tags(&record.name);
                let name = compose_filename(parts.hidden, primary, secondary, &parts.base);
                Ok(record.path.with_file_name(name))
            })
            .await?;

        Ok(self.retag(&root, record, true).await)
    }

    /// Brings the cached tags in line with the tags written in the file name.
    /// An untagged name is classified from the archive again when `reparse`.
    async fn retag(&self, root: &Path, record: AddonRecord, reparse: bool) -> AddonRecord {
        match parse_filename_tags(&record.name) {
            Some((primary, secondary)) => {
                let mut cache = self.cache.lock().await;
                let Some(cached) = cache.get_mut(&record.path) else {
                    return record;
                };
                cached.record.primary_tag = primary;
                cached.record.secondary_tags = secondary;
                cached.record.clone()
            }
            None if reparse => {
                self.cache.lock().await.remove(&record.path);
                refresh_one(
                    root,
                    &record.path,
                    self.reader.clone(),
                    self.rules.clone(),
                    &self.cache,
                    &self.emitter,
                )
                .await;
                self.get(&record.path).await.unwrap_or(record)
            }
            None => record,
        }
    }

    /// Renames an addon in place. Tags written in the old name carry over
    /// unless the new name brings its own; `.vpk` is appended when missing.
    pub async fn rename(&self, path: &Path, new_name: &str) -> Result<AddonRecord, ManagerError> {
        let root = self.root.require()?;
        let cleaned = sanitize_filename::sanitize(new_name.trim()).trim().to_string();
        if cleaned.is_empty() || cleaned.trim_matches('.').is_empty() {
            return Err(ManagerError::InvalidName(new_name.to_string()));
        }

        let record = self
            .relocate(&root, path, |record| {
                let mut name = cleaned.clone();
                if let Some((primary, secondary)) = split_filename_tags(&record.name).tags {
                    if parse_filename_tags(&name).is_none() {
                        let parts = split_filename_tags(&name);
                        name = compose_filename(parts.hidden, &primary, &secondary, &parts.base);
                    }
                }
                if !name.to_ascii_lowercase().ends_with(".vpk") {
                    name.push_str(".vpk");
                }
                Ok(record.path.with_file_name(name))
            })
            .await?;
        Ok(self.retag(&root, record, false).await)
    }

    /// Removes one addon file from disk and from the catalogue. Only `.vpk`
    /// files below the root are accepted.
    pub async fn delete(&self, path: &Path) -> Result<(), ManagerError> {
        let root = self.root.require()?;
        let target = self.resolve(path)?;
        if !target.starts_with(&root) || !is_vpk_file(&target) {
            return Err(ManagerError::NotManaged(target));
        }

        let meta = match tokio::fs::metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManagerError::FileNotFound(target));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(ManagerError::NotManaged(target));
        }

        tokio::fs::remove_file(&target).await?;
        self.cache.lock().await.remove(&target);
        tracing::info!("[library] deleted {}", target.display());
        Ok(())
    }

    /// Deletes every path it can; failures are collected per file.
    pub async fn delete_many(&self, paths: &[PathBuf]) -> Result<BatchOutcome, ManagerError> {
        self.root.require()?;
        let mut outcome = BatchOutcome::default();
        for path in paths {
            match self.delete(path).await {
                Ok(()) => outcome.succeeded.push(path.clone()),
                Err(e) => {
                    tracing::warn!("[library] could not delete {}: {}", path.display(), e);
                    outcome.failed.push(BatchFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }

    /// Packs the given addons into a new zip at `dest`, skipping files that
    /// cannot be read.
    pub async fn export_zip(&self, paths: &[PathBuf], dest: &Path) -> anyhow::Result<ExportSummary> {
        let sources = paths
            .iter()
            .map(|p| self.resolve(p))
            .collect::<Result<Vec<_>, _>>()?;
        if tokio::fs::try_exists(dest).await? {
            return Err(ManagerError::AlreadyExists(dest.to_path_buf()).into());
        }

        let dest = dest.to_path_buf();
        let emitter = self.emitter.clone();
        tokio::task::spawn_blocking(move || export_to_zip(&sources, &dest, &emitter))
            .await
            .map_err(|e| anyhow::anyhow!("Spawn blocking failed: {}", e))?
    }

    async fn relocate<F>(&self, root: &Path, path: &Path, target: F) -> Result<AddonRecord, ManagerError>
    where
        F: FnOnce(&AddonRecord) -> Result<PathBuf, ManagerError>,
    {
        let source = self.resolve(path)?;
        let mut cache = self.cache.lock().await;
        let Some(mut entry) = cache.get(&source).cloned() else {
            return Err(ManagerError::NotManaged(source));
        };

        let dest = target(&entry.record)?;
        if dest == source {
            return Ok(entry.record);
        }
        if tokio::fs::try_exists(&dest).await? {
            return Err(ManagerError::AlreadyExists(dest));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &dest).await?;

        let location = location_of(root, &dest);
        entry.record.name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        entry.record.path = dest.clone();
        entry.record.location = location;
        entry.record.enabled = location.is_enabled();
        cache.remove(&source);
        cache.insert(dest.clone(), entry.clone());

        tracing::info!(
            "[library] moved {} -> {}",
            source.display(),
            dest.display()
        );
        Ok(entry.record)
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, ManagerError> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        Ok(self.root.require()?.join(path))
    }
}

async fn refresh_one<R: ArchiveReader, E: EventEmitter>(
    root: &Path,
    path: &Path,
    reader: Arc<R>,
    rules: Arc<ClassifierRules>,
    cache: &Mutex<HashMap<PathBuf, CachedAddon>>,
    emitter: &E,
) {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("[library] cannot stat {}: {}", path.display(), e);
            return;
        }
    };
    let size = meta.len();
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

    {
        let mut cache = cache.lock().await;
        if let Some(cached) = cache.get_mut(path) {
            if cached.size == size && cached.modified == modified {
                let location = location_of(root, path);
                cached.record.location = location;
                cached.record.enabled = location.is_enabled();
                cached.record.path = path.to_path_buf();
                return;
            }
            tracing::debug!("[library] {} changed, parsing again", path.display());
        }
    }

    let parsed = {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || parse_addon(reader.as_ref(), &rules, &path)).await
    };

    let parsed = match parsed {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(e)) => {
            tracing::warn!("[library] failed to parse {}: {}", path.display(), e);
            emitter.emit(AppEvent::Error(ErrorInfo::new(
                "vpk_parse",
                e.to_string(),
                path.display().to_string(),
            )));
            return;
        }
        Err(e) => {
            tracing::warn!("[library] parser task for {} failed: {}", path.display(), e);
            return;
        }
    };

    let record = build_record(root, path, size, modified, parsed);
    cache.lock().await.insert(
        path.to_path_buf(),
        CachedAddon {
            record,
            modified,
            size,
        },
    );
}
