use vpk_manager_core::core::conflict::ConflictChecker;
use vpk_manager_core::core::events::EventEmitter;
use vpk_manager_core::core::vpk::ArchiveReader;
use vpk_manager_core::models::conflict::{ConflictResult, Severity};

/// Files listed per group before the rest is summarised.
const MAX_LISTED_FILES: usize = 10;

pub async fn check_conflicts<R: ArchiveReader, E: EventEmitter>(
    checker: &ConflictChecker<R, E>,
) -> anyhow::Result<ConflictResult> {
    let result = checker.check_conflicts().await?;
    let critical = result
        .conflict_groups
        .iter()
        .filter(|g| g.severity == Severity::Critical)
        .count();
    tracing::info!(
        "[conflict] {} conflicting files in {} groups ({} critical)",
        result.total_conflicts,
        result.conflict_groups.len(),
        critical
    );
    Ok(result)
}

pub fn render_conflicts(result: &ConflictResult) -> String {
    if result.conflict_groups.is_empty() {
        return "No conflicts found".to_string();
    }

    let mut out = String::new();
    for group in &result.conflict_groups {
        out.push_str(&format!(
            "[{}] {}\n",
            group.severity,
            group.vpk_files.join(" <> ")
        ));
        for file in group.files.iter().take(MAX_LISTED_FILES) {
            out.push_str(&format!("    {}\n", file));
        }
        if group.files.len() > MAX_LISTED_FILES {
            out.push_str(&format!(
                "    ... and {} more\n",
                group.files.len() - MAX_LISTED_FILES
            ));
        }
    }
    out.push_str(&format!(
        "{} conflicting files in {} groups",
        result.total_conflicts,
        result.conflict_groups.len()
    ));
    out
}
