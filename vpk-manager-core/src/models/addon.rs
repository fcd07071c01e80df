use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Root,
    Workshop,
    Disabled,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Root => "root",
            Location::Workshop => "workshop",
            Location::Disabled => "disabled",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Location::Disabled)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddonRecord {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub primary_tag: String,
    pub secondary_tags: Vec<String>,
    pub location: Location,
    pub enabled: bool,
    pub last_modified: String,
    pub title: String,
    pub author: String,
    pub version: String,
    pub description: String,
    pub addon_url: String,
    pub preview_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Result of a best-effort operation over several files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchOutcome {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub exported: usize,
    pub skipped: Vec<BatchFailure>,
}
