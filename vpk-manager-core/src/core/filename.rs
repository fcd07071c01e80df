use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Folder names some uploaders bake into the file name.
const UNINFORMATIVE_PREFIXES: &[&str] = &["my l4d2addons", "myl4d2addons"];

const PLACEHOLDER_PREFIX: &str = "unknown";
const PLACEHOLDER_NAME: &str = "unknown.vpk";

static DISPOSITION_EXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\*\s*=\s*([A-Za-z0-9_\-]*)'[^']*'([^;]+)"#).unwrap()
});

static DISPOSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^;]+))"#).unwrap()
});

/// Reduces a declared filename to a bare, safe file name: path components
/// are dropped, known folder prefixes stripped, leftover separators trimmed.
pub fn clean_filename(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name = name.replace('\\', "/");
    let mut name = name.rsplit('/').next().unwrap_or_default().trim().to_string();

    for prefix in UNINFORMATIVE_PREFIXES {
        let matches = name
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if matches {
            name = name[prefix.len()..]
                .trim_start_matches([' ', '_', '-'])
                .to_string();
        }
    }

    let name = sanitize_filename::sanitize(name.trim());
    name.trim().to_string()
}

/// Names that still need to be resolved from the server response.
pub fn is_placeholder(name: &str) -> bool {
    name.is_empty() || name.to_ascii_lowercase().starts_with(PLACEHOLDER_PREFIX)
}

/// True when no usable name was found even after the response arrived.
pub fn needs_synthesized_name(name: &str) -> bool {
    name.is_empty() || name.eq_ignore_ascii_case(PLACEHOLDER_NAME)
}

pub fn synthesized_name() -> String {
    format!("unknown_{}.vpk", chrono::Utc::now().timestamp())
}

/// Extracts the file name from a `Content-Disposition` header value,
/// preferring the RFC 5987 `filename*` form.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    if let Some(caps) = DISPOSITION_EXT_RE.captures(header) {
        let raw = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        let raw = raw.trim_matches('"');
        if let Ok(decoded) = urlencoding::decode(raw) {
            if !decoded.trim().is_empty() {
                return Some(decoded.trim().to_string());
            }
        }
    }

    let caps = DISPOSITION_RE.captures(header)?;
    let value = match (caps.get(1), caps.get(2)) {
        (Some(quoted), _) => quoted.as_str().replace("\\\"", "\"").replace("\\\\", "\\"),
        (None, Some(token)) => token.as_str().trim().to_string(),
        _ => return None,
    };
    if value.trim().is_empty() {
        None
    } else {
        Some(value.trim().to_string())
    }
}

/// Scratch name for an in-flight download: derived from the target name and
/// the current time so concurrent downloads of the same file never collide.
pub fn temp_file_name(filename: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let digest = Sha256::digest(format!("{}-{}", filename, nanos).as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Content types that mean the server sent an error page instead of a file.
pub fn is_rejected_content_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("text/html") || essence.eq_ignore_ascii_case("application/json")
}

/// Name for a direct download before the server has a say: the last path
/// segment of the URL, or the placeholder when there is none.
pub fn filename_from_url(raw: &str) -> String {
    let segment = url::Url::parse(raw)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|s| !s.trim().is_empty());
    let Some(segment) = segment else {
        return PLACEHOLDER_NAME.to_string();
    };
    let decoded = urlencoding::decode(&segment)
        .map(|d| d.into_owned())
        .unwrap_or(segment);
    let cleaned = clean_filename(&decoded);
    if cleaned.is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        cleaned
    }
}
