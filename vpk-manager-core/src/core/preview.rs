use std::path::Path;

use base64::Engine;

use crate::core::vpk::ArchiveReader;

pub const ADDON_IMAGE_PATH: &str = "addonimage.jpg";

const PREVIEW_PATTERNS: &[&str] = &[
    ".jpg",
    ".jpeg",
    ".png",
    "materials/vgui/maps/menu/",
    "materials/vgui/loadingscreen",
    "resource/overviews/",
];

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg"];

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

/// Wraps JPEG or PNG bytes in a `data:` URL. Anything else (VTF, truncated
/// files) yields `None`.
pub fn encode_image(data: &[u8]) -> Option<String> {
    let mime = if data.starts_with(JPEG_MAGIC) {
        "image/jpeg"
    } else if data.starts_with(PNG_MAGIC) {
        "image/png"
    } else {
        return None;
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    Some(format!("data:{};base64,{}", mime, encoded))
}

fn is_preview_candidate(lower: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        && PREVIEW_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Picks the preview for an archive: `addonimage.jpg`, else the first image
/// matching the usual preview locations, else a `<name>.jpg` beside the file.
/// `paths` are the archive's entries as stored.
pub fn find_preview<R: ArchiveReader + ?Sized>(
    reader: &R,
    archive: &Path,
    paths: &[String],
) -> Option<String> {
    let mut addon_image = None;
    let mut candidate = None;
    for p in paths {
        let lower = p.replace('\\', "/").to_lowercase();
        if addon_image.is_none() && lower == ADDON_IMAGE_PATH {
            addon_image = Some(p.as_str());
        }
        if candidate.is_none() && addon_image.is_none() && is_preview_candidate(&lower) {
            candidate = Some(p.as_str());
        }
    }

    for entry in [addon_image, candidate].into_iter().flatten() {
        match reader.read_entry(archive, entry) {
            Ok(Some(data)) => {
                if let Some(url) = encode_image(&data) {
                    return Some(url);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("[library] preview read failed for {}: {}", entry, e),
        }
    }

    let external = archive.with_extension("jpg");
    std::fs::read(&external)
        .ok()
        .and_then(|data| encode_image(&data))
}
