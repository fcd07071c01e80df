use serde::{Deserialize, Serialize};

pub const ADDONINFO_PATH: &str = "addoninfo.txt";

/// The few `addoninfo.txt` keys the library shows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddonInfo {
    pub title: String,
    pub author: String,
    pub version: String,
    pub description: String,
    pub url: String,
}

impl AddonInfo {
    pub fn from_bytes(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        parse(text.trim_start_matches('\u{feff}'))
    }

    /// Title and description joined, for keyword matching.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Line-oriented reader for the KeyValues subset addons use. Nesting is
/// ignored: every `key "value"` line at any depth counts.
pub fn parse(text: &str) -> AddonInfo {
    let mut info = AddonInfo::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let Some((key, value)) = split_pair(line) else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "addontitle" => info.title = value.to_string(),
            "addonauthor" => info.author = value.to_string(),
            "addonversion" => info.version = value.to_string(),
            "addondescription" => info.description = value.to_string(),
            "addonurl0" => info.url = value.to_string(),
            _ => {}
        }
    }

    info
}

fn split_pair(line: &str) -> Option<(&str, &str)> {
    if let Some(rest) = line.strip_prefix('"') {
        let key_end = rest.find('"')?;
        let key = &rest[..key_end];
        let remainder = &rest[key_end + 1..];
        let value_start = remainder.find('"')?;
        let value_end = remainder.rfind('"')?;
        if value_end <= value_start {
            return None;
        }
        return Some((key, &remainder[value_start + 1..value_end]));
    }

    if line.starts_with('{') || line.starts_with('}') {
        return None;
    }
    let value_start = line.find('"')?;
    let value_end = line.rfind('"')?;
    if value_end <= value_start {
        return None;
    }
    Some((line[..value_start].trim(), &line[value_start + 1..value_end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
"AddonInfo"
{
    // generated by the workshop uploader
    "addonSteamAppID"   "550"
    "addontitle"        "Dead Center Remix"
    "addonversion"      "1.2"
    "addonauthor"       "someone"
    "addonDescription"  "Says "hello" twice"
    "addonURL0"         "https://example.com/addon"
}
"#;

    #[test]
    fn parses_quoted_pairs() {
        let info = parse(SAMPLE);
        assert_eq!(info.title, "Dead Center Remix");
        assert_eq!(info.version, "1.2");
        assert_eq!(info.author, "someone");
        assert_eq!(info.description, "Says \"hello\" twice");
        assert_eq!(info.url, "https://example.com/addon");
    }

    #[test]
    fn parses_bare_keys() {
        let info = parse("AddonInfo\n{\n  addontitle \"Bare\"\n  addonauthor\t\"x\"\n}");
        assert_eq!(info.title, "Bare");
        assert_eq!(info.author, "x");
    }

    #[test]
    fn skips_malformed_lines() {
        let info = parse("\"addontitle\"\n\"addonauthor\" \"\nanything else");
        assert_eq!(info, AddonInfo::default());
    }

    #[test]
    fn strips_byte_order_mark() {
        let mut data = vec![0xEF, 0xBB, 0xBF];
        data.extend_from_slice(b"\"addontitle\" \"With BOM\"");
        assert_eq!(AddonInfo::from_bytes(&data).title, "With BOM");
    }
}
