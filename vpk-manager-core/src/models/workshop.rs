use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of `publishedfileid` for downloads that do not come from the
/// workshop catalog.
pub const DIRECT_SOURCE_PREFIX: &str = "direct-";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkshopFileDetails {
    #[serde(default)]
    pub result: i32,
    #[serde(default, rename = "publishedfileid", deserialize_with = "string_or_number")]
    pub published_file_id: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub file_size: String,
    #[serde(default)]
    pub file_url: String,
    #[serde(default)]
    pub preview_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "file_description")]
    pub description: String,
}

impl WorkshopFileDetails {
    /// Details for a plain URL download outside the catalog.
    pub fn direct(url: &str, filename: &str) -> Self {
        let stamp = chrono::Utc::now().timestamp_millis();
        Self {
            result: 1,
            published_file_id: format!("{DIRECT_SOURCE_PREFIX}{stamp}"),
            filename: filename.to_string(),
            file_url: url.to_string(),
            title: filename.to_string(),
            ..Default::default()
        }
    }

    pub fn is_direct(&self) -> bool {
        self.published_file_id.starts_with(DIRECT_SOURCE_PREFIX)
    }

    pub fn parsed_file_size(&self) -> u64 {
        self.file_size.trim().parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkshopQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub search_text: String,
    #[serde(default)]
    pub sort: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkshopTag {
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkshopPreviewItem {
    #[serde(default, rename = "publishedfileid", deserialize_with = "string_or_number")]
    pub published_file_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub preview_url: String,
    #[serde(default, rename = "creator", deserialize_with = "string_or_number")]
    pub author: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub views: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub subscriptions: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub favorited: u64,
    #[serde(default)]
    pub tags: Vec<WorkshopTag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkshopListResult {
    pub items: Vec<WorkshopPreviewItem>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkshopPreviewImage {
    #[serde(default)]
    pub preview_url: String,
    #[serde(default)]
    pub preview_type: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkshopItemDetail {
    #[serde(default, rename = "publishedfileid", deserialize_with = "string_or_number")]
    pub published_file_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_url: String,
    #[serde(default)]
    pub preview_url: String,
    #[serde(default)]
    pub previews: Vec<WorkshopPreviewImage>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub file_size: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub time_created: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub time_updated: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub subscriptions: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub favorited: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub views: u64,
    #[serde(default)]
    pub tags: Vec<WorkshopTag>,
}

/// Steam answers the same field as `"123"` in one endpoint and `123` in
/// another.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}
