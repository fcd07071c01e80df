use std::sync::LazyLock;
use std::time::Duration;

use anyhow::anyhow;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::core::cache::TtlCache;
use crate::core::filename::clean_filename;
use crate::core::http_client::build_api_client;
use crate::models::settings::{ProxySettings, WorkshopSettings};
use crate::models::workshop::{
    WorkshopFileDetails, WorkshopItemDetail, WorkshopListResult, WorkshopPreviewItem,
    WorkshopQuery,
};

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Accepts a workshop page URL (`...?id=123`) or anything containing the id.
pub fn parse_workshop_id(input: &str) -> anyhow::Result<String> {
    let input = input.trim();
    if let Ok(parsed) = url::Url::parse(input) {
        if let Some((_, id)) = parsed.query_pairs().find(|(k, _)| k == "id") {
            if !id.is_empty() {
                return Ok(id.into_owned());
            }
        }
    }
    DIGITS_RE
        .find(input)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| anyhow!("could not find ID in URL"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WorkshopRequest {
    FileDetails(String),
    List(WorkshopQuery),
    Detail(String),
}

#[derive(Debug, Clone)]
enum WorkshopResponse {
    FileDetails(WorkshopFileDetails),
    List(WorkshopListResult),
    Detail(WorkshopItemDetail),
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    response: ListBody,
}

#[derive(Debug, Default, Deserialize)]
struct ListBody {
    #[serde(default)]
    publishedfiledetails: Vec<WorkshopPreviewItem>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    response: DetailBody,
}

#[derive(Debug, Default, Deserialize)]
struct DetailBody {
    #[serde(default)]
    publishedfiledetails: Vec<WorkshopItemDetail>,
}

pub struct WorkshopClient {
    client: reqwest::Client,
    details_api: String,
    browser_api: String,
    cache: Mutex<TtlCache<WorkshopRequest, WorkshopResponse>>,
}

impl WorkshopClient {
    pub fn new(settings: &WorkshopSettings, proxy: &ProxySettings) -> anyhow::Result<Self> {
        let client = build_api_client(Duration::from_secs(settings.request_timeout_secs), proxy)?;
        Ok(Self::with_client(client, settings))
    }

    pub fn with_client(client: reqwest::Client, settings: &WorkshopSettings) -> Self {
        Self {
            client,
            details_api: settings.details_api.clone(),
            browser_api: settings.browser_api.trim_end_matches('/').to_string(),
            cache: Mutex::new(TtlCache::new(Duration::from_secs(settings.cache_ttl_secs))),
        }
    }

    async fn cached(&self, key: &WorkshopRequest) -> Option<WorkshopResponse> {
        let hit = self.cache.lock().await.get(key);
        if hit.is_some() {
            tracing::debug!("[workshop] cache hit for {:?}", key);
        }
        hit
    }

    async fn remember(&self, key: WorkshopRequest, value: WorkshopResponse) {
        self.cache.lock().await.insert(key, value);
    }

    /// Resolves a workshop URL or id to the file record used to start a
    /// download.
    pub async fn fetch_file_details(&self, url_or_id: &str) -> anyhow::Result<WorkshopFileDetails> {
        let id = parse_workshop_id(url_or_id)?;
        let key = WorkshopRequest::FileDetails(id.clone());
        if let Some(WorkshopResponse::FileDetails(details)) = self.cached(&key).await {
            return Ok(details);
        }

        tracing::info!("[workshop] fetching file details for {}", id);
        let response = self
            .client
            .post(&self.details_api)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(format!("[{}]", id))
            .send()
            .await
            .map_err(|e| anyhow!("network error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("API request failed with status: {}", status.as_u16()));
        }

        let mut list: Vec<WorkshopFileDetails> = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to decode details: {}", e))?;
        if list.is_empty() {
            return Err(anyhow!("no details found"));
        }
        let mut details = list.swap_remove(0);
        if details.result != 1 {
            return Err(anyhow!("API returned error result"));
        }
        details.creator.clear();
        details.filename = clean_filename(&details.filename);

        self.remember(key, WorkshopResponse::FileDetails(details.clone()))
            .await;
        Ok(details)
    }

    pub async fn fetch_list(&self, query: &WorkshopQuery) -> anyhow::Result<WorkshopListResult> {
        let key = WorkshopRequest::List(query.clone());
        if let Some(WorkshopResponse::List(list)) = self.cached(&key).await {
            return Ok(list);
        }

        let mut params = vec![
            ("page", query.page.to_string()),
            ("q", query.search_text.clone()),
            ("sort", query.sort.clone()),
        ];
        if !query.tags.is_empty() {
            params.push(("tags", query.tags.join(",")));
        }

        let response = self
            .client
            .get(format!("{}/list", self.browser_api))
            .query(&params)
            .send()
            .await
            .map_err(|e| anyhow!("network error: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("API returned status: {}", status.as_u16()));
        }

        let envelope: ListEnvelope = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to decode list: {}", e))?;
        let result = WorkshopListResult {
            items: envelope.response.publishedfiledetails,
            total: envelope.response.total,
        };
        tracing::debug!(
            "[workshop] page {} returned {} of {} items",
            query.page,
            result.items.len(),
            result.total
        );

        self.remember(key, WorkshopResponse::List(result.clone())).await;
        Ok(result)
    }

    pub async fn fetch_detail(&self, id: &str) -> anyhow::Result<WorkshopItemDetail> {
        let key = WorkshopRequest::Detail(id.to_string());
        if let Some(WorkshopResponse::Detail(item)) = self.cached(&key).await {
            return Ok(item);
        }

        let response = self
            .client
            .get(format!("{}/detail", self.browser_api))
            .query(&[("id", id)])
            .send()
            .await
            .map_err(|e| anyhow!("network error: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("API error: {}", status.as_u16()));
        }

        let envelope: DetailEnvelope = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to decode detail: {}", e))?;
        let item = envelope
            .response
            .publishedfiledetails
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("item not found"))?;

        self.remember(key, WorkshopResponse::Detail(item.clone())).await;
        Ok(item)
    }
}
