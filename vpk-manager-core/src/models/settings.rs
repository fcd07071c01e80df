use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub schema_version: u32,
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub workshop: WorkshopSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_header_timeout_secs")]
    pub header_timeout_secs: u64,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_speed_interval_ms")]
    pub speed_interval_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkshopSettings {
    #[serde(default = "default_details_api")]
    pub details_api: String,
    #[serde(default = "default_browser_api")]
    pub browser_api: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_header_timeout_secs() -> u64 {
    60
}

fn default_stall_timeout_secs() -> u64 {
    120
}

fn default_speed_interval_ms() -> u64 {
    3000
}

pub fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into()
}

fn default_details_api() -> String {
    "https://steamworkshopdownloader.io/api/details/file".into()
}

fn default_browser_api() -> String {
    "https://l4d2-workshop.laoyutang.cn".into()
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_proxy_type() -> String {
    "http".into()
}

fn default_proxy_port() -> u16 {
    8080
}

impl DownloadSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn speed_interval(&self) -> Duration {
        Duration::from_millis(self.speed_interval_ms)
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            header_timeout_secs: default_header_timeout_secs(),
            stall_timeout_secs: default_stall_timeout_secs(),
            speed_interval_ms: default_speed_interval_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for WorkshopSettings {
    fn default() -> Self {
        Self {
            details_api: default_details_api(),
            browser_api: default_browser_api(),
            cache_ttl_secs: default_cache_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            proxy_type: default_proxy_type(),
            host: String::new(),
            port: default_proxy_port(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            root_dir: None,
            download: DownloadSettings::default(),
            workshop: WorkshopSettings::default(),
            proxy: ProxySettings::default(),
        }
    }
}
