use std::time::Duration;

use crate::models::settings::{DownloadSettings, ProxySettings};

pub fn proxy_url(proxy: &ProxySettings) -> Option<String> {
    if !proxy.enabled || proxy.host.is_empty() {
        return None;
    }
    let scheme = match proxy.proxy_type.as_str() {
        "socks5" => "socks5",
        "https" => "https",
        _ => "http",
    };
    if !proxy.username.is_empty() {
        Some(format!(
            "{}://{}:{}@{}:{}",
            scheme, proxy.username, proxy.password, proxy.host, proxy.port
        ))
    } else {
        Some(format!("{}://{}:{}", scheme, proxy.host, proxy.port))
    }
}

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: &ProxySettings,
) -> reqwest::ClientBuilder {
    let Some(url) = proxy_url(proxy) else {
        return builder;
    };
    match reqwest::Proxy::all(&url) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("Invalid proxy URL: {}", e);
            builder
        }
    }
}

/// Client shared by every download worker. No overall timeout: payloads may
/// be large and slow. Dial and TLS are bounded by `connect_timeout`; response
/// headers are bounded by the worker itself.
pub fn build_download_client(
    settings: &DownloadSettings,
    proxy: &ProxySettings,
) -> anyhow::Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout())
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(16);
    Ok(apply_proxy(builder, proxy).build()?)
}

/// Client for small JSON API calls, where an overall timeout is fine.
pub fn build_api_client(timeout: Duration, proxy: &ProxySettings) -> anyhow::Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(crate::models::settings::default_user_agent());
    Ok(apply_proxy(builder, proxy).build()?)
}
