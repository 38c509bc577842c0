use crate::config::toml_config::SourcesConfig;
use crate::utils::error::{Result, ScraperError};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, REFERER, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const ACCEPT_JSON: &str = "application/json, text/plain, */*";

const FALLBACK_USER_AGENT: &str = concat!("nepse-scraper/", env!("CARGO_PKG_VERSION"));

/// reqwest 客戶端包裝：輪替 User-Agent、統一逾時與狀態碼檢查
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    user_agents: Vec<String>,
    next_agent: AtomicUsize,
    referer: Option<String>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agents: Vec<String>, verify_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;

        Ok(Self {
            client,
            user_agents,
            next_agent: AtomicUsize::new(0),
            referer: None,
        })
    }

    pub fn from_config(config: &SourcesConfig, verify_tls: bool) -> Result<Self> {
        Self::new(
            Duration::from_secs(config.timeout_seconds),
            config.user_agents.clone(),
            verify_tls,
        )
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    fn user_agent(&self) -> &str {
        if self.user_agents.is_empty() {
            return FALLBACK_USER_AGENT;
        }
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        &self.user_agents[index]
    }

    fn headers(&self, accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Ok(agent) = HeaderValue::from_str(self.user_agent()) {
            headers.insert(USER_AGENT, agent);
        }
        if let Some(referer) = self.referer.as_deref().and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert(REFERER, referer);
        }
        headers
    }

    async fn get(&self, url: &str, accept: &'static str) -> Result<reqwest::Response> {
        tracing::debug!("Making request to: {}", url);
        let response = self.client.get(url).headers(self.headers(accept)).send().await?;

        tracing::debug!("Response status: {} for {}", response.status(), url);
        if !response.status().is_success() {
            return Err(ScraperError::UpstreamStatusError {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.get(url, ACCEPT_HTML).await?;
        Ok(response.text().await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url, ACCEPT_JSON).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ScraperError::ParseError {
            message: format!("Invalid JSON from {}: {}", url, e),
        })
    }
}

/// 組合 base URL 與路徑，避免重複或缺少斜線
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
