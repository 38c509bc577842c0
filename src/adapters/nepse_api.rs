use crate::adapters::http::{join_url, HttpFetcher};
use crate::config::toml_config::{NepseApiConfig, SourcesConfig};
use crate::domain::model::{CompanyProfile, MarketSummary, PriceData, PriceItem};
use crate::domain::numbers::{parse_integer, parse_number};
use crate::domain::ports::MarketDataSource;
use crate::utils::error::{Result, ScraperError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// NEPSE 非官方 JSON API
#[derive(Debug)]
pub struct NepseApiClient {
    fetcher: HttpFetcher,
    config: NepseApiConfig,
}

impl NepseApiClient {
    pub fn new(sources: &SourcesConfig) -> Result<Self> {
        let config = sources.nepse_api.clone();
        let referer = format!("{}/", config.base_url.trim_end_matches('/'));
        let fetcher = HttpFetcher::from_config(sources, config.verify_tls)?.with_referer(referer);
        Ok(Self { fetcher, config })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.config.base_url, path)
    }

    async fn fetch_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = self.url(path);
        let body: Value = self.fetcher.get_json(&url).await?;
        let items = unwrap_list(body).ok_or_else(|| ScraperError::ParseError {
            message: format!("Expected a JSON list from {}", url),
        })?;

        // 壞掉的單筆略過，不讓整批失敗
        let total = items.len();
        let parsed: Vec<T> = items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();
        if parsed.len() < total {
            tracing::debug!(
                "Skipped {} malformed items from {}",
                total - parsed.len(),
                url
            );
        }
        Ok(parsed)
    }
}

#[async_trait]
impl MarketDataSource for NepseApiClient {
    fn name(&self) -> &str {
        "nepse_api"
    }

    async fn todays_prices(&self) -> Result<PriceData> {
        let gainers: Vec<PriceItem> = self.fetch_list(&self.config.top_gainers_path).await?;
        let losers: Vec<PriceItem> = self.fetch_list(&self.config.top_losers_path).await?;

        let items: Vec<PriceItem> = gainers
            .into_iter()
            .chain(losers)
            .filter(|item| !item.normalized_symbol().is_empty())
            .collect();

        tracing::info!("📈 NEPSE API returned {} price items", items.len());
        Ok(PriceData::from_items(items))
    }

    async fn company_profiles(&self) -> Result<Vec<CompanyProfile>> {
        match self
            .fetch_list::<CompanyProfile>(&self.config.company_list_path)
            .await
        {
            Ok(profiles) if !profiles.is_empty() => Ok(profiles),
            Ok(_) => {
                tracing::warn!("⚠️ Company list empty, falling back to security list");
                self.fetch_list(&self.config.security_list_path).await
            }
            Err(e) => {
                tracing::warn!("⚠️ Company list failed ({}), falling back to security list", e);
                self.fetch_list(&self.config.security_list_path).await
            }
        }
    }

    async fn market_summary(&self) -> Result<Option<MarketSummary>> {
        let url = self.url(&self.config.market_summary_path);
        let body: Value = self.fetcher.get_json(&url).await?;
        let summary = parse_market_summary(&body);
        Ok((!summary.is_empty()).then_some(summary))
    }
}

/// 回應可能是陣列，或包在 body / data / content 等欄位裡
fn unwrap_list(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => {
            for key in ["body", "data", "content"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Some(items);
                }
            }
            map.into_iter().find_map(|(_, value)| match value {
                Value::Array(items) => Some(items),
                _ => None,
            })
        }
        _ => None,
    }
}

/// 解析 `[{"detail": "Total Turnover Rs:", "value": 123.4}, ...]`
pub fn parse_market_summary(body: &Value) -> MarketSummary {
    let mut summary = MarketSummary::default();
    let Some(items) = unwrap_list(body.clone()) else {
        return summary;
    };

    for item in items {
        let detail = item
            .get("detail")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let value = match item.get("value") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => continue,
        };

        if detail.contains("turnover") {
            summary.total_turnover = parse_number(&value);
        } else if detail.contains("traded shares")
            || detail.contains("shares traded")
            || detail.contains("volume")
        {
            summary.total_volume = parse_integer(&value);
        } else if detail.contains("transactions") {
            summary.total_transactions = parse_integer(&value);
        }
    }

    summary
}
