use crate::adapters::merolagani::MerolaganiScraper;
use crate::adapters::nepse_api::NepseApiClient;
use crate::adapters::sample::SampleDataSource;
use crate::config::toml_config::SourcesConfig;
use crate::domain::model::{CompanyProfile, MarketSummary, PriceData};
use crate::domain::ports::MarketDataSource;
use crate::utils::error::{Result, ScraperError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ChainSettings {
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub min_records: usize,
    pub allow_sample_data: bool,
}

impl From<&SourcesConfig> for ChainSettings {
    fn from(config: &SourcesConfig) -> Self {
        Self {
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            min_records: config.min_records,
            allow_sample_data: config.allow_sample_data,
        }
    }
}

/// 依序嘗試多個資料來源，每個來源各自重試
pub struct SourceChain {
    sources: Vec<Arc<dyn MarketDataSource>>,
    settings: ChainSettings,
}

impl SourceChain {
    pub fn new(sources: Vec<Arc<dyn MarketDataSource>>, settings: ChainSettings) -> Self {
        Self { sources, settings }
    }

    pub fn from_config(config: &SourcesConfig) -> Result<Self> {
        let mut sources: Vec<Arc<dyn MarketDataSource>> = Vec::new();
        for name in &config.order {
            match name.as_str() {
                "nepse_api" => sources.push(Arc::new(NepseApiClient::new(config)?)),
                "merolagani" => sources.push(Arc::new(MerolaganiScraper::new(config)?)),
                other => {
                    return Err(ScraperError::InvalidConfigValueError {
                        field: "sources.order".to_string(),
                        value: other.to_string(),
                        reason: "Valid sources: nepse_api, merolagani".to_string(),
                    })
                }
            }
        }
        Ok(Self::new(sources, ChainSettings::from(config)))
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    async fn try_source(&self, source: &dyn MarketDataSource) -> Option<PriceData> {
        let attempts = self.settings.retry_attempts.max(1);
        for attempt in 1..=attempts {
            tracing::debug!("Fetching from {} (attempt {}/{})", source.name(), attempt, attempts);
            match source.todays_prices().await {
                Ok(data) if data.len() >= self.settings.min_records && !data.is_empty() => {
                    tracing::info!("✅ {} returned {} records", source.name(), data.len());
                    return Some(data);
                }
                Ok(data) => {
                    tracing::warn!(
                        "⚠️ {} returned only {} records (need {})",
                        source.name(),
                        data.len(),
                        self.settings.min_records.max(1)
                    );
                }
                Err(e) if !e.is_retryable() => {
                    tracing::warn!("⚠️ {} failed: {}", source.name(), e);
                    return None;
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ {} attempt {}/{} failed: {}",
                        source.name(),
                        attempt,
                        attempts,
                        e
                    );
                }
            }

            if attempt < attempts && !self.settings.retry_delay.is_zero() {
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }
        None
    }
}

#[async_trait]
impl MarketDataSource for SourceChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn todays_prices(&self) -> Result<PriceData> {
        for source in &self.sources {
            if let Some(data) = self.try_source(source.as_ref()).await {
                return Ok(data);
            }
        }

        if self.settings.allow_sample_data {
            tracing::warn!("⚠️ All sources failed, falling back to sample data");
            return SampleDataSource.todays_prices().await;
        }

        Err(ScraperError::NoDataError {
            message: format!(
                "All sources failed: {}",
                self.source_names().join(", ")
            ),
        })
    }

    async fn company_profiles(&self) -> Result<Vec<CompanyProfile>> {
        for source in &self.sources {
            match source.company_profiles().await {
                Ok(profiles) if !profiles.is_empty() => return Ok(profiles),
                Ok(_) => {}
                Err(e) => tracing::warn!("⚠️ {} company list failed: {}", source.name(), e),
            }
        }

        if self.settings.allow_sample_data {
            return SampleDataSource.company_profiles().await;
        }
        Ok(Vec::new())
    }

    async fn market_summary(&self) -> Result<Option<MarketSummary>> {
        for source in &self.sources {
            match source.market_summary().await {
                Ok(Some(summary)) => return Ok(Some(summary)),
                Ok(None) => {}
                Err(e) => tracing::warn!("⚠️ {} market summary failed: {}", source.name(), e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::PriceItem;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        name: &'static str,
        failures: usize,
        calls: AtomicUsize,
        error: fn() -> ScraperError,
    }

    impl FlakySource {
        fn new(name: &'static str, failures: usize, error: fn() -> ScraperError) -> Self {
            Self {
                name,
                failures,
                calls: AtomicUsize::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl MarketDataSource for FlakySource {
        fn name(&self) -> &str {
            self.name
        }

        async fn todays_prices(&self) -> Result<PriceData> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(PriceData::from_items(vec![PriceItem {
                symbol: self.name.to_uppercase(),
                percentage_change: Some(1.0),
                ..Default::default()
            }]))
        }
    }

    fn retryable() -> ScraperError {
        ScraperError::UpstreamStatusError {
            url: "http://x".to_string(),
            status: 502,
        }
    }

    fn fatal() -> ScraperError {
        ScraperError::ParseError {
            message: "bad page".to_string(),
        }
    }

    fn settings(allow_sample_data: bool) -> ChainSettings {
        ChainSettings {
            retry_attempts: 3,
            retry_delay: Duration::ZERO,
            min_records: 1,
            allow_sample_data,
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let flaky = Arc::new(FlakySource::new("api", 2, retryable));
        let sources: Vec<Arc<dyn MarketDataSource>> = vec![flaky.clone()];
        let chain = SourceChain::new(sources, settings(false));

        let data = chain.todays_prices().await.unwrap();
        assert_eq!(data.gainers[0].symbol, "API");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_moves_to_next_source() {
        let broken = Arc::new(FlakySource::new("api", usize::MAX, fatal));
        let backup = Arc::new(FlakySource::new("web", 0, retryable));
        let sources: Vec<Arc<dyn MarketDataSource>> = vec![broken.clone(), backup];
        let chain = SourceChain::new(sources, settings(false));

        let data = chain.todays_prices().await.unwrap();
        assert_eq!(data.gainers[0].symbol, "WEB");
        // 不可重試的錯誤不再重試
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_sources_fail() {
        let failing = || -> Vec<Arc<dyn MarketDataSource>> {
            vec![Arc::new(FlakySource::new("api", usize::MAX, retryable))]
        };
        let chain = SourceChain::new(failing(), settings(false));
        let err = chain.todays_prices().await.unwrap_err();
        assert!(matches!(err, ScraperError::NoDataError { .. }));

        let chain = SourceChain::new(failing(), settings(true));
        let data = chain.todays_prices().await.unwrap();
        assert_eq!(data.len(), 5);
    }

    #[test]
    fn test_from_config_respects_order() {
        let mut config = SourcesConfig::default();
        config.order = vec!["merolagani".to_string(), "nepse_api".to_string()];
        let chain = SourceChain::from_config(&config).unwrap();
        assert_eq!(chain.source_names(), vec!["merolagani", "nepse_api"]);

        config.order = vec!["sharesansar".to_string()];
        assert!(SourceChain::from_config(&config).is_err());
    }
}
