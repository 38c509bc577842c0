use crate::adapters::{Database, LocalStorage, SourceChain};
use crate::config::AppConfig;
use crate::core::processor::DataProcessor;
use crate::domain::market_hours::{to_nepal, MarketHours};
use crate::domain::ports::{Clock, MarketDataSource, SystemClock};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

/// web / worker / beat 共用的執行環境
#[derive(Clone)]
pub struct AppContext {
    pub db: Database,
    pub config: Arc<AppConfig>,
    pub source: Arc<dyn MarketDataSource>,
    pub clock: Arc<dyn Clock>,
    pub storage: LocalStorage,
    pub hours: MarketHours,
    pub monitor: Arc<SystemMonitor>,
}

impl AppContext {
    /// 連線資料庫並依設定建立資料來源
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let db = Database::connect(&config.database).await?;
        let source = Arc::new(SourceChain::from_config(&config.sources)?);
        Self::new(db, config, source, Arc::new(SystemClock))
    }

    pub fn new(
        db: Database,
        config: AppConfig,
        source: Arc<dyn MarketDataSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let hours = MarketHours::from_config(&config.market)?;
        let storage = LocalStorage::new(config.export.output_path.clone());
        Ok(Self {
            db,
            config: Arc::new(config),
            source,
            clock,
            storage,
            hours,
            monitor: Arc::new(SystemMonitor::new()),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// 尼泊爾時間的今天
    pub fn today(&self) -> NaiveDate {
        to_nepal(self.now()).date()
    }

    pub fn processor(&self) -> DataProcessor {
        DataProcessor::new(
            self.db.clone(),
            self.source.clone(),
            self.hours,
            self.config.market.company_refresh_hours,
        )
    }
}
