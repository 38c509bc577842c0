// Background tasks: the broker table, worker claim loops and the periodic
// scheduler that the Procfile `worker` and `beat` roles run.

pub mod beat;
pub mod broker;
pub mod jobs;
pub mod worker;

use crate::app::AppContext;
use crate::config::toml_config::{QUEUE_MAINTENANCE, QUEUE_SCRAPING, QUEUE_TESTING};
use crate::utils::error::{Result, ScraperError};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use beat::Beat;
pub use broker::{QueuedTask, TaskBroker, TaskStatus};
pub use worker::{TaskOutcome, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    ScrapeMarketData,
    ForceClosingData,
    MarketOpening,
    HealthCheck,
    DailyMaintenance,
    FillMissingData,
    BackupHistoricalData,
    TestScrapingPipeline,
}

impl TaskKind {
    pub const ALL: [TaskKind; 8] = [
        Self::ScrapeMarketData,
        Self::ForceClosingData,
        Self::MarketOpening,
        Self::HealthCheck,
        Self::DailyMaintenance,
        Self::FillMissingData,
        Self::BackupHistoricalData,
        Self::TestScrapingPipeline,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ScrapeMarketData => "scrape_market_data",
            Self::ForceClosingData => "force_closing_data",
            Self::MarketOpening => "market_opening",
            Self::HealthCheck => "health_check",
            Self::DailyMaintenance => "daily_maintenance",
            Self::FillMissingData => "fill_missing_data",
            Self::BackupHistoricalData => "backup_historical_data",
            Self::TestScrapingPipeline => "test_scraping_pipeline",
        }
    }

    /// 沒有指定 queue 時的路由
    pub fn default_queue(&self) -> &'static str {
        match self {
            Self::ScrapeMarketData | Self::ForceClosingData | Self::MarketOpening => QUEUE_SCRAPING,
            Self::HealthCheck
            | Self::DailyMaintenance
            | Self::FillMissingData
            | Self::BackupHistoricalData => QUEUE_MAINTENANCE,
            Self::TestScrapingPipeline => QUEUE_TESTING,
        }
    }

    pub fn max_retries(&self) -> i64 {
        match self {
            Self::ScrapeMarketData => 3,
            _ => 0,
        }
    }

    pub async fn run(&self, ctx: &AppContext) -> Result<Value> {
        match self {
            Self::ScrapeMarketData => jobs::scrape_market_data(ctx).await,
            Self::ForceClosingData => jobs::force_closing_data(ctx).await,
            Self::MarketOpening => jobs::market_opening(ctx).await,
            Self::HealthCheck => to_value(jobs::health_check(ctx).await?),
            Self::DailyMaintenance => jobs::daily_maintenance(ctx).await,
            Self::FillMissingData => jobs::fill_missing_data(ctx).await,
            Self::BackupHistoricalData => to_value(jobs::backup_historical_data(ctx).await?),
            Self::TestScrapingPipeline => jobs::test_scraping_pipeline(ctx).await,
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskKind {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s.trim())
            .ok_or_else(|| ScraperError::UnknownTaskError {
                name: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names_round_trip() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.name().parse::<TaskKind>().unwrap(), kind);
        }
        assert!(matches!(
            "celery.backend_cleanup".parse::<TaskKind>(),
            Err(ScraperError::UnknownTaskError { .. })
        ));
    }

    #[test]
    fn test_routing() {
        assert_eq!(TaskKind::ScrapeMarketData.default_queue(), "scraping");
        assert_eq!(TaskKind::FillMissingData.default_queue(), "maintenance");
        assert_eq!(TaskKind::TestScrapingPipeline.default_queue(), "testing");
        assert_eq!(TaskKind::ScrapeMarketData.max_retries(), 3);
        assert_eq!(TaskKind::HealthCheck.max_retries(), 0);
    }
}
