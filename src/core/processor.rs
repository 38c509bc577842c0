use crate::adapters::database::{CompanyUpsert, Database, MarketStatusUpdate, NewStockRecord};
use crate::domain::market_hours::{is_trading_day, to_nepal, MarketHours};
use crate::domain::model::{DataSource, MarketSession, MarketSummary, PriceItem, ScrapeReport};
use crate::domain::numbers::round2;
use crate::domain::ports::MarketDataSource;
use crate::utils::error::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;

/// 抓取並寫入市場資料
pub struct DataProcessor {
    db: Database,
    source: Arc<dyn MarketDataSource>,
    hours: MarketHours,
    company_refresh: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompanyRefresh {
    pub created: usize,
    pub updated: usize,
}

enum SaveOutcome {
    Saved { company_created: bool },
    Duplicate,
    Skipped,
}

impl DataProcessor {
    pub fn new(
        db: Database,
        source: Arc<dyn MarketDataSource>,
        hours: MarketHours,
        company_refresh_hours: i64,
    ) -> Self {
        Self {
            db,
            source,
            hours,
            company_refresh: Duration::hours(company_refresh_hours),
        }
    }

    /// 依目前時段決定資料類型，抓取後寫入資料庫並更新市場狀態
    pub async fn execute_scraping(&self, now: DateTime<Utc>) -> Result<ScrapeReport> {
        let local = to_nepal(now);
        let scrape_date = local.date();
        let session = self.hours.session(local);
        let trading_day = is_trading_day(scrape_date);
        let data_source = self.hours.data_source(local);
        let scrape_time = self.hours.snapshot_time(data_source, local);

        tracing::info!(
            "🚀 Scraping {} data for {} {} (session: {}, trading day: {})",
            data_source,
            scrape_date,
            scrape_time,
            session,
            trading_day
        );

        let refresh = if self.companies_need_refresh(now).await? {
            match self.update_companies(now).await {
                Ok(refresh) => refresh,
                Err(e) => {
                    tracing::warn!("⚠️ Company refresh failed: {}", e);
                    CompanyRefresh::default()
                }
            }
        } else {
            CompanyRefresh::default()
        };

        let prices = match self.source.todays_prices().await {
            Ok(prices) => prices,
            Err(e) => {
                tracing::error!("❌ No {} price data: {}", data_source, e);
                self.update_market_status(now, scrape_date, session, false, None)
                    .await?;
                return Err(e);
            }
        };

        let mut saved = 0;
        let mut skipped = 0;
        let mut companies_created = refresh.created;
        for item in prices.iter() {
            let record = StockInput {
                item,
                scrape_date,
                scrape_time,
            };
            match self.save_stock_record(&record, data_source, now).await {
                Ok(SaveOutcome::Saved { company_created }) => {
                    saved += 1;
                    if company_created {
                        companies_created += 1;
                    }
                }
                Ok(SaveOutcome::Duplicate) => {
                    tracing::debug!("Duplicate record skipped: {} {} {}", item.symbol, scrape_date, scrape_time);
                    skipped += 1;
                }
                Ok(SaveOutcome::Skipped) => skipped += 1,
                Err(e) => {
                    tracing::error!("❌ Error saving {}: {}", item.symbol, e);
                    skipped += 1;
                }
            }
        }

        let summary = match self.source.market_summary().await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!("⚠️ Market summary unavailable: {}", e);
                None
            }
        };
        self.update_market_status(now, scrape_date, session, saved > 0, summary)
            .await?;

        tracing::info!(
            "✅ {} records saved, {} skipped ({} data)",
            saved,
            skipped,
            data_source
        );

        Ok(ScrapeReport {
            success: saved > 0,
            records_saved: saved,
            records_skipped: skipped,
            data_source,
            market_session: session,
            is_trading_day: trading_day,
            scrape_date,
            scrape_time,
            companies_created,
            companies_updated: refresh.updated,
            message: format!("{} {} records saved", saved, data_source),
        })
    }

    async fn companies_need_refresh(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(match self.db.latest_company_update().await? {
            Some(last) => now - last > self.company_refresh,
            None => true,
        })
    }

    /// 從公司清單新增或更新公司資料
    pub async fn update_companies(&self, now: DateTime<Utc>) -> Result<CompanyRefresh> {
        let profiles = self.source.company_profiles().await?;
        if profiles.is_empty() {
            tracing::warn!("⚠️ No company data received");
            return Ok(CompanyRefresh::default());
        }

        let mut refresh = CompanyRefresh::default();
        for profile in profiles {
            let symbol = profile.symbol.trim().to_uppercase();
            let Some(name) = profile.display_name() else {
                continue;
            };
            if symbol.is_empty() {
                continue;
            }

            let company = CompanyUpsert {
                symbol,
                name,
                sector: profile
                    .sector_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                listed_shares: profile.total_listed_shares.unwrap_or(0),
                is_active: profile.is_active(),
            };

            match self.db.upsert_company(&company, now).await {
                Ok(true) => refresh.created += 1,
                Ok(false) => refresh.updated += 1,
                Err(e) => tracing::error!("❌ Error processing company {}: {}", company.symbol, e),
            }
        }

        tracing::info!(
            "🏢 Company update: {} created, {} updated",
            refresh.created,
            refresh.updated
        );
        Ok(refresh)
    }

    async fn save_stock_record(
        &self,
        input: &StockInput<'_>,
        data_source: DataSource,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        let item = input.item;
        let symbol = item.normalized_symbol();
        if symbol.is_empty() {
            return Ok(SaveOutcome::Skipped);
        }

        let feed_name = item
            .security_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let (company, created) = self
            .db
            .get_or_create_company(&symbol, feed_name.unwrap_or(&symbol), now)
            .await?;

        if let Some(name) = feed_name.filter(|n| !created && *n != company.name) {
            self.db.rename_company(company.id, name, now).await?;
        }

        let inserted = self
            .db
            .insert_stock_record(
                &NewStockRecord {
                    company_id: company.id,
                    symbol,
                    close_price: item.close_price.map(round2),
                    last_traded_price: item.ltp.map(round2),
                    previous_close: item.previous_close.map(round2),
                    difference: item.point_change.map(round2),
                    percentage_change: item.percentage_change.map(round2),
                    scrape_date: input.scrape_date,
                    scrape_time: input.scrape_time,
                    data_source,
                },
                now,
            )
            .await?;

        Ok(if inserted {
            SaveOutcome::Saved {
                company_created: created,
            }
        } else {
            SaveOutcome::Duplicate
        })
    }

    async fn update_market_status(
        &self,
        now: DateTime<Utc>,
        date: NaiveDate,
        session: MarketSession,
        has_data: bool,
        summary: Option<MarketSummary>,
    ) -> Result<()> {
        let regular = session == MarketSession::Regular;
        self.db
            .upsert_market_status(&MarketStatusUpdate {
                date,
                is_market_open: regular && has_data,
                last_scraped: now,
                market_close_time: (!regular).then_some(self.hours.close),
                summary,
            })
            .await
    }

    /// 把某天最後一次快照標記為收盤資料
    pub async fn mark_closing(&self, date: NaiveDate) -> Result<u64> {
        self.db.mark_closing(date).await
    }
}

struct StockInput<'a> {
    item: &'a PriceItem,
    scrape_date: NaiveDate,
    scrape_time: NaiveTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CompanyProfile, PriceData};
    use crate::utils::error::ScraperError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct StubSource {
        prices: Option<PriceData>,
        profiles: Vec<CompanyProfile>,
    }

    #[async_trait]
    impl MarketDataSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn todays_prices(&self) -> Result<PriceData> {
            self.prices.clone().ok_or_else(|| ScraperError::NoDataError {
                message: "stub has no data".to_string(),
            })
        }

        async fn company_profiles(&self) -> Result<Vec<CompanyProfile>> {
            Ok(self.profiles.clone())
        }

        async fn market_summary(&self) -> Result<Option<MarketSummary>> {
            Ok(Some(MarketSummary {
                total_turnover: Some(1000.0),
                total_volume: Some(50),
                total_transactions: Some(7),
            }))
        }
    }

    fn item(symbol: &str, name: Option<&str>, pct: f64) -> PriceItem {
        PriceItem {
            symbol: symbol.to_string(),
            security_name: name.map(str::to_string),
            ltp: Some(100.0 + pct),
            close_price: Some(100.0 + pct),
            previous_close: Some(100.0),
            point_change: Some(pct),
            percentage_change: Some(pct),
        }
    }

    fn profile(symbol: &str, name: &str, status: &str) -> CompanyProfile {
        CompanyProfile {
            symbol: symbol.to_string(),
            company_name: Some(name.to_string()),
            security_name: None,
            sector_name: Some("Commercial Banks".to_string()),
            total_listed_shares: Some(1000),
            status: Some(status.to_string()),
        }
    }

    async fn processor(prices: Option<PriceData>, profiles: Vec<CompanyProfile>) -> (DataProcessor, Database) {
        let db = Database::in_memory().await.unwrap();
        let source = Arc::new(StubSource { prices, profiles });
        (
            DataProcessor::new(db.clone(), source, MarketHours::default(), 6),
            db,
        )
    }

    // 2024-06-02 (週日) 12:30 尼泊爾時間
    fn during_market() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 2, 6, 45, 0).unwrap()
    }

    // 2024-06-02 15:30 尼泊爾時間
    fn after_close() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 2, 9, 45, 0).unwrap()
    }

    #[tokio::test]
    async fn test_live_scrape_saves_records_and_status() {
        let prices = PriceData::from_items(vec![
            item("nabil", Some("Nabil Bank Limited"), 2.0),
            item("NTC", None, -1.0),
        ]);
        let (processor, db) = processor(
            Some(prices),
            vec![profile("NABIL", "Nabil Bank", "ACTIVE"), profile("", "Nameless", "ACTIVE")],
        )
        .await;

        let report = processor.execute_scraping(during_market()).await.unwrap();

        assert!(report.success);
        assert_eq!(report.records_saved, 2);
        assert_eq!(report.data_source, DataSource::Live);
        assert_eq!(report.market_session, MarketSession::Regular);
        assert_eq!(report.scrape_time, NaiveTime::from_hms_opt(12, 30, 0).unwrap());
        assert_eq!(report.companies_created, 2);

        // 價格資料中的名稱覆蓋公司清單的名稱
        let nabil = db.find_company("NABIL").await.unwrap().unwrap();
        assert_eq!(nabil.name, "Nabil Bank Limited");
        assert_eq!(nabil.sector.as_deref(), Some("Commercial Banks"));

        let status = db.market_status(report.scrape_date).await.unwrap().unwrap();
        assert!(status.is_market_open);
        assert_eq!(status.market_close_time, None);
        assert_eq!(status.total_transactions, 7);
    }

    #[tokio::test]
    async fn test_closing_scrape_uses_fixed_time_and_skips_duplicates() {
        let prices = PriceData::from_items(vec![item("NABIL", None, 2.0)]);
        let (processor, db) = processor(Some(prices), vec![]).await;

        let first = processor.execute_scraping(after_close()).await.unwrap();
        assert_eq!(first.data_source, DataSource::Closing);
        assert_eq!(first.scrape_time, NaiveTime::from_hms_opt(15, 30, 0).unwrap());
        assert_eq!(first.records_saved, 1);

        let second = processor
            .execute_scraping(after_close() + Duration::minutes(10))
            .await
            .unwrap();
        assert!(!second.success);
        assert_eq!(second.records_saved, 0);
        assert_eq!(second.records_skipped, 1);

        let records = db.snapshot(first.scrape_date, first.scrape_time).await.unwrap();
        assert!(records[0].is_closing_data);

        let status = db.market_status(first.scrape_date).await.unwrap().unwrap();
        assert!(!status.is_market_open);
        assert_eq!(status.market_close_time, NaiveTime::from_hms_opt(15, 0, 0));
    }

    #[tokio::test]
    async fn test_failed_fetch_still_records_market_check() {
        let (processor, db) = processor(None, vec![]).await;

        let err = processor.execute_scraping(during_market()).await.unwrap_err();
        assert!(matches!(err, ScraperError::NoDataError { .. }));

        let date = to_nepal(during_market()).date();
        let status = db.market_status(date).await.unwrap().unwrap();
        assert!(!status.is_market_open);
        assert_eq!(status.last_scraped, Some(during_market()));
    }

    #[tokio::test]
    async fn test_company_refresh_is_throttled() {
        let (processor, db) = processor(
            Some(PriceData::default()),
            vec![profile("NABIL", "Nabil Bank", "ACTIVE"), profile("SHL", "Soaltee", "SUSPENDED")],
        )
        .await;

        let refresh = processor.update_companies(during_market()).await.unwrap();
        assert_eq!(refresh, CompanyRefresh { created: 2, updated: 0 });
        assert!(!db.find_company("SHL").await.unwrap().unwrap().is_active);

        assert!(!processor.companies_need_refresh(during_market() + Duration::hours(5)).await.unwrap());
        assert!(processor.companies_need_refresh(during_market() + Duration::hours(7)).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_closing() {
        let prices = PriceData::from_items(vec![item("NABIL", None, 2.0), item("NTC", None, 1.0)]);
        let (processor, db) = processor(Some(prices), vec![]).await;

        let report = processor.execute_scraping(during_market()).await.unwrap();
        assert!(!db.has_closing_data(report.scrape_date).await.unwrap());

        assert_eq!(processor.mark_closing(report.scrape_date).await.unwrap(), 2);
        assert!(db.has_closing_data(report.scrape_date).await.unwrap());
    }
}
