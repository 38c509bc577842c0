use crate::config::toml_config::DatabaseConfig;
use crate::domain::model::{Company, DataSource, MarketStatus, MarketSummary, StockRecord};
use crate::utils::error::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const STOCK_SELECT: &str = "SELECT s.id, s.company_id, s.symbol, c.name AS company_name, \
     s.close_price, s.last_traded_price, s.previous_close, s.difference, s.percentage_change, \
     s.scrape_date, s.scrape_time, s.data_source, s.is_closing_data, s.created_at \
     FROM stock_data s JOIN companies c ON c.id = s.company_id";

const COMPANY_SELECT: &str = "SELECT id, symbol, name, sector, listed_shares, is_active, \
     created_at, updated_at FROM companies";

const MARKET_STATUS_SELECT: &str = "SELECT date, is_market_open, last_scraped, total_turnover, \
     total_volume, total_transactions, market_close_time, created_at, updated_at \
     FROM market_status";

/// 寫入公司資料用
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyUpsert {
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub listed_shares: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStockRecord {
    pub company_id: i64,
    pub symbol: String,
    pub close_price: Option<f64>,
    pub last_traded_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub difference: Option<f64>,
    pub percentage_change: Option<f64>,
    pub scrape_date: NaiveDate,
    pub scrape_time: NaiveTime,
    pub data_source: DataSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketStatusUpdate {
    pub date: NaiveDate,
    pub is_market_open: bool,
    pub last_scraped: DateTime<Utc>,
    pub market_close_time: Option<NaiveTime>,
    pub summary: Option<MarketSummary>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub symbol: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movers {
    Gainers,
    Losers,
}

/// SQLite 資料庫，web / worker / beat 三個角色共用
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::connect_url(&config.url, config.max_connections).await
    }

    pub async fn connect_url(url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // 記憶體資料庫每條連線都是獨立的，只能用一條
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections })
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(options)
            .await?;

        tracing::debug!("Connected to database {}", url);
        Ok(Self { pool })
    }

    /// 已套用 migration 的記憶體資料庫
    pub async fn in_memory() -> Result<Self> {
        let db = Self::connect_url("sqlite::memory:", 1).await?;
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- companies ----

    pub async fn find_company(&self, symbol: &str) -> Result<Option<Company>> {
        let query = format!("{} WHERE symbol = ?", COMPANY_SELECT);
        let company = sqlx::query_as::<_, Company>(&query)
            .bind(symbol.trim().to_uppercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(company)
    }

    pub async fn list_companies(&self) -> Result<Vec<Company>> {
        let query = format!("{} ORDER BY symbol", COMPANY_SELECT);
        let companies = sqlx::query_as::<_, Company>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(companies)
    }

    pub async fn count_companies(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM companies")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn latest_company_update(&self) -> Result<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT updated_at FROM companies ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(latest)
    }

    /// 依代號新增或更新公司，回傳是否為新建
    pub async fn upsert_company(&self, company: &CompanyUpsert, now: DateTime<Utc>) -> Result<bool> {
        let symbol = company.symbol.trim().to_uppercase();
        let existing = self.find_company(&symbol).await?;

        match existing {
            Some(existing) => {
                sqlx::query(
                    "UPDATE companies SET name = ?, sector = ?, listed_shares = ?, is_active = ?, \
                     updated_at = ? WHERE id = ?",
                )
                .bind(&company.name)
                .bind(&company.sector)
                .bind(company.listed_shares)
                .bind(company.is_active)
                .bind(now)
                .bind(existing.id)
                .execute(&self.pool)
                .await?;
                Ok(false)
            }
            None => {
                sqlx::query(
                    "INSERT INTO companies (symbol, name, sector, listed_shares, is_active, \
                     created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&symbol)
                .bind(&company.name)
                .bind(&company.sector)
                .bind(company.listed_shares)
                .bind(company.is_active)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
        }
    }

    /// 取得公司，不存在就以給定名稱建立
    pub async fn get_or_create_company(
        &self,
        symbol: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(Company, bool)> {
        let symbol = symbol.trim().to_uppercase();
        if let Some(company) = self.find_company(&symbol).await? {
            return Ok((company, false));
        }

        sqlx::query(
            "INSERT INTO companies (symbol, name, listed_shares, is_active, created_at, updated_at) \
             VALUES (?, ?, 0, 1, ?, ?) ON CONFLICT(symbol) DO NOTHING",
        )
        .bind(&symbol)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let company = self
            .find_company(&symbol)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok((company, true))
    }

    pub async fn rename_company(&self, id: i64, name: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE companies SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- stock data ----

    /// 寫入一筆快照；唯一鍵重複時略過並回傳 false
    pub async fn insert_stock_record(
        &self,
        record: &NewStockRecord,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO stock_data (company_id, symbol, close_price, last_traded_price, \
             previous_close, difference, percentage_change, scrape_date, scrape_time, \
             data_source, is_closing_data, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(company_id, scrape_date, scrape_time, data_source) DO NOTHING",
        )
        .bind(record.company_id)
        .bind(&record.symbol)
        .bind(record.close_price)
        .bind(record.last_traded_price)
        .bind(record.previous_close)
        .bind(record.difference)
        .bind(record.percentage_change)
        .bind(record.scrape_date)
        .bind(record.scrape_time)
        .bind(record.data_source)
        .bind(record.data_source.is_closing_data())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count_records(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stock_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_records_on(&self, date: NaiveDate) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stock_data WHERE scrape_date = ?")
                .bind(date)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn latest_scrape_date(&self) -> Result<Option<NaiveDate>> {
        let date = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT scrape_date FROM stock_data ORDER BY scrape_date DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(date)
    }

    pub async fn latest_scrape_time(&self, date: NaiveDate) -> Result<Option<NaiveTime>> {
        let time = sqlx::query_scalar::<_, NaiveTime>(
            "SELECT scrape_time FROM stock_data WHERE scrape_date = ? \
             ORDER BY scrape_time DESC LIMIT 1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(time)
    }

    /// 某一時間點的整份快照，漲幅由大到小
    pub async fn snapshot(&self, date: NaiveDate, time: NaiveTime) -> Result<Vec<StockRecord>> {
        let query = format!(
            "{} WHERE s.scrape_date = ? AND s.scrape_time = ? \
             ORDER BY s.percentage_change IS NULL, s.percentage_change DESC, s.symbol",
            STOCK_SELECT
        );
        let records = sqlx::query_as::<_, StockRecord>(&query)
            .bind(date)
            .bind(time)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    pub async fn top_movers(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        movers: Movers,
        limit: i64,
    ) -> Result<Vec<StockRecord>> {
        let (condition, order) = match movers {
            Movers::Gainers => ("s.percentage_change > 0", "s.percentage_change DESC"),
            Movers::Losers => ("s.percentage_change < 0", "s.percentage_change ASC"),
        };
        let query = format!(
            "{} WHERE s.scrape_date = ? AND s.scrape_time = ? AND {} ORDER BY {}, s.symbol LIMIT ?",
            STOCK_SELECT, condition, order
        );
        let records = sqlx::query_as::<_, StockRecord>(&query)
            .bind(date)
            .bind(time)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// 歷史資料分頁查詢，回傳 (資料, 總筆數)
    pub async fn history(
        &self,
        filter: &HistoryFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<StockRecord>, i64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM stock_data s JOIN companies c ON c.id = s.company_id",
        );
        push_history_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query = QueryBuilder::<Sqlite>::new(STOCK_SELECT);
        push_history_filter(&mut query, filter);
        query
            .push(" ORDER BY s.scrape_date DESC, s.scrape_time DESC, s.symbol LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind(page.saturating_sub(1).max(0).saturating_mul(per_page));
        let records = query
            .build_query_as::<StockRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok((records, total))
    }

    pub async fn recent_records(&self, limit: i64) -> Result<Vec<StockRecord>> {
        let query = format!(
            "{} ORDER BY s.scrape_date DESC, s.scrape_time DESC, s.symbol LIMIT ?",
            STOCK_SELECT
        );
        let records = sqlx::query_as::<_, StockRecord>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    pub async fn records_since(&self, date: NaiveDate) -> Result<Vec<StockRecord>> {
        let query = format!(
            "{} WHERE s.scrape_date >= ? ORDER BY s.scrape_date DESC, s.scrape_time DESC, s.symbol",
            STOCK_SELECT
        );
        let records = sqlx::query_as::<_, StockRecord>(&query)
            .bind(date)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    pub async fn has_closing_data(&self, date: NaiveDate) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM stock_data WHERE scrape_date = ? AND is_closing_data = 1)",
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    /// 把某天最後一次快照標記為收盤資料，回傳標記筆數
    pub async fn mark_closing(&self, date: NaiveDate) -> Result<u64> {
        let Some(latest) = self.latest_scrape_time(date).await? else {
            return Ok(0);
        };

        let result = sqlx::query(
            "UPDATE OR IGNORE stock_data SET is_closing_data = 1, data_source = ? \
             WHERE scrape_date = ? AND scrape_time = ?",
        )
        .bind(DataSource::Closing)
        .bind(date)
        .bind(latest)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Marked {} records as closing data for {}",
            result.rows_affected(),
            date
        );
        Ok(result.rows_affected())
    }

    /// 區間內有資料但沒有任何收盤資料的日期
    pub async fn dates_missing_closing(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT scrape_date FROM stock_data WHERE scrape_date BETWEEN ? AND ? \
             GROUP BY scrape_date HAVING MAX(is_closing_data) = 0 ORDER BY scrape_date",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(dates)
    }

    pub async fn delete_records_before(&self, date: NaiveDate) -> Result<u64> {
        let result = sqlx::query("DELETE FROM stock_data WHERE scrape_date < ?")
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---- market status ----

    pub async fn market_status(&self, date: NaiveDate) -> Result<Option<MarketStatus>> {
        let query = format!("{} WHERE date = ?", MARKET_STATUS_SELECT);
        let status = sqlx::query_as::<_, MarketStatus>(&query)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    pub async fn ensure_market_status(
        &self,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<MarketStatus> {
        sqlx::query(
            "INSERT INTO market_status (date, is_market_open, created_at, updated_at) \
             VALUES (?, 0, ?, ?) ON CONFLICT(date) DO NOTHING",
        )
        .bind(date)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let status = self
            .market_status(date)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok(status)
    }

    /// 只更新開盤狀態與最後抓取時間
    pub async fn set_market_state(
        &self,
        date: NaiveDate,
        is_market_open: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO market_status (date, is_market_open, last_scraped, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(date) DO UPDATE SET \
             is_market_open = excluded.is_market_open, last_scraped = excluded.last_scraped, \
             updated_at = excluded.updated_at",
        )
        .bind(date)
        .bind(is_market_open)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_market_status(&self, update: &MarketStatusUpdate) -> Result<()> {
        sqlx::query(
            "INSERT INTO market_status (date, is_market_open, last_scraped, market_close_time, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(date) DO UPDATE SET \
             is_market_open = excluded.is_market_open, last_scraped = excluded.last_scraped, \
             market_close_time = excluded.market_close_time, updated_at = excluded.updated_at",
        )
        .bind(update.date)
        .bind(update.is_market_open)
        .bind(update.last_scraped)
        .bind(update.market_close_time)
        .bind(update.last_scraped)
        .bind(update.last_scraped)
        .execute(&self.pool)
        .await?;

        if let Some(summary) = update.summary.as_ref().filter(|s| !s.is_empty()) {
            sqlx::query(
                "UPDATE market_status SET total_turnover = COALESCE(?, total_turnover), \
                 total_volume = COALESCE(?, total_volume), \
                 total_transactions = COALESCE(?, total_transactions) WHERE date = ?",
            )
            .bind(summary.total_turnover)
            .bind(summary.total_volume)
            .bind(summary.total_transactions)
            .bind(update.date)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}

fn push_history_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &HistoryFilter) {
    query.push(" WHERE 1 = 1");
    if let Some(symbol) = filter.symbol.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query.push(" AND s.symbol = ").push_bind(symbol.to_uppercase());
    }
    if let Some(start) = filter.start_date {
        query.push(" AND s.scrape_date >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        query.push(" AND s.scrape_date <= ").push_bind(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 2, 7, 0, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn record(company_id: i64, symbol: &str, pct: f64, d: NaiveDate, t: NaiveTime) -> NewStockRecord {
        NewStockRecord {
            company_id,
            symbol: symbol.to_string(),
            close_price: Some(100.0),
            last_traded_price: Some(100.0 + pct),
            previous_close: Some(100.0),
            difference: Some(pct),
            percentage_change: Some(pct),
            scrape_date: d,
            scrape_time: t,
            data_source: DataSource::Live,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_and_upsert_company() {
        let db = Database::in_memory().await.unwrap();

        let (company, created) = db.get_or_create_company("nabil", "NABIL", now()).await.unwrap();
        assert!(created);
        assert_eq!(company.symbol, "NABIL");

        let (again, created) = db.get_or_create_company("NABIL", "Other", now()).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, company.id);
        assert_eq!(again.name, "NABIL");

        let created = db
            .upsert_company(
                &CompanyUpsert {
                    symbol: "NABIL".to_string(),
                    name: "Nabil Bank Limited".to_string(),
                    sector: Some("Commercial Banks".to_string()),
                    listed_shares: 270_000_000,
                    is_active: true,
                },
                now(),
            )
            .await
            .unwrap();
        assert!(!created);

        let company = db.find_company("NABIL").await.unwrap().unwrap();
        assert_eq!(company.name, "Nabil Bank Limited");
        assert_eq!(company.sector.as_deref(), Some("Commercial Banks"));
        assert_eq!(db.count_companies().await.unwrap(), 1);
        assert_eq!(db.latest_company_update().await.unwrap(), Some(now()));
    }

    #[tokio::test]
    async fn test_duplicate_snapshot_is_skipped() {
        let db = Database::in_memory().await.unwrap();
        let (company, _) = db.get_or_create_company("NTC", "Nepal Telecom", now()).await.unwrap();

        let row = record(company.id, "NTC", 1.5, date(2), time(12, 0));
        assert!(db.insert_stock_record(&row, now()).await.unwrap());
        assert!(!db.insert_stock_record(&row, now()).await.unwrap());
        assert_eq!(db.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_movers_and_closing() {
        let db = Database::in_memory().await.unwrap();
        let mut ids = Vec::new();
        for symbol in ["AAA", "BBB", "CCC", "DDD"] {
            let (company, _) = db.get_or_create_company(symbol, symbol, now()).await.unwrap();
            ids.push(company.id);
        }

        for (i, pct) in [2.0, -1.0, 5.0, -3.0].iter().enumerate() {
            let symbol = ["AAA", "BBB", "CCC", "DDD"][i];
            db.insert_stock_record(&record(ids[i], symbol, *pct, date(2), time(11, 30)), now())
                .await
                .unwrap();
            db.insert_stock_record(&record(ids[i], symbol, *pct / 2.0, date(2), time(12, 0)), now())
                .await
                .unwrap();
        }

        assert_eq!(db.latest_scrape_date().await.unwrap(), Some(date(2)));
        assert_eq!(db.latest_scrape_time(date(2)).await.unwrap(), Some(time(12, 0)));

        let snapshot = db.snapshot(date(2), time(12, 0)).await.unwrap();
        let symbols: Vec<_> = snapshot.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["CCC", "AAA", "BBB", "DDD"]);

        let gainers = db.top_movers(date(2), time(12, 0), Movers::Gainers, 10).await.unwrap();
        assert_eq!(gainers.len(), 2);
        assert_eq!(gainers[0].symbol, "CCC");

        let losers = db.top_movers(date(2), time(12, 0), Movers::Losers, 1).await.unwrap();
        assert_eq!(losers.len(), 1);
        assert_eq!(losers[0].symbol, "DDD");

        assert!(!db.has_closing_data(date(2)).await.unwrap());
        assert_eq!(db.dates_missing_closing(date(1), date(3)).await.unwrap(), vec![date(2)]);

        assert_eq!(db.mark_closing(date(2)).await.unwrap(), 4);
        assert!(db.has_closing_data(date(2)).await.unwrap());
        assert!(db.dates_missing_closing(date(1), date(3)).await.unwrap().is_empty());

        let closing = db.snapshot(date(2), time(12, 0)).await.unwrap();
        assert!(closing.iter().all(|r| r.data_source == DataSource::Closing && r.is_closing_data));
    }

    #[tokio::test]
    async fn test_history_filters_and_pagination() {
        let db = Database::in_memory().await.unwrap();
        let (nabil, _) = db.get_or_create_company("NABIL", "Nabil Bank", now()).await.unwrap();
        let (ntc, _) = db.get_or_create_company("NTC", "Nepal Telecom", now()).await.unwrap();

        for day in 2..=6 {
            db.insert_stock_record(&record(nabil.id, "NABIL", 1.0, date(day), time(15, 30)), now())
                .await
                .unwrap();
            db.insert_stock_record(&record(ntc.id, "NTC", -1.0, date(day), time(15, 30)), now())
                .await
                .unwrap();
        }

        let filter = HistoryFilter {
            symbol: Some("nabil".to_string()),
            start_date: Some(date(3)),
            end_date: Some(date(5)),
        };
        let (records, total) = db.history(&filter, 1, 50).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].scrape_date, date(5));
        assert_eq!(records[0].company_name, "Nabil Bank");

        let (page_two, total) = db.history(&HistoryFilter::default(), 2, 4).await.unwrap();
        assert_eq!(total, 10);
        assert_eq!(page_two.len(), 4);

        let (far_page, total) = db.history(&HistoryFilter::default(), i64::MAX, 50).await.unwrap();
        assert_eq!(total, 10);
        assert!(far_page.is_empty());

        assert_eq!(db.delete_records_before(date(4)).await.unwrap(), 4);
        assert_eq!(db.count_records().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_market_status_upsert() {
        let db = Database::in_memory().await.unwrap();

        let status = db.ensure_market_status(date(2), now()).await.unwrap();
        assert!(!status.is_market_open);
        assert_eq!(status.last_scraped, None);

        db.upsert_market_status(&MarketStatusUpdate {
            date: date(2),
            is_market_open: true,
            last_scraped: now(),
            market_close_time: None,
            summary: Some(MarketSummary {
                total_turnover: Some(2_500_000_000.5),
                total_volume: Some(8_000_000),
                total_transactions: None,
            }),
        })
        .await
        .unwrap();

        let status = db.market_status(date(2)).await.unwrap().unwrap();
        assert!(status.is_market_open);
        assert_eq!(status.last_scraped, Some(now()));
        assert_eq!(status.total_turnover, 2_500_000_000.5);
        assert_eq!(status.total_volume, 8_000_000);
        assert_eq!(status.total_transactions, 0);

        db.set_market_state(date(2), false, now()).await.unwrap();
        let status = db.market_status(date(2)).await.unwrap().unwrap();
        assert!(!status.is_market_open);
        assert_eq!(status.total_volume, 8_000_000);
    }
}
