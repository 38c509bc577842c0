use crate::domain::numbers::{lenient_f64, lenient_i64};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 股價快照的資料來源類型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Closing,
    Historical,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Closing => "closing",
            Self::Historical => "historical",
        }
    }

    /// 收盤與歷史資料都視為收盤資料
    pub fn is_closing_data(&self) -> bool {
        matches!(self, Self::Closing | Self::Historical)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSession {
    PreOpen,
    Regular,
    PostClose,
    AfterHours,
}

impl MarketSession {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreOpen => "pre_open",
            Self::Regular => "regular",
            Self::PostClose => "post_close",
            Self::AfterHours => "after_hours",
        }
    }
}

impl fmt::Display for MarketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Company {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub listed_shares: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 一筆股價快照，附帶公司名稱
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StockRecord {
    pub id: i64,
    #[serde(skip)]
    pub company_id: i64,
    pub symbol: String,
    pub company_name: String,
    pub close_price: Option<f64>,
    pub last_traded_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub difference: Option<f64>,
    pub percentage_change: Option<f64>,
    pub scrape_date: NaiveDate,
    pub scrape_time: NaiveTime,
    pub data_source: DataSource,
    pub is_closing_data: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MarketStatus {
    pub date: NaiveDate,
    pub is_market_open: bool,
    pub last_scraped: Option<DateTime<Utc>>,
    pub total_turnover: f64,
    pub total_volume: i64,
    pub total_transactions: i64,
    pub market_close_time: Option<NaiveTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 從資料來源抓到的一檔股票
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceItem {
    pub symbol: String,
    #[serde(rename = "securityName", default)]
    pub security_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ltp: Option<f64>,
    #[serde(rename = "cp", default, deserialize_with = "lenient_f64")]
    pub close_price: Option<f64>,
    #[serde(rename = "previousClose", default, deserialize_with = "lenient_f64")]
    pub previous_close: Option<f64>,
    #[serde(rename = "pointChange", default, deserialize_with = "lenient_f64")]
    pub point_change: Option<f64>,
    #[serde(rename = "percentageChange", default, deserialize_with = "lenient_f64")]
    pub percentage_change: Option<f64>,
}

impl PriceItem {
    pub fn normalized_symbol(&self) -> String {
        self.symbol.trim().to_uppercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceData {
    pub gainers: Vec<PriceItem>,
    pub losers: Vec<PriceItem>,
    pub unchanged: Vec<PriceItem>,
}

impl PriceData {
    /// 依漲跌幅分類，漲幅由大到小、跌幅由深到淺排序
    pub fn from_items(items: Vec<PriceItem>) -> Self {
        let mut data = Self::default();
        for item in items {
            match item.percentage_change {
                Some(pct) if pct > 0.0 => data.gainers.push(item),
                Some(pct) if pct < 0.0 => data.losers.push(item),
                _ => data.unchanged.push(item),
            }
        }
        data.sort();
        data
    }

    pub fn sort(&mut self) {
        let pct = |item: &PriceItem| item.percentage_change.unwrap_or(0.0);
        self.gainers.sort_by(|a, b| pct(b).total_cmp(&pct(a)));
        self.losers.sort_by(|a, b| pct(a).total_cmp(&pct(b)));
        self.unchanged.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    }

    pub fn len(&self) -> usize {
        self.gainers.len() + self.losers.len() + self.unchanged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceItem> {
        self.gainers
            .iter()
            .chain(self.losers.iter())
            .chain(self.unchanged.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    #[serde(default)]
    pub symbol: String,
    #[serde(rename = "companyName", default)]
    pub company_name: Option<String>,
    #[serde(rename = "securityName", default)]
    pub security_name: Option<String>,
    #[serde(rename = "sectorName", default)]
    pub sector_name: Option<String>,
    #[serde(rename = "totalListedShares", default, deserialize_with = "lenient_i64")]
    pub total_listed_shares: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl CompanyProfile {
    pub fn display_name(&self) -> Option<String> {
        [self.company_name.as_deref(), self.security_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
            .map(str::to_string)
    }

    pub fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case("active"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketSummary {
    pub total_turnover: Option<f64>,
    pub total_volume: Option<i64>,
    pub total_transactions: Option<i64>,
}

impl MarketSummary {
    pub fn is_empty(&self) -> bool {
        self.total_turnover.is_none()
            && self.total_volume.is_none()
            && self.total_transactions.is_none()
    }
}

/// 一次抓取的結果報告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeReport {
    pub success: bool,
    pub records_saved: usize,
    pub records_skipped: usize,
    pub data_source: DataSource,
    pub market_session: MarketSession,
    pub is_trading_day: bool,
    pub scrape_date: NaiveDate,
    pub scrape_time: NaiveTime,
    pub companies_created: usize,
    pub companies_updated: usize,
    pub message: String,
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "closing" => Ok(Self::Closing),
            "historical" => Ok(Self::Historical),
            other => Err(format!("unknown data source: {}", other)),
        }
    }
}
