use crate::adapters::html::{self, Table};
use crate::adapters::http::{join_url, HttpFetcher};
use crate::config::toml_config::{MerolaganiConfig, SourcesConfig};
use crate::domain::model::{PriceData, PriceItem};
use crate::domain::numbers::{parse_number, round2};
use crate::domain::ports::MarketDataSource;
use crate::utils::error::{Result, ScraperError};
use async_trait::async_trait;
use std::collections::HashSet;

const STOCK_TABLE_KEYWORDS: &[&str] = &["symbol", "company", "scrip", "ltp", "change", "%"];

/// Merolagani LatestMarket.aspx 網頁爬蟲
#[derive(Debug)]
pub struct MerolaganiScraper {
    fetcher: HttpFetcher,
    config: MerolaganiConfig,
}

impl MerolaganiScraper {
    pub fn new(sources: &SourcesConfig) -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::from_config(sources, true)?,
            config: sources.merolagani.clone(),
        })
    }
}

#[async_trait]
impl MarketDataSource for MerolaganiScraper {
    fn name(&self) -> &str {
        "merolagani"
    }

    async fn todays_prices(&self) -> Result<PriceData> {
        let url = join_url(&self.config.base_url, &self.config.latest_market_path);
        tracing::info!("🌐 Fetching live market page: {}", url);

        let page = self.fetcher.get_text(&url).await?;
        let mut data = parse_latest_market(&page)?;

        if self.config.max_per_list > 0 {
            data.gainers.truncate(self.config.max_per_list);
            data.losers.truncate(self.config.max_per_list);
            data.unchanged.truncate(self.config.max_per_list);
        }

        tracing::info!(
            "✅ Merolagani: {} gainers, {} losers, {} unchanged",
            data.gainers.len(),
            data.losers.len(),
            data.unchanged.len()
        );
        Ok(data)
    }
}

/// 欄位位置
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ColumnMap {
    symbol: Option<usize>,
    price: Option<usize>,
    percent: Option<usize>,
    point: Option<usize>,
    previous: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &[String]) -> Self {
        let mut map = Self::default();
        for (i, header) in headers.iter().enumerate() {
            let h = header.to_lowercase();
            let slot = if ["symbol", "company", "scrip"].iter().any(|k| h.contains(k)) {
                &mut map.symbol
            } else if h.contains("pclose") || h.contains("prev") {
                &mut map.previous
            } else if ["ltp", "price", "last", "closing"].iter().any(|k| h.contains(k)) {
                &mut map.price
            } else if ["change%", "% change", "change %", "percent", "%"]
                .iter()
                .any(|k| h.contains(k))
            {
                &mut map.percent
            } else if h.contains("change") || h.contains("diff") {
                &mut map.point
            } else {
                continue;
            };
            slot.get_or_insert(i);
        }
        map
    }

    /// symbol, ltp, point change, % change
    fn positional() -> Self {
        Self {
            symbol: Some(0),
            price: Some(1),
            point: Some(2),
            percent: Some(3),
            previous: None,
        }
    }

    fn is_usable(&self) -> bool {
        self.symbol.is_some() && self.price.is_some()
    }
}

fn looks_like_stock_table(table: &Table) -> bool {
    table
        .header_row()
        .map(|(_, headers)| {
            let joined = headers.join(" ");
            STOCK_TABLE_KEYWORDS.iter().any(|k| joined.contains(k))
        })
        .unwrap_or(false)
}

fn cell<'a>(row: &[&'a str], index: Option<usize>) -> Option<&'a str> {
    index.and_then(|i| row.get(i).copied())
}

fn parse_row(row: &[&str], columns: &ColumnMap) -> Option<PriceItem> {
    let symbol = cell(row, columns.symbol)?.trim().to_uppercase();
    if symbol.is_empty() || symbol.contains(' ') {
        return None;
    }
    let ltp = cell(row, columns.price).and_then(parse_number)?;

    let previous_close = cell(row, columns.previous).and_then(parse_number);
    let mut point_change = cell(row, columns.point).and_then(parse_number);
    let mut percentage_change = cell(row, columns.percent).and_then(parse_number);

    // 只有前收盤價時自行推算漲跌
    if let Some(prev) = previous_close.filter(|p| *p > 0.0) {
        point_change.get_or_insert(round2(ltp - prev));
        percentage_change.get_or_insert(round2((ltp - prev) / prev * 100.0));
    }

    Some(PriceItem {
        symbol,
        security_name: None,
        ltp: Some(ltp),
        close_price: None,
        previous_close,
        point_change,
        percentage_change,
    })
}

fn parse_table(table: &Table) -> Vec<PriceItem> {
    let headers = table.header_row().map(|(_, h)| h).unwrap_or_default();
    let mapped = ColumnMap::from_headers(&headers);
    let columns = if mapped.is_usable() {
        mapped
    } else {
        tracing::debug!("Header mapping failed for {:?}, using positional layout", headers);
        ColumnMap::positional()
    };

    table
        .data_rows()
        .filter(|row| row.len() >= 2)
        .filter_map(|row| parse_row(&row, &columns))
        .collect()
}

/// 解析 LatestMarket 頁面，優先使用 live-trading 表格
pub fn parse_latest_market(page: &str) -> Result<PriceData> {
    let tables = html::tables(page);
    if tables.is_empty() {
        return Err(ScraperError::ParseError {
            message: "No tables found on the latest market page".to_string(),
        });
    }

    let live: Vec<&Table> = tables.iter().filter(|t| t.has_class("live-trading")).collect();
    let candidates: Vec<&Table> = if live.is_empty() {
        tracing::debug!("live-trading table missing, scanning {} tables", tables.len());
        tables.iter().filter(|t| looks_like_stock_table(t)).collect()
    } else {
        live
    };

    let mut seen = HashSet::new();
    let items: Vec<PriceItem> = candidates
        .into_iter()
        .flat_map(parse_table)
        .filter(|item| seen.insert(item.symbol.clone()))
        .collect();

    if items.is_empty() {
        return Err(ScraperError::NoDataError {
            message: "No stock rows found on the latest market page".to_string(),
        });
    }

    Ok(PriceData::from_items(items))
}
