use crate::adapters::database::{HistoryFilter, Movers};
use crate::api::error::{ApiError, ApiResult};
use crate::app::AppContext;
use crate::domain::model::StockRecord;
use crate::domain::numbers::round2;
use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PAGE_SIZE: i64 = 50;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 20;

#[derive(Debug, Serialize)]
struct MoverSummary {
    symbol: String,
    company_name: String,
    percentage_change: f64,
    last_traded_price: f64,
}

impl From<&StockRecord> for MoverSummary {
    fn from(record: &StockRecord) -> Self {
        Self {
            symbol: record.symbol.clone(),
            company_name: record.company_name.clone(),
            percentage_change: record.percentage_change.unwrap_or(0.0),
            last_traded_price: record.last_traded_price.unwrap_or(0.0),
        }
    }
}

fn summarize(records: &[StockRecord]) -> Option<Value> {
    let changes: Vec<f64> = records.iter().filter_map(|r| r.percentage_change).collect();
    if changes.is_empty() {
        return None;
    }

    let average = changes.iter().sum::<f64>() / changes.len() as f64;
    let by_change = |a: &&StockRecord, b: &&StockRecord| {
        a.percentage_change
            .unwrap_or(0.0)
            .total_cmp(&b.percentage_change.unwrap_or(0.0))
    };
    let top_gainer = records.iter().max_by(by_change).map(MoverSummary::from);
    let top_loser = records.iter().min_by(by_change).map(MoverSummary::from);

    Some(json!({
        "total_stocks": records.len(),
        "average_percentage_change": round2(average),
        "top_gainer": top_gainer,
        "top_loser": top_loser,
    }))
}

/// 今天最新的一次快照；今天沒有資料時改用最近有資料的日期
pub async fn latest(State(ctx): State<AppContext>) -> ApiResult<Json<Value>> {
    let today = ctx.today();

    let (date, time, fallback) = match ctx.db.latest_scrape_time(today).await? {
        Some(time) => (today, time, false),
        None => match ctx.db.latest_scrape_date().await? {
            Some(date) => match ctx.db.latest_scrape_time(date).await? {
                Some(time) => (date, time, true),
                None => return Ok(Json(empty_latest(today))),
            },
            None => return Ok(Json(empty_latest(today))),
        },
    };

    let records = ctx.db.snapshot(date, time).await?;
    let mut body = json!({
        "status": "success",
        "date": date,
        "scrape_time": time,
        "count": records.len(),
        "summary": summarize(&records),
        "data": records,
    });
    if fallback {
        body["message"] = json!(format!("Showing latest available data from {}", date));
    }
    Ok(Json(body))
}

fn empty_latest(today: NaiveDate) -> Value {
    json!({
        "status": "success",
        "date": today,
        "count": 0,
        "data": [],
        "message": "No stock data available",
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<String>,
}

impl LimitParams {
    fn limit(&self) -> ApiResult<i64> {
        match self.limit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(DEFAULT_LIMIT),
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|limit| *limit > 0)
                .map(|limit| limit.min(MAX_LIMIT))
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid limit: {}", raw))),
        }
    }
}

pub async fn top_gainers(
    State(ctx): State<AppContext>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Value>> {
    movers(&ctx, Movers::Gainers, params.limit()?).await
}

pub async fn top_losers(
    State(ctx): State<AppContext>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Value>> {
    movers(&ctx, Movers::Losers, params.limit()?).await
}

async fn movers(ctx: &AppContext, movers: Movers, limit: i64) -> ApiResult<Json<Value>> {
    let today = ctx.today();
    let Some(time) = ctx.db.latest_scrape_time(today).await? else {
        return Ok(Json(json!({
            "status": "success",
            "date": today,
            "count": 0,
            "data": [],
            "message": "No data available for today",
        })));
    };

    let records = ctx.db.top_movers(today, time, movers, limit).await?;
    Ok(Json(json!({
        "status": "success",
        "date": today,
        "scrape_time": time,
        "count": records.len(),
        "data": records,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub symbol: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<String>,
}

fn parse_date(field: &str, value: Option<&str>) -> ApiResult<Option<NaiveDate>> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                ApiError::BadRequest(format!("Invalid {}: {} (expected YYYY-MM-DD)", field, raw))
            }),
    }
}

/// 分頁的歷史股價，每頁 50 筆
pub async fn history(
    State(ctx): State<AppContext>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Value>> {
    let filter = HistoryFilter {
        symbol: params.symbol.clone(),
        start_date: parse_date("start_date", params.start_date.as_deref())?,
        end_date: parse_date("end_date", params.end_date.as_deref())?,
    };
    let page = match params.page.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => 1,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|page| *page >= 1)
            .ok_or_else(|| ApiError::BadRequest("Invalid page number".to_string()))?,
    };

    let (records, total) = ctx.db.history(&filter, page, PAGE_SIZE).await?;
    let total_pages = ((total + PAGE_SIZE - 1) / PAGE_SIZE).max(1);
    if page > total_pages {
        return Err(ApiError::BadRequest("Invalid page number".to_string()));
    }

    Ok(Json(json!({
        "count": total,
        "total_pages": total_pages,
        "current_page": page,
        "results": records,
    })))
}
