use crate::api::error::{ApiError, ApiResult};
use crate::app::AppContext;
use crate::domain::market_hours::to_nepal;
use crate::tasks::jobs;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub async fn index() -> Json<Value> {
    Json(json!({
        "message": "NEPSE Scraper API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "market_status": "/api/status/",
            "latest_stocks": "/api/stocks/latest/",
            "top_gainers": "/api/stocks/top-gainers/",
            "top_losers": "/api/stocks/top-losers/",
            "stock_history": "/api/stocks/",
            "companies": "/api/companies/",
            "health": "/api/health/",
        },
        "description": "Automated NEPSE stock market data scraper",
        "market_hours": "Sunday-Thursday, 11:00 AM - 3:00 PM (Nepal Time)",
        "status": "operational",
    }))
}

/// 今天的市場狀態
pub async fn status(State(ctx): State<AppContext>) -> ApiResult<Json<Value>> {
    let local = to_nepal(ctx.now());
    let today = local.date();
    let session = ctx.hours.session(local);

    let body = match ctx.db.market_status(today).await? {
        Some(status) => json!({
            "status": "success",
            "date": today,
            "is_market_open": status.is_market_open,
            "last_scraped": status.last_scraped,
            "total_turnover": status.total_turnover,
            "total_volume": status.total_volume,
            "total_transactions": status.total_transactions,
            "market_close_time": status.market_close_time,
            "session": session,
            "current_time": local,
        }),
        None => json!({
            "status": "success",
            "date": today,
            "is_market_open": false,
            "last_scraped": null,
            "message": "No market data available for today",
            "session": session,
            "current_time": local,
        }),
    };
    Ok(Json(body))
}

pub async fn health(State(ctx): State<AppContext>) -> ApiResult<Json<Value>> {
    let report = jobs::health_check(&ctx).await?;
    Ok(Json(json!(report)))
}

pub async fn cron_test(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": "Cron endpoint is working",
        "timestamp": ctx.now(),
        "endpoint": "/api/cron/scrape/",
        "required_header": "X-Cron-Secret",
        "secret_required": ctx.config.server.cron_secret.is_some(),
    }))
}

/// 外部 cron 服務觸發一次同步抓取
pub async fn cron_scrape(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    if let Some(secret) = ctx.config.server.cron_secret.as_deref() {
        let provided = headers
            .get(CRON_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(secret) {
            tracing::warn!("🚫 Cron scrape rejected: missing or wrong secret");
            return Err(ApiError::Forbidden("Invalid cron secret".to_string()));
        }
    }

    let report = ctx.processor().execute_scraping(ctx.now()).await?;
    Ok(Json(json!({
        "status": "success",
        "records_saved": report.records_saved,
        "message": report.message,
        "timestamp": ctx.now(),
        "data": report,
    })))
}
