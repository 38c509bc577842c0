use crate::api::error::{ApiError, ApiResult};
use crate::app::AppContext;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

pub async fn list(State(ctx): State<AppContext>) -> ApiResult<Json<Value>> {
    let companies = ctx.db.list_companies().await?;
    Ok(Json(json!({
        "status": "success",
        "count": companies.len(),
        "data": companies,
    })))
}

/// 公司資料加上最近 30 筆股價
pub async fn detail(
    State(ctx): State<AppContext>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<Value>> {
    let symbol = symbol.trim().to_uppercase();
    let company = ctx
        .db
        .find_company(&symbol)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Company {} not found", symbol)))?;

    let filter = crate::adapters::database::HistoryFilter {
        symbol: Some(company.symbol.clone()),
        ..Default::default()
    };
    let (recent, total) = ctx.db.history(&filter, 1, 30).await?;

    Ok(Json(json!({
        "status": "success",
        "data": company,
        "total_records": total,
        "recent_prices": recent,
    })))
}
