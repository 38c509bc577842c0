use crate::app::AppContext;
use crate::core::export::{export_backup, BackupReport};
use crate::domain::market_hours::{is_trading_day, to_nepal};
use crate::tasks::broker::{TaskBroker, TaskStatus};
use crate::utils::error::Result;
use crate::utils::monitor::ProcessStats;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// 每 30 分鐘的排程抓取
pub async fn scrape_market_data(ctx: &AppContext) -> Result<Value> {
    let now = ctx.now();
    let local = to_nepal(now);
    let today = local.date();

    if !ctx.hours.is_market_open(local) && ctx.db.has_closing_data(today).await? {
        tracing::info!("⏭️ Market closed and closing data exists for {}, skipping", today);
        ctx.db.set_market_state(today, false, now).await?;
        return Ok(json!({
            "status": "skipped",
            "reason": "market closed, closing data already saved",
            "date": today,
        }));
    }

    let report = ctx.processor().execute_scraping(now).await?;

    let mut marked = 0;
    if ctx.hours.in_closing_window(local.time()) {
        tracing::info!("🔔 Inside closing window, marking closing data");
        marked = ctx.processor().mark_closing(today).await?;
    }

    Ok(json!({
        "status": "success",
        "records_saved": report.records_saved,
        "records_marked_closing": marked,
        "date": report.scrape_date,
        "time": report.scrape_time,
        "market_open": ctx.hours.is_market_open(local),
        "data_source": report.data_source,
        "session": report.market_session,
    }))
}

/// 15:30 強制收盤：抓取一次後把最後一次快照標記為收盤資料
pub async fn force_closing_data(ctx: &AppContext) -> Result<Value> {
    let now = ctx.now();
    let today = ctx.today();

    let records_saved = match ctx.processor().execute_scraping(now).await {
        Ok(report) => report.records_saved,
        Err(e) => {
            tracing::warn!("⚠️ Final scrape before closing failed: {}", e);
            0
        }
    };

    let marked = ctx.processor().mark_closing(today).await?;
    ctx.db.set_market_state(today, false, now).await?;

    tracing::info!("🏁 Closing data complete for {}: {} records", today, marked);
    Ok(json!({
        "status": "closing_complete",
        "date": today,
        "records_saved": records_saved,
        "records_marked": marked,
    }))
}

pub async fn market_opening(ctx: &AppContext) -> Result<Value> {
    let today = ctx.today();
    let status = ctx.db.ensure_market_status(today, ctx.now()).await?;
    tracing::info!("🌅 Market status ready for {}", today);
    Ok(json!({
        "status": "ready",
        "date": status.date,
        "is_market_open": status.is_market_open,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub total_companies: i64,
    pub total_records: i64,
    pub today_records: i64,
    pub market_status: &'static str,
    pub last_scraped: Option<DateTime<Utc>>,
    pub pending_tasks: i64,
    pub process: Option<ProcessStats>,
}

pub async fn health_check(ctx: &AppContext) -> Result<HealthReport> {
    let today = ctx.today();
    let status = ctx.db.market_status(today).await?;
    let broker = TaskBroker::new(ctx.db.clone());

    let report = HealthReport {
        status: "healthy",
        timestamp: ctx.now(),
        total_companies: ctx.db.count_companies().await?,
        total_records: ctx.db.count_records().await?,
        today_records: ctx.db.count_records_on(today).await?,
        market_status: match &status {
            Some(s) if s.is_market_open => "open",
            Some(_) => "closed",
            None => "not_initialized",
        },
        last_scraped: status.and_then(|s| s.last_scraped),
        pending_tasks: broker.count_with_status(TaskStatus::Pending).await?,
        process: ctx.monitor.stats(),
    };

    tracing::info!(
        "💓 Health: {} companies, {} records ({} today), market {}",
        report.total_companies,
        report.total_records,
        report.today_records,
        report.market_status
    );
    Ok(report)
}

pub async fn daily_maintenance(ctx: &AppContext) -> Result<Value> {
    let now = ctx.now();
    let maintenance = &ctx.config.maintenance;
    let cutoff = ctx.today() - Duration::days(maintenance.retention_days);

    let deleted_records = ctx.db.delete_records_before(cutoff).await?;
    let pruned_tasks = TaskBroker::new(ctx.db.clone())
        .prune_finished(now - Duration::days(maintenance.task_history_days))
        .await?;

    tracing::info!(
        "🧹 Maintenance: deleted {} records before {}, pruned {} finished tasks",
        deleted_records,
        cutoff,
        pruned_tasks
    );
    Ok(json!({
        "status": "completed",
        "records_deleted": deleted_records,
        "cutoff_date": cutoff,
        "tasks_pruned": pruned_tasks,
    }))
}

/// 過去幾個交易日有資料但沒有收盤資料的，補標記最後一次快照
pub async fn fill_missing_data(ctx: &AppContext) -> Result<Value> {
    let today = ctx.today();
    let from = today - Duration::days(ctx.config.maintenance.fill_missing_days);
    let to = today - Duration::days(1);

    let dates: Vec<NaiveDate> = ctx
        .db
        .dates_missing_closing(from, to)
        .await?
        .into_iter()
        .filter(|date| is_trading_day(*date))
        .collect();

    let mut filled = Vec::new();
    for date in dates {
        let marked = ctx.db.mark_closing(date).await?;
        if marked > 0 {
            filled.push(json!({ "date": date, "records_marked": marked }));
        }
    }

    tracing::info!("🩹 Filled closing data for {} days", filled.len());
    Ok(json!({
        "status": "completed",
        "days_filled": filled.len(),
        "filled": filled,
    }))
}

pub async fn backup_historical_data(ctx: &AppContext) -> Result<BackupReport> {
    export_backup(
        &ctx.db,
        &ctx.storage,
        ctx.now(),
        ctx.config.export.backup_days,
    )
    .await
}

/// 只抓取不寫入，確認資料來源可用
pub async fn test_scraping_pipeline(ctx: &AppContext) -> Result<Value> {
    let local = to_nepal(ctx.now());
    let prices = ctx.source.todays_prices().await?;

    tracing::info!(
        "🧪 Pipeline test: {} items ({} gainers, {} losers)",
        prices.len(),
        prices.gainers.len(),
        prices.losers.len()
    );
    Ok(json!({
        "status": "success",
        "source": ctx.source.name(),
        "session": ctx.hours.session(local),
        "data_source": ctx.hours.data_source(local),
        "total": prices.len(),
        "gainers": prices.gainers.len(),
        "losers": prices.losers.len(),
        "unchanged": prices.unchanged.len(),
    }))
}
