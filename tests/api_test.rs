use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use nepse_scraper::adapters::sample::SampleDataSource;
use nepse_scraper::api::build_router;
use nepse_scraper::domain::ports::ManualClock;
use nepse_scraper::{AppConfig, AppContext, Database};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    ctx: AppContext,
    clock: Arc<ManualClock>,
}

impl TestApp {
    async fn new(config: AppConfig) -> Self {
        // 2024-06-02 (Sunday) 12:30 Nepal
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 2, 6, 45, 0).unwrap(),
        ));
        let ctx = AppContext::new(
            Database::in_memory().await.unwrap(),
            config,
            Arc::new(SampleDataSource),
            clock.clone(),
        )
        .unwrap();
        Self { ctx, clock }
    }

    async fn with_data() -> Self {
        let app = Self::new(AppConfig::default()).await;
        app.ctx
            .processor()
            .execute_scraping(app.ctx.now())
            .await
            .unwrap();
        app
    }

    fn router(&self) -> Router {
        build_router(self.ctx.clone())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

#[tokio::test]
async fn test_index() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, body) = app.get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["endpoints"]["latest_stocks"], "/api/stocks/latest/");
}

#[tokio::test]
async fn test_latest_with_summary() {
    let app = TestApp::with_data().await;
    let (status, body) = app.get("/api/stocks/latest/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["date"], "2024-06-02");
    assert_eq!(body["count"], 5);
    assert_eq!(body["data"][0]["symbol"], "NICA");
    assert_eq!(body["data"][0]["company_name"], "NIC ASIA Bank");
    assert_eq!(body["summary"]["top_gainer"]["symbol"], "NICA");
    assert_eq!(body["summary"]["top_loser"]["symbol"], "SHL");
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn test_latest_falls_back_to_previous_day() {
    let app = TestApp::with_data().await;
    app.clock.advance(Duration::days(1));

    let (_, body) = app.get("/api/stocks/latest/").await;
    assert_eq!(body["date"], "2024-06-02");
    assert_eq!(body["count"], 5);
    assert_eq!(body["message"], "Showing latest available data from 2024-06-02");
}

#[tokio::test]
async fn test_latest_on_empty_database() {
    let app = TestApp::new(AppConfig::default()).await;
    let (status, body) = app.get("/api/stocks/latest/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
    assert_eq!(body["message"], "No stock data available");
}

#[tokio::test]
async fn test_top_gainers_and_losers() {
    let app = TestApp::with_data().await;

    let (_, gainers) = app.get("/api/stocks/top-gainers/?limit=2").await;
    assert_eq!(gainers["count"], 2);
    assert_eq!(gainers["data"][0]["symbol"], "NICA");
    assert_eq!(gainers["data"][1]["symbol"], "NBL");

    let (_, losers) = app.get("/api/stocks/top-losers/").await;
    assert_eq!(losers["count"], 2);
    assert_eq!(losers["data"][0]["symbol"], "SHL");

    let (status, body) = app.get("/api/stocks/top-gainers/?limit=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_history_pagination_and_validation() {
    let app = TestApp::with_data().await;

    let (status, body) = app.get("/api/stocks/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 5);
    assert_eq!(body["total_pages"], 1);
    assert_eq!(body["current_page"], 1);

    let (_, body) = app.get("/api/stocks/?symbol=nica&start_date=2024-06-01").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["symbol"], "NICA");

    for uri in [
        "/api/stocks/?page=0",
        "/api/stocks/?page=2",
        "/api/stocks/?page=two",
        "/api/stocks/?page=9223372036854775807",
        "/api/stocks/?end_date=2024/06/02",
    ] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["status"], "error");
    }
}

#[tokio::test]
async fn test_companies() {
    let app = TestApp::with_data().await;

    let (_, body) = app.get("/api/companies/").await;
    assert_eq!(body["count"], 5);
    assert_eq!(body["data"][0]["symbol"], "CBBL");

    let (status, body) = app.get("/api/companies/ntc/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Nepal Telecom");
    assert_eq!(body["total_records"], 1);

    let (status, body) = app.get("/api/companies/NOPE/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_status_and_health() {
    let app = TestApp::new(AppConfig::default()).await;
    let (_, body) = app.get("/api/status/").await;
    assert_eq!(body["is_market_open"], false);
    assert_eq!(body["message"], "No market data available for today");

    app.ctx
        .processor()
        .execute_scraping(app.ctx.now())
        .await
        .unwrap();

    let (_, body) = app.get("/api/status/").await;
    assert_eq!(body["is_market_open"], true);
    assert_eq!(body["session"], "regular");

    let (status, body) = app.get("/api/health/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_records"], 5);
    assert_eq!(body["today_records"], 5);
    assert_eq!(body["market_status"], "open");
}

#[tokio::test]
async fn test_cron_scrape_requires_secret() {
    let mut config = AppConfig::default();
    config.server.cron_secret = Some("s3cret".to_string());
    let app = TestApp::new(config).await;

    let (status, body) = app.get("/api/cron/test/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["secret_required"], true);

    let (status, _) = app.get("/api/cron/scrape/").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::post("/api/cron/scrape/")
        .header("X-Cron-Secret", "s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records_saved"], 5);

    // 同一個時間點重複抓取不會產生重複資料
    let request = Request::get("/api/cron/scrape/")
        .header("X-Cron-Secret", "s3cret")
        .body(Body::empty())
        .unwrap();
    let (_, body) = app.send(request).await;
    assert_eq!(body["records_saved"], 0);
}
