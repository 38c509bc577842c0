// Read-only JSON API served by the Procfile `web` role.

pub mod companies;
pub mod error;
pub mod stocks;
pub mod system;

use crate::app::AppContext;
use crate::utils::error::{Result, ScraperError};
use crate::utils::shutdown::shutdown_signal;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};

pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(system::index))
        .route("/api/status/", get(system::status))
        .route("/api/health/", get(system::health))
        // Stock data
        .route("/api/stocks/", get(stocks::history))
        .route("/api/stocks/latest/", get(stocks::latest))
        .route("/api/stocks/top-gainers/", get(stocks::top_gainers))
        .route("/api/stocks/top-losers/", get(stocks::top_losers))
        // Companies
        .route("/api/companies/", get(companies::list))
        .route("/api/companies/{symbol}/", get(companies::detail))
        // External cron triggers
        .route("/api/cron/test/", get(system::cron_test))
        .route(
            "/api/cron/scrape/",
            get(system::cron_scrape).post(system::cron_scrape),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// 綁定位址並提供服務，直到收到關閉訊號
pub async fn serve(ctx: AppContext, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ScraperError::ConfigError {
            message: format!("Failed to bind to {}: {}", addr, e),
        })?;

    tracing::info!("🌐 API listening on http://{}", addr);
    tracing::info!("Latest stocks: http://{}/api/stocks/latest/", addr);

    axum::serve(listener, build_router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 API server shut down gracefully");
    Ok(())
}
