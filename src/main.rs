use anyhow::Context;
use clap::Parser;
use nepse_scraper::config::toml_config::validate_queue_name;
use nepse_scraper::utils::error::ScraperError;
use nepse_scraper::utils::shutdown::shutdown_channel;
use nepse_scraper::utils::{logger, validation::Validate};
use nepse_scraper::{
    api, AppConfig, AppContext, Beat, Cli, Command, Database, TaskBroker, TaskKind, Worker,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 初始化日誌
    logger::init_logger(cli.verbose, cli.log_format);

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<ScraperError>() {
            Some(err) => {
                tracing::error!(
                    "❌ {} (Category: {:?}, Severity: {:?})",
                    err,
                    err.category(),
                    err.severity()
                );
                tracing::error!("💡 Recovery suggestion: {}", err.recovery_suggestion());
                eprintln!("❌ {}", err.user_friendly_message());
                eprintln!("💡 建議: {}", err.recovery_suggestion());
                std::process::exit(err.exit_code().max(1));
            }
            None => {
                tracing::error!("❌ {:#}", e);
                eprintln!("❌ {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }

    // 驗證配置
    config.validate()?;
    if cli.verbose {
        tracing::debug!("Config: {:?}", config);
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Release => {
            let db = Database::connect(&config.database).await?;
            db.migrate().await?;
            tracing::info!("✅ Migrations applied to {}", config.database.url);
        }
        Command::Init => init(config).await?,
        Command::Web { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let ctx = AppContext::connect(config).await?;
            api::serve(ctx, &host, port).await?;
        }
        Command::Worker {
            queues,
            concurrency,
        } => {
            let queues = queues.unwrap_or_else(|| config.worker.queues.clone());
            for queue in &queues {
                validate_queue_name("worker.queues", queue)?;
            }
            let concurrency = concurrency.unwrap_or(config.worker.concurrency);
            let ctx = AppContext::connect(config).await?;
            Worker::new(ctx, queues, concurrency)
                .run(shutdown_channel())
                .await?;
        }
        Command::Beat => {
            let ctx = AppContext::connect(config).await?;
            let beat = Beat::from_context(&ctx)?;
            beat.run(ctx.clock.as_ref(), shutdown_channel()).await?;
        }
        Command::Scrape => {
            let ctx = AppContext::connect(config).await?;
            let report = ctx.processor().execute_scraping(ctx.now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Enqueue { task, queue } => {
            let kind: TaskKind = task.parse()?;
            let queue = queue.unwrap_or_else(|| kind.default_queue().to_string());
            validate_queue_name("queue", &queue)?;

            let ctx = AppContext::connect(config).await?;
            let now = ctx.now();
            let id = TaskBroker::new(ctx.db.clone())
                .enqueue(kind.name(), &queue, kind.max_retries(), now, now)
                .await?;
            println!("📨 Enqueued {} on {} (id {})", kind, queue, id);
        }
    }

    Ok(())
}

/// 部署後的第一次啟動：migrate，沒有股價資料時先抓一次
async fn init(config: AppConfig) -> anyhow::Result<()> {
    println!("🚀 Initializing NEPSE scraper...");
    let ctx = AppContext::connect(config).await?;
    ctx.db.migrate().await.context("running migrations")?;
    println!("✅ Migrations applied");

    if ctx.db.count_records().await? == 0 {
        println!("📊 No stock data found, running initial scrape...");
        match ctx.processor().execute_scraping(ctx.now()).await {
            Ok(report) => println!("✅ Initial scrape: {}", report.message),
            Err(e) => {
                tracing::warn!("⚠️ Initial scrape failed: {}", e);
                println!("⚠️ Initial scrape failed: {}", e.user_friendly_message());
            }
        }
    } else {
        println!("✅ Stock data already present, skipping initial scrape");
    }

    let recent = ctx.db.recent_records(3).await?;
    println!("📈 Newest {} records:", recent.len());
    for record in recent {
        println!(
            "  {} {} {} ltp={} change={}%",
            record.scrape_date,
            record.scrape_time,
            record.symbol,
            record
                .last_traded_price
                .map_or("-".to_string(), |v| format!("{:.2}", v)),
            record
                .percentage_change
                .map_or("-".to_string(), |v| format!("{:.2}", v)),
        );
    }

    Ok(())
}
