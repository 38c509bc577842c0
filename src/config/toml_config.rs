use crate::utils::error::{Result, ScraperError};
use crate::utils::validation::{
    parse_clock_time, validate_non_empty_string, validate_path, validate_positive_number,
    validate_range, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

pub const QUEUE_SCRAPING: &str = "scraping";
pub const QUEUE_MAINTENANCE: &str = "maintenance";
pub const QUEUE_TESTING: &str = "testing";

/// 服務的完整設定。所有區段都有預設值，空檔案也是合法設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub sources: SourcesConfig,
    pub market: MarketConfig,
    pub worker: WorkerConfig,
    pub beat: BeatConfig,
    pub maintenance: MaintenanceConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://nepse.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 設定後 /api/cron/scrape/ 需要 X-Cron-Secret 標頭
    pub cron_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cron_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// 依序嘗試的資料來源: "nepse_api", "merolagani"
    pub order: Vec<String>,
    pub allow_sample_data: bool,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u64,
    pub min_records: usize,
    pub user_agents: Vec<String>,
    pub nepse_api: NepseApiConfig,
    pub merolagani: MerolaganiConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            order: vec!["nepse_api".to_string(), "merolagani".to_string()],
            allow_sample_data: false,
            timeout_seconds: 15,
            retry_attempts: 3,
            retry_delay_seconds: 2,
            min_records: 1,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0".to_string(),
            ],
            nepse_api: NepseApiConfig::default(),
            merolagani: MerolaganiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NepseApiConfig {
    pub base_url: String,
    pub top_gainers_path: String,
    pub top_losers_path: String,
    pub company_list_path: String,
    pub security_list_path: String,
    pub market_summary_path: String,
    pub verify_tls: bool,
}

impl Default for NepseApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nepalstock.com".to_string(),
            top_gainers_path: "/api/nots/top-ten/top-gainer".to_string(),
            top_losers_path: "/api/nots/top-ten/top-loser".to_string(),
            company_list_path: "/api/nots/company/list".to_string(),
            security_list_path: "/api/nots/security?nonDelisted=true".to_string(),
            market_summary_path: "/api/nots/market-summary/".to_string(),
            verify_tls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MerolaganiConfig {
    pub base_url: String,
    pub latest_market_path: String,
    /// 每個漲跌榜最多保留的筆數，0 表示不限制
    pub max_per_list: usize,
}

impl Default for MerolaganiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://merolagani.com".to_string(),
            latest_market_path: "/LatestMarket.aspx".to_string(),
            max_per_list: 0,
        }
    }
}

/// 交易時段 (尼泊爾時間)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub open: String,
    pub close: String,
    pub closing_window_start: String,
    pub closing_window_end: String,
    pub closing_snapshot_time: String,
    pub historical_snapshot_time: String,
    pub post_close_grace_hours: i64,
    pub company_refresh_hours: i64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            open: "11:00".to_string(),
            close: "15:00".to_string(),
            closing_window_start: "14:45".to_string(),
            closing_window_end: "15:15".to_string(),
            closing_snapshot_time: "15:30".to_string(),
            historical_snapshot_time: "16:00".to_string(),
            post_close_grace_hours: 2,
            company_refresh_hours: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub queues: Vec<String>,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub time_limit_seconds: u64,
    pub retry_delay_seconds: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: vec![
                QUEUE_SCRAPING.to_string(),
                QUEUE_MAINTENANCE.to_string(),
                QUEUE_TESTING.to_string(),
            ],
            concurrency: 1,
            poll_interval_ms: 1000,
            time_limit_seconds: 300,
            retry_delay_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    pub tick_seconds: u64,
    pub schedule: Vec<ScheduleEntryConfig>,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 5,
            schedule: default_schedule(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntryConfig {
    pub name: String,
    pub task: String,
    pub queue: Option<String>,
    pub every_seconds: Option<u64>,
    pub crontab: Option<CrontabConfig>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrontabConfig {
    pub hour: u32,
    pub minute: u32,
    /// "sun".."sat"; 省略表示每天
    pub days: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn interval(name: &str, task: &str, queue: &str, every_seconds: u64) -> ScheduleEntryConfig {
    ScheduleEntryConfig {
        name: name.to_string(),
        task: task.to_string(),
        queue: Some(queue.to_string()),
        every_seconds: Some(every_seconds),
        crontab: None,
        enabled: true,
    }
}

fn crontab(
    name: &str,
    task: &str,
    queue: &str,
    hour: u32,
    minute: u32,
    days: Option<&[&str]>,
) -> ScheduleEntryConfig {
    ScheduleEntryConfig {
        name: name.to_string(),
        task: task.to_string(),
        queue: Some(queue.to_string()),
        every_seconds: None,
        crontab: Some(CrontabConfig {
            hour,
            minute,
            days: days.map(|d| d.iter().map(|s| s.to_string()).collect()),
        }),
        enabled: true,
    }
}

const TRADING_DAYS: &[&str] = &["sun", "mon", "tue", "wed", "thu"];

/// 間隔排程最長一年
const MAX_INTERVAL_SECONDS: u64 = 366 * 24 * 3600;

pub fn default_schedule() -> Vec<ScheduleEntryConfig> {
    vec![
        interval("scrape-every-30-minutes", "scrape_market_data", QUEUE_SCRAPING, 1800),
        crontab("market-opening-10-55-am", "market_opening", QUEUE_SCRAPING, 10, 55, Some(TRADING_DAYS)),
        crontab("force-closing-data-3-30-pm", "force_closing_data", QUEUE_SCRAPING, 15, 30, Some(TRADING_DAYS)),
        crontab("daily-maintenance-midnight", "daily_maintenance", QUEUE_MAINTENANCE, 0, 0, None),
        crontab("fill-missing-data-saturday", "fill_missing_data", QUEUE_MAINTENANCE, 10, 0, Some(&["sat"])),
        crontab("backup-report-sunday", "backup_historical_data", QUEUE_MAINTENANCE, 9, 0, Some(&["sun"])),
        interval("health-check-hourly", "health_check", QUEUE_MAINTENANCE, 3600),
        interval("quick-test-hourly", "test_scraping_pipeline", QUEUE_TESTING, 3600),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub retention_days: i64,
    pub task_history_days: i64,
    pub fill_missing_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            retention_days: 365,
            task_history_days: 7,
            fill_missing_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_path: String,
    /// 備份包含最近幾天的股價資料
    pub backup_days: i64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_path: "./backups".to_string(),
            backup_days: 30,
        }
    }
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ScraperError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 檔案存在就載入，不存在就使用預設值
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(
                "Config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| ScraperError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DATABASE_URL})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("database.url", &self.database.url)?;
        validate_positive_number(
            "database.max_connections",
            self.database.max_connections as u64,
            1,
        )?;

        validate_url("sources.nepse_api.base_url", &self.sources.nepse_api.base_url)?;
        validate_url("sources.merolagani.base_url", &self.sources.merolagani.base_url)?;
        validate_positive_number("sources.timeout_seconds", self.sources.timeout_seconds, 1)?;
        validate_positive_number(
            "sources.retry_attempts",
            self.sources.retry_attempts as u64,
            1,
        )?;
        if self.sources.user_agents.is_empty() {
            return Err(ScraperError::MissingConfigError {
                field: "sources.user_agents".to_string(),
            });
        }
        for source in &self.sources.order {
            if !matches!(source.as_str(), "nepse_api" | "merolagani") {
                return Err(ScraperError::InvalidConfigValueError {
                    field: "sources.order".to_string(),
                    value: source.clone(),
                    reason: "Valid sources: nepse_api, merolagani".to_string(),
                });
            }
        }

        let open = parse_clock_time("market.open", &self.market.open)?;
        let close = parse_clock_time("market.close", &self.market.close)?;
        if open >= close {
            return Err(ScraperError::ConfigValidationError {
                field: "market.close".to_string(),
                message: "Market close must be after market open".to_string(),
            });
        }
        parse_clock_time("market.closing_window_start", &self.market.closing_window_start)?;
        parse_clock_time("market.closing_window_end", &self.market.closing_window_end)?;
        parse_clock_time("market.closing_snapshot_time", &self.market.closing_snapshot_time)?;
        parse_clock_time(
            "market.historical_snapshot_time",
            &self.market.historical_snapshot_time,
        )?;
        validate_range("market.post_close_grace_hours", self.market.post_close_grace_hours, 0, 24)?;
        validate_range("market.company_refresh_hours", self.market.company_refresh_hours, 0, 24 * 7)?;

        validate_positive_number("worker.concurrency", self.worker.concurrency as u64, 1)?;
        validate_range("worker.time_limit_seconds", self.worker.time_limit_seconds, 1, 86_400)?;
        validate_range("worker.retry_delay_seconds", self.worker.retry_delay_seconds, 0, 86_400)?;
        validate_positive_number("beat.tick_seconds", self.beat.tick_seconds, 1)?;
        for queue in &self.worker.queues {
            validate_queue_name("worker.queues", queue)?;
        }

        for entry in &self.beat.schedule {
            validate_non_empty_string("beat.schedule.name", &entry.name)?;
            if let Some(queue) = &entry.queue {
                validate_queue_name("beat.schedule.queue", queue)?;
            }
            match (&entry.every_seconds, &entry.crontab) {
                (Some(every), None) => {
                    validate_range("beat.schedule.every_seconds", *every, 1, MAX_INTERVAL_SECONDS)?
                }
                (None, Some(cron)) => {
                    validate_range("beat.schedule.crontab.hour", cron.hour, 0, 23)?;
                    validate_range("beat.schedule.crontab.minute", cron.minute, 0, 59)?;
                }
                _ => {
                    return Err(ScraperError::ConfigValidationError {
                        field: format!("beat.schedule.{}", entry.name),
                        message: "Exactly one of every_seconds or crontab must be set".to_string(),
                    })
                }
            }
        }

        validate_range("maintenance.retention_days", self.maintenance.retention_days, 1, 36500)?;
        validate_range("maintenance.task_history_days", self.maintenance.task_history_days, 0, 36500)?;
        validate_range("maintenance.fill_missing_days", self.maintenance.fill_missing_days, 1, 366)?;
        validate_range("export.backup_days", self.export.backup_days, 1, 36500)?;
        validate_path("export.output_path", &self.export.output_path)?;

        Ok(())
    }
}

pub fn validate_queue_name(field: &str, queue: &str) -> Result<()> {
    match queue {
        QUEUE_SCRAPING | QUEUE_MAINTENANCE | QUEUE_TESTING => Ok(()),
        other => Err(ScraperError::InvalidConfigValueError {
            field: field.to_string(),
            value: other.to_string(),
            reason: format!(
                "Valid queues: {}, {}, {}",
                QUEUE_SCRAPING, QUEUE_MAINTENANCE, QUEUE_TESTING
            ),
        }),
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();

        assert_eq!(config.database.url, "sqlite://nepse.db");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.market.open, "11:00");
        assert_eq!(config.worker.queues.len(), 3);
        assert_eq!(config.beat.schedule.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
[database]
url = "sqlite://test.db"

[server]
port = 9000
cron_secret = "s3cret"

[sources]
order = ["merolagani"]
allow_sample_data = true

[[beat.schedule]]
name = "scrape-fast"
task = "scrape_market_data"
queue = "scraping"
every_seconds = 300

[[beat.schedule]]
name = "closing"
task = "force_closing_data"
crontab = { hour = 15, minute = 30, days = ["sun", "mon"] }
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.database.url, "sqlite://test.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.sources.order, vec!["merolagani"]);
        assert_eq!(config.sources.retry_attempts, 3);
        assert_eq!(config.beat.schedule.len(), 2);
        assert_eq!(config.beat.schedule[0].every_seconds, Some(300));
        assert!(config.beat.schedule[1].enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("NEPSE_TEST_DB_URL", "sqlite://from-env.db");

        let toml_content = r#"
[database]
url = "${NEPSE_TEST_DB_URL}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.database.url, "sqlite://from-env.db");

        std::env::remove_var("NEPSE_TEST_DB_URL");
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::from_toml_str(
            r#"
[sources.nepse_api]
base_url = "invalid-url"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_toml_str(
            r#"
[market]
open = "15:00"
close = "11:00"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_toml_str(
            r#"
[worker]
queues = ["scraping", "celery"]
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_out_of_range_are_rejected() {
        for snippet in [
            "[maintenance]\ntask_history_days = 200000000",
            "[maintenance]\ntask_history_days = -1",
            "[maintenance]\nfill_missing_days = 0",
            "[export]\nbackup_days = 9999999999",
            "[worker]\nretry_delay_seconds = -60",
            "[worker]\ntime_limit_seconds = 99999999",
            "[[beat.schedule]]\nname = \"huge\"\ntask = \"health_check\"\nevery_seconds = 99999999999",
        ] {
            let config = AppConfig::from_toml_str(snippet).unwrap();
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, ScraperError::InvalidConfigValueError { .. }),
                "{}: {:?}",
                snippet,
                err
            );
        }
    }

    #[test]
    fn test_schedule_entry_needs_exactly_one_trigger() {
        let config = AppConfig::from_toml_str(
            r#"
[[beat.schedule]]
name = "broken"
task = "health_check"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[server]\nhost = \"127.0.0.1\"\n")
            .unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");

        let missing = AppConfig::load_or_default("/definitely/not/here.toml").unwrap();
        assert_eq!(missing.server.host, "0.0.0.0");
    }
}
