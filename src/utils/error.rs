use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Upstream returned HTTP {status} for {url}")]
    UpstreamStatusError { url: String, status: u16 },

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("No market data: {message}")]
    NoDataError { message: String },

    #[error("Unknown task: {name}")]
    UnknownTaskError { name: String },

    #[error("Task '{task}' exceeded its time limit of {seconds}s")]
    TaskTimeoutError { task: String, seconds: u64 },

    #[error("Task '{task}' panicked: {message}")]
    TaskPanicError { task: String, message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Database,
    Configuration,
    Parsing,
    Storage,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ScraperError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError(_) | Self::UpstreamStatusError { .. } | Self::NoDataError { .. } => {
                ErrorCategory::Network
            }
            Self::DatabaseError(_) | Self::MigrationError(_) => ErrorCategory::Database,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::ParseError { .. } | Self::SerializationError(_) | Self::ValidationError { .. } => {
                ErrorCategory::Parsing
            }
            Self::ZipError(_) | Self::CsvError(_) | Self::IoError(_) => ErrorCategory::Storage,
            Self::UnknownTaskError { .. }
            | Self::TaskTimeoutError { .. }
            | Self::TaskPanicError { .. } => ErrorCategory::Task,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Parsing | ErrorCategory::Task => ErrorSeverity::High,
            ErrorCategory::Storage => ErrorSeverity::High,
            ErrorCategory::Configuration | ErrorCategory::Database => ErrorSeverity::Critical,
        }
    }

    /// 暫時性錯誤可以由 worker 重新排程
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_)
            | Self::UpstreamStatusError { .. }
            | Self::NoDataError { .. }
            | Self::TaskTimeoutError { .. } => true,
            Self::DatabaseError(e) => matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)),
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => {
                "Check network connectivity and the upstream source; the scrape will be retried"
            }
            ErrorCategory::Database => {
                "Check DATABASE_URL and run `nepse-scraper release` to apply migrations"
            }
            ErrorCategory::Configuration => "Fix the configuration file or environment variables",
            ErrorCategory::Parsing => "The upstream page or API layout may have changed",
            ErrorCategory::Storage => "Check that the export directory exists and is writable",
            ErrorCategory::Task => "Check the task name and the worker time limit",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::HttpError(_) | Self::UpstreamStatusError { .. } => {
                format!("Could not reach the market data source ({})", self)
            }
            Self::NoDataError { message } => format!("No market data available: {}", message),
            Self::DatabaseError(_) | Self::MigrationError(_) => {
                format!("Database problem: {}", self)
            }
            _ => self.to_string(),
        }
    }

    /// 對應到 CLI 的結束碼
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
