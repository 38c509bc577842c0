use crate::utils::logger::LogFormat;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "nepse-scraper")]
#[command(about = "NEPSE market data scraper: web API, task worker and periodic scheduler")]
pub struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, env = "NEPSE_CONFIG", default_value = "nepse-scraper.toml")]
    pub config: String,

    /// Override database.url from the config file
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long, value_enum, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Serve the JSON API
    Web {
        #[arg(long)]
        host: Option<String>,

        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
    /// Consume tasks from the given queues
    Worker {
        #[arg(long, value_delimiter = ',')]
        queues: Option<Vec<String>>,

        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Enqueue periodic tasks when they are due
    Beat,
    /// Apply database migrations (release phase)
    Release,
    /// Migrate, then run a first scrape when the database is empty
    Init,
    /// Run one scrape in the foreground
    Scrape,
    /// Put a single task on its queue
    Enqueue {
        task: String,

        #[arg(long)]
        queue: Option<String>,
    },
}
