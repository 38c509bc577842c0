pub mod adapters;
pub mod api;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod tasks;
pub mod utils;

pub use adapters::{Database, LocalStorage, SourceChain};
pub use app::AppContext;
pub use config::{AppConfig, Cli, Command};
pub use core::processor::DataProcessor;
pub use tasks::{Beat, TaskBroker, TaskKind, Worker};
pub use utils::error::{Result, ScraperError};
