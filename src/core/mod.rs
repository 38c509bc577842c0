pub mod export;
pub mod processor;

pub use export::{export_backup, BackupReport};
pub use processor::{CompanyRefresh, DataProcessor};
