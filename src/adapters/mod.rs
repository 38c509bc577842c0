// Adapters layer: concrete implementations for external systems
// (SQLite, local storage, upstream HTTP sources).

pub mod chain;
pub mod database;
pub mod html;
pub mod http;
pub mod merolagani;
pub mod nepse_api;
pub mod sample;
pub mod storage;

pub use chain::SourceChain;
pub use database::Database;
pub use storage::LocalStorage;
