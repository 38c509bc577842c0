// Application layer: wiring shared by the process roles.

pub mod context;

pub use context::AppContext;
