// Public modules
pub mod build;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod health;
pub mod lifecycle;
pub mod service;
pub mod ssh;
pub mod task;
pub mod test_runner;

// Re-export common types for convenience
pub use context::{Context, Stage};
pub use error::{Error, ErrorCode, Result};
pub use executor::{Executor, LocalCommand, Policy, Privilege, RemoteCommand, Runner};
pub use task::Task;
