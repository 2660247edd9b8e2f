//! Configuration module for envelope-exchange
//!
//! - Base directory resolution and derived file paths
//! - Persisted job, retention and logging settings

pub mod paths;
pub mod settings;

pub use paths::ExchangePaths;
pub use settings::{JobSettings, LoggingSettings, RetentionSettings, Settings};
