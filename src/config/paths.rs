//! Path management for envelope-exchange
//!
//! ## Path Resolution Order
//!
//! 1. `ENVELOPE_EXCHANGE_DIR` environment variable (if set)
//! 2. The platform config directory from `directories::ProjectDirs`
//!    (`~/.config/envelope-exchange` on Linux)

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::ExchangeError;

/// Environment variable overriding the base directory
pub const DIR_ENV_VAR: &str = "ENVELOPE_EXCHANGE_DIR";

/// Manages all paths used by envelope-exchange
#[derive(Debug, Clone)]
pub struct ExchangePaths {
    base_dir: PathBuf,
}

impl ExchangePaths {
    /// Resolve the base directory from the environment or the platform
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, ExchangeError> {
        let base_dir = match std::env::var(DIR_ENV_VAR) {
            Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };
        Ok(Self { base_dir })
    }

    /// Use a specific base directory (tests, `--data-dir`)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Directory holding the JSON state files
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Directory holding export files
    pub fn artifacts_dir(&self) -> PathBuf {
        self.base_dir.join("artifacts")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.base_dir.join("audit.log")
    }

    /// Operation registry
    pub fn operations_file(&self) -> PathBuf {
        self.data_dir().join("operations.json")
    }

    /// Artifact metadata index
    pub fn artifacts_index(&self) -> PathBuf {
        self.data_dir().join("artifacts.json")
    }

    /// Bundled record store
    pub fn records_file(&self) -> PathBuf {
        self.data_dir().join("records.json")
    }

    /// Create the base, data and artifacts directories
    pub fn ensure_directories(&self) -> Result<(), ExchangeError> {
        for dir in [self.base_dir.clone(), self.data_dir(), self.artifacts_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                ExchangeError::Io(format!("Failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

fn resolve_default_path() -> Result<PathBuf, ExchangeError> {
    ProjectDirs::from("", "", "envelope-exchange")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| ExchangeError::Config("Could not determine a home directory".into()))
}
