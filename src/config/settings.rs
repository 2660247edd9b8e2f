//! Settings for envelope-exchange
//!
//! Job limits, retention policy and logging preferences, stored as
//! `config.json` in the base directory. Every field has a default so older
//! or partial files keep loading.

use serde::{Deserialize, Serialize};

use super::paths::ExchangePaths;
use crate::error::ExchangeError;
use crate::models::OperationKind;

/// Overrides the batch size from the settings file
pub const BATCH_SIZE_ENV_VAR: &str = "ENVELOPE_EXCHANGE_BATCH_SIZE";
/// Overrides both concurrency limits from the settings file
pub const MAX_CONCURRENT_ENV_VAR: &str = "ENVELOPE_EXCHANGE_MAX_CONCURRENT";

const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 10_000;

/// Worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    /// Records per batch; also bounds cancellation latency
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// In-flight exports allowed per user
    #[serde(default = "default_max_concurrent_exports")]
    pub max_concurrent_exports: usize,

    /// In-flight imports allowed per user
    #[serde(default = "default_max_concurrent_imports")]
    pub max_concurrent_imports: usize,
}

fn default_batch_size() -> usize {
    250
}

fn default_max_concurrent_exports() -> usize {
    3
}

fn default_max_concurrent_imports() -> usize {
    2
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_exports: default_max_concurrent_exports(),
            max_concurrent_imports: default_max_concurrent_imports(),
        }
    }
}

impl JobSettings {
    /// Batch size clamped to a sane range
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }

    pub fn limit_for(&self, kind: OperationKind) -> usize {
        match kind {
            OperationKind::Export => self.max_concurrent_exports,
            OperationKind::Import => self.max_concurrent_imports,
        }
    }
}

/// Retention policy for artifacts and finished operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_artifact_ttl_hours")]
    pub artifact_ttl_hours: i64,

    #[serde(default = "default_operation_ttl_days")]
    pub operation_ttl_days: i64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_artifact_ttl_hours() -> i64 {
    24
}

fn default_operation_ttl_days() -> i64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            artifact_ttl_hours: default_artifact_ttl_hours(),
            operation_ttl_days: default_operation_ttl_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RetentionSettings {
    pub fn artifact_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.artifact_ttl_hours.max(0))
    }

    pub fn operation_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.operation_ttl_days.max(0))
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Log output preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Settings for envelope-exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub jobs: JobSettings,

    #[serde(default)]
    pub retention: RetentionSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            jobs: JobSettings::default(),
            retention: RetentionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or defaults if the file doesn't exist.
    /// Environment overrides are applied either way.
    pub fn load_or_create(paths: &ExchangePaths) -> Result<Self, ExchangeError> {
        let settings_path = paths.settings_file();

        let mut settings = if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                ExchangeError::Io(format!("Failed to read settings file: {}", e))
            })?;

            serde_json::from_str(&contents).map_err(|e| {
                ExchangeError::Config(format!("Failed to parse settings file: {}", e))
            })?
        } else {
            // Don't save yet - let caller decide when to persist
            Settings::default()
        };

        settings.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ExchangeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(BATCH_SIZE_ENV_VAR) {
            self.jobs.batch_size = parse_count(BATCH_SIZE_ENV_VAR, &value)?;
        }
        if let Some(value) = lookup(MAX_CONCURRENT_ENV_VAR) {
            let limit = parse_count(MAX_CONCURRENT_ENV_VAR, &value)?;
            self.jobs.max_concurrent_exports = limit;
            self.jobs.max_concurrent_imports = limit;
        }
        Ok(())
    }

    /// Save settings to disk
    pub fn save(&self, paths: &ExchangePaths) -> Result<(), ExchangeError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            ExchangeError::Config(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(paths.settings_file(), contents).map_err(|e| {
            ExchangeError::Io(format!("Failed to write settings file: {}", e))
        })?;

        Ok(())
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize, ExchangeError> {
    value
        .trim()
        .parse()
        .map_err(|_| ExchangeError::Config(format!("{} must be a whole number, got '{}'", name, value)))
}
