/// Configuration system for project-metrics
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::error::{ConfigError, MetricsError};
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// History walk and file selection
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Worker pool sizing and deadlines
    #[serde(default)]
    pub pool: PoolConfig,

    /// Output rendering
    #[serde(default)]
    pub export: ExportConfig,

    /// Diagnostics reporting
    #[serde(default)]
    pub reporting: ReportingConfig,
}

/// History walk and file selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Branch to walk from; HEAD when unset
    #[serde(default)]
    pub branch: Option<String>,

    /// File name suffixes selecting analyzed files (case-insensitive)
    #[serde(default = "default_suffixes")]
    pub suffixes: Vec<String>,

    /// Glob patterns for paths that are never analyzed
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Only export tag references
    #[serde(default)]
    pub tags_only: bool,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker processes
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Per-job deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Watchdog period in milliseconds; half the deadline when unset
    #[serde(default)]
    pub watchdog_period_ms: Option<u64>,

    /// Consecutive failed respawns after which a slot is retired
    #[serde(default = "default_max_spawn_failures")]
    pub max_spawn_failures: u32,
}

/// Output format of the result exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// MySQL INSERT script
    #[default]
    Sql,
    /// Single JSON document
    Json,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExportConfig {
    #[serde(default)]
    pub format: ExportFormat,
}

/// Diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportingConfig {
    /// Interval between memory usage reports; disabled when unset
    #[serde(default)]
    pub memory_interval_secs: Option<u64>,
}

// Default value functions
fn default_suffixes() -> Vec<String> {
    vec![".js".to_string()]
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_spawn_failures() -> u32 {
    3
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            branch: None,
            suffixes: default_suffixes(),
            exclude_patterns: Vec::new(),
            tags_only: false,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            timeout_secs: default_timeout_secs(),
            watchdog_period_ms: None,
            max_spawn_failures: default_max_spawn_failures(),
        }
    }
}

impl PoolConfig {
    /// Per-job deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Watchdog tick period, bounding detection latency to 1.5x the deadline
    pub fn watchdog_period(&self) -> Duration {
        match self.watchdog_period_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.timeout() / 2,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, MetricsError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location or fall back to defaults
    pub fn load_or_default() -> Result<Self, MetricsError> {
        let config_path = crate::paths::PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.pool.size == 0 {
            return Err(invalid("pool.size", "must be greater than 0"));
        }

        if self.pool.timeout_secs == 0 {
            return Err(invalid("pool.timeout_secs", "must be greater than 0"));
        }

        if self.pool.watchdog_period_ms == Some(0) {
            return Err(invalid("pool.watchdog_period_ms", "must be greater than 0"));
        }

        if self.pool.max_spawn_failures == 0 {
            return Err(invalid("pool.max_spawn_failures", "must be greater than 0"));
        }

        if self.extraction.suffixes.is_empty() {
            return Err(invalid("extraction.suffixes", "must not be empty"));
        }

        if self.extraction.suffixes.iter().any(|s| s.is_empty()) {
            return Err(invalid(
                "extraction.suffixes",
                "must not contain empty suffixes",
            ));
        }

        for pattern in &self.extraction.exclude_patterns {
            if let Err(e) = Glob::new(pattern) {
                return Err(invalid(
                    "extraction.exclude_patterns",
                    &format!("invalid glob '{}': {}", pattern, e),
                ));
            }
        }

        if self.reporting.memory_interval_secs == Some(0) {
            return Err(invalid(
                "reporting.memory_interval_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(branch) = std::env::var("PROJECT_METRICS_BRANCH")
            && !branch.is_empty()
        {
            self.extraction.branch = Some(branch);
        }

        if let Ok(suffixes) = std::env::var("PROJECT_METRICS_SUFFIXES") {
            let parsed: Vec<String> = suffixes
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.extraction.suffixes = parsed;
            }
        }

        if let Ok(workers) = std::env::var("PROJECT_METRICS_WORKERS")
            && let Ok(size) = workers.parse()
        {
            self.pool.size = size;
        }

        if let Ok(timeout) = std::env::var("PROJECT_METRICS_TIMEOUT_SECS")
            && let Ok(secs) = timeout.parse()
        {
            self.pool.timeout_secs = secs;
        }

        if let Ok(format) = std::env::var("PROJECT_METRICS_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "sql" => self.export.format = ExportFormat::Sql,
                "json" => self.export.format = ExportFormat::Json,
                other => tracing::warn!("Ignoring unknown PROJECT_METRICS_FORMAT '{}'", other),
            }
        }
    }

    /// Load from `path` (or the default location), then apply env overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, MetricsError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::load_or_default()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn invalid(key: &str, reason: &str) -> MetricsError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
