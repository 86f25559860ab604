//! Application configuration.
//!
//! Aggregates the coordinator and demo sections into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod coordinator;

pub use coordinator::{
    CoordinatorConfig, DemoConfig, FinalizeRetryConfig, FirstPhaseRetryConfig,
    DEFAULT_ARCHIVE_CAPACITY, DEFAULT_CALL_TIMEOUT_MS,
};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "DTXN_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "DTXN";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "DTXN_LOG";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transaction coordinator configuration.
    pub coordinator: CoordinatorConfig,
    /// Purchase demo configuration.
    pub demo: DemoConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            coordinator: CoordinatorConfig::for_test(),
            demo: DemoConfig::default(),
        }
    }
}

/// Get the base directory for resolving file references in configs.
///
/// Returns the parent directory of CONFIG_ENV_VAR if set, otherwise current directory.
pub fn config_base_dir() -> std::path::PathBuf {
    if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = std::path::Path::new(&config_path);
        path.parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."))
    } else {
        std::path::PathBuf::from(".")
    }
}
