//! Configuration Loader
//!
//! Environment-aware loading: `base.toml`, then `{environment}.toml`, then
//! `COMMANDER__SECTION__FIELD` environment variables. Every layer is optional;
//! anything left unset falls back to the `Default` values of the config structs.
//! Fails fast on malformed input or values that do not pass validation.

use super::error::{ConfigResult, ConfigurationError};
use super::CommanderConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENVIRONMENT_VARIABLE: &str = "COMMANDER_ENV";
const ENV_PREFIX: &str = "COMMANDER";
const ENV_SEPARATOR: &str = "__";

/// Loaded configuration plus the environment it was resolved for
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: CommanderConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from the default directory
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_for_environment(Self::default_config_directory(), &Self::detect_environment())
    }

    /// Load configuration from a directory with an explicit environment
    ///
    /// Useful in tests since it does not depend on `COMMANDER_ENV`.
    pub fn load_for_environment(
        config_directory: impl AsRef<Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_directory.as_ref().to_path_buf();
        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading commander configuration"
        );

        let merged = Config::builder()
            .add_source(File::from(config_directory.join("base.toml")).required(false))
            .add_source(
                File::from(config_directory.join(format!("{environment}.toml"))).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::LoadFailed {
                environment: environment.to_string(),
                error: e.to_string(),
            })?;

        let config: CommanderConfig =
            merged
                .try_deserialize()
                .map_err(|e| ConfigurationError::DeserializationFailed {
                    error: e.to_string(),
                })?;

        config.validate()?;

        info!(
            environment = %environment,
            table = %config.storage.table_name,
            queue = %config.queue.queue_name,
            "✅ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding applications)
    pub fn from_config(config: CommanderConfig, environment: impl Into<String>) -> Self {
        Self {
            config,
            environment: environment.into(),
            config_directory: Self::default_config_directory(),
        }
    }

    pub fn config(&self) -> &CommanderConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Current environment from `COMMANDER_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        env::var(ENVIRONMENT_VARIABLE).unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("COMMANDER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config").join("commander"))
    }
}
