//! forum/crates/configs/src/lib.rs
//!
//! Runtime configuration for the forum engine.
//!
//! Layers, lowest priority first:
//! 1. built-in defaults
//! 2. an optional TOML file (`forum.toml` unless another path is given)
//! 3. environment variables such as `FORUM__COMMENTS__DELETION=hard`,
//!    after `.env` has been loaded

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, Source};
use domains::{CommentSettings, TagRules};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "forum.toml";
pub const ENV_PREFIX: &str = "FORUM";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForumConfig {
    pub tags: TagRules,
    pub comments: CommentSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl ForumConfig {
    /// Loads and validates the configuration from every layer.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::from_sources(File::from(path).required(false), environment())
    }

    fn from_sources<S>(file: S, env: Environment) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let loaded: ForumConfig = Config::builder()
            .add_source(Config::try_from(&ForumConfig::default())?)
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        debug!(?loaded, "configuration loaded");
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let TagRules {
            min_length,
            max_length,
        } = self.tags;
        if min_length == 0 {
            return Err(ConfigError::Invalid("tags.min_length must be at least 1".into()));
        }
        if min_length > max_length {
            return Err(ConfigError::Invalid(format!(
                "tags.min_length ({min_length}) exceeds tags.max_length ({max_length})"
            )));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level must not be empty".into()));
        }
        Ok(())
    }
}
