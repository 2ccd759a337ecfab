// ⚙️ Configuration - which ledger backing to use and how loud to log
//
// Lookup order: explicit --config path, then visit-ledger.toml or
// .visit-ledger.toml in the working directory, then built-in defaults.
// VISIT_LEDGER_* environment variables override whatever was loaded.

use crate::error::ConfigError;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_LEDGER_PATH: &str = "data/payments.json";
pub const DEFAULT_LOG_LEVEL: &str = "info";

const CONFIG_LOCATIONS: [&str; 2] = ["visit-ledger.toml", ".visit-ledger.toml"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase", deny_unknown_fields)]
pub enum StorageConfig {
    /// JSON array file
    Json { path: PathBuf },

    /// SQLite database file
    Sqlite { path: PathBuf },
}

impl StorageConfig {
    pub fn path(&self) -> &Path {
        match self {
            StorageConfig::Json { path } | StorageConfig::Sqlite { path } => path,
        }
    }

    fn with_path(&self, path: PathBuf) -> Self {
        match self {
            StorageConfig::Json { .. } => StorageConfig::Json { path },
            StorageConfig::Sqlite { .. } => StorageConfig::Sqlite { path },
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Json {
            path: PathBuf::from(DEFAULT_LEDGER_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Parse a config file. Relative storage paths resolve against its directory.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let base_dir = path.parent().map(ToOwned::to_owned).unwrap_or_default();
        if config.storage.path().is_relative() {
            config.storage = config.storage.with_path(base_dir.join(config.storage.path()));
        }

        Ok(config)
    }

    pub fn find_and_load() -> Result<Option<(PathBuf, Self)>, ConfigError> {
        for location in CONFIG_LOCATIONS {
            let path = Path::new(location);
            if path.exists() {
                return Self::load_from_file(path).map(|config| Some((path.to_path_buf(), config)));
            }
        }

        Ok(None)
    }

    /// Load from `explicit`, a default location, or defaults; then apply env overrides.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => Self::find_and_load()?.map(|(_, config)| config).unwrap_or_default(),
        };

        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Apply VISIT_LEDGER_BACKEND / _PATH / _LOG_LEVEL from `var`.
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = var("VISIT_LEDGER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.storage.path().to_path_buf());

        self.storage = match var("VISIT_LEDGER_BACKEND").as_deref() {
            None => self.storage.with_path(path),
            Some("json") => StorageConfig::Json { path },
            Some("sqlite") => StorageConfig::Sqlite { path },
            Some(other) => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        if let Some(level) = var("VISIT_LEDGER_LOG_LEVEL") {
            self.log_level = level;
        }

        Ok(())
    }
}
