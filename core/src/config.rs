use std::{
    env,
    fs::File,
    io::Read,
    path::Path,
    time::Duration,
};

use dotenv::dotenv;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::error;

fn default_batch_size() -> usize {
    10_000
}

fn default_pool_max_size() -> u32 {
    10
}

fn default_cache_max_capacity() -> u64 {
    1_000
}

fn default_cache_time_to_live_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCacheConfig {
    #[serde(default = "default_cache_max_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_cache_time_to_live_secs")]
    pub time_to_live_secs: u64,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        SchemaCacheConfig {
            max_capacity: default_cache_max_capacity(),
            time_to_live_secs: default_cache_time_to_live_secs(),
        }
    }
}

impl SchemaCacheConfig {
    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.time_to_live_secs)
    }
}

/// Engine wide defaults. Every value can be overridden per call through the
/// bulk options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSyncConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub use_physical_staging: bool,

    #[serde(default)]
    pub schema_cache: SchemaCacheConfig,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

impl Default for BulkSyncConfig {
    fn default() -> Self {
        BulkSyncConfig {
            database_url: None,
            batch_size: default_batch_size(),
            timeout_secs: None,
            use_physical_staging: false,
            schema_cache: SchemaCacheConfig::default(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl BulkSyncConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// The configured url, else `DATABASE_URL` from the environment or `.env`.
    pub fn resolve_database_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }

        dotenv().ok();
        env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not open file: {0}")]
    CouldNotOpenFile(#[from] std::io::Error),

    #[error("Could not parse config: {0}")]
    CouldNotParseConfig(#[from] serde_yaml::Error),

    #[error("Could not substitute env variables: {0}")]
    CouldNotSubstituteEnvVariables(#[from] regex::Error),

    #[error("Environment variable {0} not found")]
    EnvironmentVariableNotFound(String),

    #[error("No database_url configured and DATABASE_URL is not set")]
    MissingDatabaseUrl,
}

fn substitute_env_variables(contents: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}")?;

    let mut missing = None;
    let result = re.replace_all(contents, |caps: &Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(val) => val,
            Err(_) => {
                error!("Environment variable {} not found", var_name);
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(ConfigError::EnvironmentVariableNotFound(var_name)),
        None => Ok(result.into_owned()),
    }
}

/// Reads a YAML config file, substituting `${VAR}` with environment values.
pub fn read_config(file_path: &Path) -> Result<BulkSyncConfig, ConfigError> {
    dotenv().ok();

    let mut file = File::open(file_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let substituted = substitute_env_variables(&contents)?;
    let config: BulkSyncConfig = serde_yaml::from_str(&substituted)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_apply_to_missing_fields() {
        let config: BulkSyncConfig = serde_yaml::from_str("batch_size: 250").unwrap();
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.pool_max_size, 10);
        assert_eq!(config.schema_cache, SchemaCacheConfig::default());
        assert_eq!(config.timeout(), None);
        assert!(!config.use_physical_staging);
    }

    #[test]
    fn test_read_config_substitutes_environment() {
        env::set_var("BULKSYNC_TEST_DB_URL", "postgres://localhost/bulk");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_url: ${{BULKSYNC_TEST_DB_URL}}\ntimeout_secs: 30\nschema_cache:\n  time_to_live_secs: 5"
        )
        .unwrap();

        let config = read_config(file.path()).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/bulk"));
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.schema_cache.time_to_live(), Duration::from_secs(5));
        assert_eq!(config.schema_cache.max_capacity, 1_000);
        assert_eq!(config.batch_size, 10_000);
    }

    #[test]
    fn test_missing_environment_variable_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database_url: ${{BULKSYNC_TEST_SURELY_UNSET_VARIABLE}}").unwrap();

        match read_config(file.path()) {
            Err(ConfigError::EnvironmentVariableNotFound(name)) => {
                assert_eq!(name, "BULKSYNC_TEST_SURELY_UNSET_VARIABLE")
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
