//! Configuration Loader
//!
//! Environment-aware loading on top of the `config` crate. Sources are
//! layered lowest-priority first:
//!
//! 1. [`RelayConfig::default`]
//! 2. `DATABASE_URL`, if set
//! 3. `<dir>/dbchange-relay.toml` and `<dir>/dbchange-relay.<env>.toml`
//!    (both optional), or one explicit file (required)
//! 4. `DBRELAY__SECTION__KEY` environment variables
//!
//! Loading does not validate. Callers apply their own overrides (CLI flags)
//! and then call [`RelayConfig::validate`]; [`crate::Relay::new`] does so
//! too.

use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::RelayConfig;
use crate::error::Result;

/// File stem shared by the base and per-environment config files
const CONFIG_FILE_STEM: &str = "dbchange-relay";

/// Where and how to look for configuration
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Explicit file; replaces the directory lookup when set
    pub config_file: Option<PathBuf>,
    pub config_dir: PathBuf,
    pub environment: String,
    /// Prefix for override variables, without the trailing separator
    pub env_prefix: String,
    /// Variable holding the fallback connection string
    pub database_url_var: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            config_file: None,
            config_dir: PathBuf::from("config"),
            environment: ConfigManager::detect_environment(),
            env_prefix: "DBRELAY".to_string(),
            database_url_var: "DATABASE_URL".to_string(),
        }
    }
}

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: RelayConfig,
    environment: String,
    sources: Vec<String>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> Result<Self> {
        Self::load_with(LoadOptions::default())
    }

    /// Load configuration with explicit options
    pub fn load_with(options: LoadOptions) -> Result<Self> {
        let mut sources = vec!["defaults".to_string()];
        let mut builder = Config::builder().add_source(Config::try_from(&RelayConfig::default())?);

        if let Ok(url) = env::var(&options.database_url_var) {
            if !url.is_empty() {
                builder = builder.add_source(
                    Config::builder()
                        .set_override("database.url", url)?
                        .build()?,
                );
                sources.push(options.database_url_var.clone());
            }
        }

        match &options.config_file {
            Some(path) => {
                builder = builder.add_source(
                    File::from(path.as_path())
                        .format(FileFormat::Toml)
                        .required(true),
                );
                sources.push(path.display().to_string());
            }
            None => {
                for path in Self::candidate_files(&options.config_dir, &options.environment) {
                    if path.is_file() {
                        sources.push(path.display().to_string());
                    }
                    builder = builder.add_source(
                        File::from(path.as_path())
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(&options.env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RelayConfig = builder.build()?.try_deserialize()?;

        debug!(?config, "Configuration resolved");
        info!(
            environment = %options.environment,
            sources = ?sources,
            database = %config.database.sanitized_url(),
            endpoint = %config.forwarder.endpoint,
            channel = %config.listener.channel,
            workers = config.workers.count,
            "Configuration loaded successfully"
        );

        Ok(Self {
            config,
            environment: options.environment,
            sources,
        })
    }

    /// Detect the environment name
    pub fn detect_environment() -> String {
        env::var("DBRELAY_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn candidate_files(dir: &Path, environment: &str) -> [PathBuf; 2] {
        [
            dir.join(format!("{CONFIG_FILE_STEM}.toml")),
            dir.join(format!("{CONFIG_FILE_STEM}.{environment}.toml")),
        ]
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn into_config(self) -> RelayConfig {
        self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Sources that contributed, lowest priority first
    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::OverflowPolicy;
    use std::fs;

    fn options(dir: &Path, environment: &str, prefix: &str) -> LoadOptions {
        LoadOptions {
            config_file: None,
            config_dir: dir.to_path_buf(),
            environment: environment.to_string(),
            env_prefix: prefix.to_string(),
            database_url_var: format!("{prefix}_DATABASE_URL"),
        }
    }

    #[test]
    fn test_defaults_when_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_with(options(dir.path(), "test", "DBRELAY_T_NONE")).unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().workers.count, 4);
        assert_eq!(manager.config().listener.channel, "eave_dbchange_channel");
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("dbchange-relay.toml"),
            r#"
[workers]
count = 2

[mailbox]
capacity = 100
overflow_policy = "drop_oldest"

[forwarder]
endpoint = "https://collector.example.com/base"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("dbchange-relay.production.toml"),
            r#"
[forwarder]
endpoint = "https://collector.example.com/prod"
fail_on_error_status = true
"#,
        )
        .unwrap();

        let manager =
            ConfigManager::load_with(options(dir.path(), "production", "DBRELAY_T_FILES")).unwrap();
        let config = manager.config();

        assert_eq!(config.workers.count, 2);
        assert_eq!(config.mailbox.capacity, 100);
        assert_eq!(config.mailbox.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.forwarder.endpoint, "https://collector.example.com/prod");
        assert!(config.forwarder.fail_on_error_status);
        assert_eq!(manager.sources().len(), 3);
    }

    #[test]
    fn test_environment_variables_override_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("dbchange-relay.toml"),
            "[workers]\ncount = 2\n",
        )
        .unwrap();

        env::set_var("DBRELAY_T_ENV__WORKERS__COUNT", "7");
        env::set_var("DBRELAY_T_ENV__LISTENER__CHANNEL", "orders_changes");
        let result = ConfigManager::load_with(options(dir.path(), "test", "DBRELAY_T_ENV"));
        env::remove_var("DBRELAY_T_ENV__WORKERS__COUNT");
        env::remove_var("DBRELAY_T_ENV__LISTENER__CHANNEL");

        let config = result.unwrap().into_config();
        assert_eq!(config.workers.count, 7);
        assert_eq!(config.listener.channel, "orders_changes");
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), "test", "DBRELAY_T_MISSING");
        opts.config_file = Some(dir.path().join("missing.toml"));

        assert!(ConfigManager::load_with(opts).is_err());
    }

    #[test]
    fn test_invalid_values_load_but_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(&path, "[workers]\ncount = 0\n").unwrap();

        let mut opts = options(dir.path(), "test", "DBRELAY_T_INVALID");
        opts.config_file = Some(path);

        // Left to the caller so later overrides can still correct it
        let mut config = ConfigManager::load_with(opts).unwrap().into_config();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.count"));

        config.workers.count = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_url_fallback_with_shipped_config() {
        let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        let opts = options(&shipped, "development", "DBRELAY_T_SHIPPED");

        env::set_var(&opts.database_url_var, "postgresql://relay@db.internal:5432/app");
        let result = ConfigManager::load_with(opts);
        env::remove_var("DBRELAY_T_SHIPPED_DATABASE_URL");

        let manager = result.unwrap();
        assert_eq!(
            manager.config().database.url,
            "postgresql://relay@db.internal:5432/app"
        );
        assert!(manager.config().validate().is_ok());
    }

    #[test]
    fn test_files_override_database_url_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("dbchange-relay.toml"),
            "[database]\nurl = \"postgresql://from-file:5432/app\"\n",
        )
        .unwrap();
        let opts = options(dir.path(), "test", "DBRELAY_T_URLFILE");

        env::set_var(&opts.database_url_var, "postgresql://from-env:5432/app");
        let result = ConfigManager::load_with(opts);
        env::remove_var("DBRELAY_T_URLFILE_DATABASE_URL");

        assert_eq!(
            result.unwrap().config().database.url,
            "postgresql://from-file:5432/app"
        );
    }
}
