//! Configuration file handling for converge.
//!
//! Looks for `.config/converge.styx` in the current directory or any parent
//! directory. Environment variables override the file, and command-line flags
//! override both.

use camino::{Utf8Path, Utf8PathBuf};
use converge::ReconcileOptions;
use facet::Facet;
use std::time::Duration;

/// Contents of `.config/converge.styx`. Every field is optional.
#[derive(Debug, Clone, Default, Facet)]
pub struct Config {
    /// Database connection URL
    #[facet(default)]
    pub database_url: Option<String>,

    /// Hold the schema lock during reconciliation (default: true)
    #[facet(default)]
    pub lock: Option<bool>,

    /// Seconds to wait for the schema lock (default: 30)
    #[facet(default)]
    pub lock_timeout_secs: Option<u64>,

    /// Re-checks after losing a table creation race (default: 1)
    #[facet(default)]
    pub create_retries: Option<u32>,

    /// Plan without executing (default: false)
    #[facet(default)]
    pub dry_run: Option<bool>,
}

/// Load configuration from `.config/converge.styx`, searching up the directory tree.
pub fn load() -> Result<(Config, Utf8PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    let cwd = Utf8PathBuf::try_from(cwd).map_err(|e| ConfigError::Io(e.to_string()))?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
pub fn load_from(start: &Utf8Path) -> Result<(Config, Utf8PathBuf), ConfigError> {
    let config_path = find_config_file(start)?;
    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;

    let config: Config =
        facet_styx::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    Ok((config, config_path))
}

/// Find `.config/converge.styx` by searching up the directory tree.
fn find_config_file(start: &Utf8Path) -> Result<Utf8PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".config/converge.styx");
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// No `.config/converge.styx` found in any parent directory
    NotFound,
    /// I/O error reading the file
    Io(String),
    /// Parse error in the Styx file
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound => {
                write!(
                    f,
                    "No .config/converge.styx found in current directory or any parent"
                )
            }
            ConfigError::Io(e) => write!(f, "Failed to read .config/converge.styx: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse .config/converge.styx: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub dry_run: bool,
    pub no_lock: bool,
}

/// Everything a run needs, after layering file, environment and flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub options: ReconcileOptions,
}

impl Settings {
    /// Layer `config`, the environment (read through `env`) and `flags`.
    ///
    /// The database URL comes from the first of: `--database-url`,
    /// `DATABASE_URL`, the profile URL (`PROD_DATABASE_URL` when
    /// `DEPLOYMENT_MODE=production`, `DEV_DATABASE_URL` otherwise), the file.
    pub fn resolve(
        config: &Config,
        flags: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let profile_url = || {
            let production = env("DEPLOYMENT_MODE").is_some_and(|m| m == "production");
            env(if production {
                "PROD_DATABASE_URL"
            } else {
                "DEV_DATABASE_URL"
            })
        };

        let database_url = flags
            .database_url
            .clone()
            .or_else(|| env("DATABASE_URL"))
            .or_else(profile_url)
            .or_else(|| config.database_url.clone());

        let defaults = ReconcileOptions::default();
        let options = ReconcileOptions {
            dry_run: flags.dry_run || config.dry_run.unwrap_or(defaults.dry_run),
            lock: !flags.no_lock && config.lock.unwrap_or(defaults.lock),
            lock_timeout: config
                .lock_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            create_retries: config.create_retries.unwrap_or(defaults.create_retries),
            ..defaults
        };

        Self {
            database_url,
            options,
        }
    }
}
