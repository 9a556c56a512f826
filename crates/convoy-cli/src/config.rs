//! Daemon configuration for convoy.
//!
//! The configuration lives at `/etc/convoyd.conf` (TOML) and is read once
//! at process start with a resolution chain: CLI flag > env var > config
//! file > default. The four convergence parameters are validated against
//! their documented ranges; a violation aborts startup with a message
//! naming the parameter and the valid range.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use convoy_core::convergence::ConvergeConfig;
use convoy_db::config::DbConfig;

/// The default configuration file location.
pub const DEFAULT_CONF_PATH: &str = "/etc/convoyd.conf";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub puppet: PuppetSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// SQLite database file path.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModelSection {
    /// Persisted model store path (JSON).
    pub path: Option<PathBuf>,
}

/// The four convergence parameters; absent keys fall back to defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PuppetSection {
    pub puppet_phase_timeout: Option<i64>,
    pub puppet_poll_frequency: Option<i64>,
    pub puppet_poll_count: Option<i64>,
    pub puppet_mco_timeout: Option<i64>,
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ConvoyConfig {
    pub db_config: DbConfig,
    pub model_path: PathBuf,
    pub converge: ConvergeConfig,
}

impl ConvoyConfig {
    /// Resolve and validate the configuration.
    ///
    /// Config file path: `cli_conf` > `CONVOY_CONF` env > `/etc/convoyd.conf`.
    /// A missing file is only an error when the path was given explicitly;
    /// the default location is allowed to be absent (all defaults apply).
    pub fn resolve(cli_conf: Option<&Path>, cli_db_path: Option<&Path>) -> Result<Self> {
        let env_conf = std::env::var("CONVOY_CONF").ok().map(PathBuf::from);
        let explicit = cli_conf.map(Path::to_path_buf).or(env_conf);

        let conf_path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONF_PATH));

        let file = if conf_path.exists() {
            let contents = std::fs::read_to_string(&conf_path)
                .with_context(|| format!("failed to read config file at {}", conf_path.display()))?;
            toml::from_str::<ConfigFile>(&contents)
                .with_context(|| format!("failed to parse config file at {}", conf_path.display()))?
        } else if explicit.is_some() {
            bail!("config file not found at {}", conf_path.display());
        } else {
            ConfigFile::default()
        };

        let defaults = ConvergeConfig::default();
        let converge = ConvergeConfig {
            puppet_phase_timeout: file
                .puppet
                .puppet_phase_timeout
                .unwrap_or(defaults.puppet_phase_timeout),
            puppet_poll_frequency: file
                .puppet
                .puppet_poll_frequency
                .unwrap_or(defaults.puppet_poll_frequency),
            puppet_poll_count: file
                .puppet
                .puppet_poll_count
                .unwrap_or(defaults.puppet_poll_count),
            puppet_mco_timeout: file
                .puppet
                .puppet_mco_timeout
                .unwrap_or(defaults.puppet_mco_timeout),
        };

        // The service must not start with an out-of-range parameter.
        if let Err(validation) = converge.validate(&conf_path.display().to_string()) {
            bail!("{validation}");
        }

        // DB path resolution: CLI flag > env var > config file > default.
        let db_config = if let Some(path) = cli_db_path {
            DbConfig::new(path)
        } else if let Ok(path) = std::env::var("CONVOY_DATABASE_PATH") {
            DbConfig::new(path)
        } else if let Some(path) = file.database.path {
            DbConfig::new(path)
        } else {
            DbConfig::from_env()
        };

        let model_path = file.model.path.unwrap_or_else(|| {
            db_config
                .database_path
                .parent()
                .map(|dir| dir.join("model.json"))
                .unwrap_or_else(|| PathBuf::from("model.json"))
        });

        Ok(Self {
            db_config,
            model_path,
            converge,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn write_conf(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("convoyd.conf");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_when_file_has_no_puppet_section() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_conf(&dir, "[database]\npath = \"/tmp/convoy.db\"\n");

        let config = ConvoyConfig::resolve(Some(&path), None).unwrap();
        assert_eq!(config.converge, ConvergeConfig::default());
        assert_eq!(config.db_config.database_path, PathBuf::from("/tmp/convoy.db"));
        assert_eq!(config.model_path, PathBuf::from("/tmp/model.json"));
    }

    #[test]
    fn cli_db_path_overrides_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_conf(&dir, "[database]\npath = \"/tmp/from-file.db\"\n");

        let config =
            ConvoyConfig::resolve(Some(&path), Some(Path::new("/tmp/from-cli.db"))).unwrap();
        assert_eq!(
            config.db_config.database_path,
            PathBuf::from("/tmp/from-cli.db")
        );
    }

    #[test]
    fn out_of_range_poll_count_refuses_startup() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_conf(&dir, "[puppet]\npuppet_poll_count = 1001\n");

        let err = ConvoyConfig::resolve(Some(&path), None).unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("Incorrect \"puppet_poll_count\" value specified in"),
            "unexpected error: {msg}"
        );
        assert!(msg.contains("within a range [1, 1000]"));
        assert!(msg.contains(path.display().to_string().as_str()));
    }

    #[test]
    fn negative_mco_timeout_refuses_startup() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_conf(&dir, "[puppet]\npuppet_mco_timeout = -1\n");

        let err = ConvoyConfig::resolve(Some(&path), None).unwrap_err();
        assert!(err.to_string().contains("within a range [300, 900]"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConvoyConfig::resolve(Some(Path::new("/nonexistent/convoyd.conf")), None)
            .unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn poll_frequency_zero_is_accepted() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_conf(&dir, "[puppet]\npuppet_poll_frequency = 0\n");

        let config = ConvoyConfig::resolve(Some(&path), None).unwrap();
        assert_eq!(config.converge.puppet_poll_frequency, 0);
    }
}
