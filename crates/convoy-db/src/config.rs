use std::env;
use std::path::PathBuf;

/// Database configuration.
///
/// Reads from the `CONVOY_DATABASE_PATH` environment variable, falling back
/// to a per-user data directory when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Filesystem path of the SQLite database file.
    pub database_path: PathBuf,
}

impl DbConfig {
    /// Build a config from the environment.
    ///
    /// Priority: `CONVOY_DATABASE_PATH` env var, then
    /// `<data dir>/convoy/convoyd.db`.
    pub fn from_env() -> Self {
        let database_path = env::var("CONVOY_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        Self { database_path }
    }

    /// Build a config from an explicit path (useful for tests and CLI flags).
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    /// The default database location: `$XDG_DATA_HOME/convoy/convoyd.db` or
    /// `~/.local/share/convoy/convoyd.db`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("convoy")
            .join("convoyd.db")
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_new() {
        let cfg = DbConfig::new("/tmp/convoy-test.db");
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/convoy-test.db"));
    }

    #[test]
    fn default_path_ends_with_db_file() {
        let path = DbConfig::default_path();
        assert!(
            path.ends_with("convoy/convoyd.db"),
            "unexpected default path: {}",
            path.display()
        );
    }
}
