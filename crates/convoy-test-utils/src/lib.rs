//! Shared test utilities for convoy integration tests.
//!
//! Each test gets its own SQLite database file in a temporary directory with
//! all migrations applied. The [`TestDb`] guard keeps the directory alive for
//! the duration of the test; dropping it removes the database.

use sqlx::SqlitePool;
use tempfile::TempDir;

use convoy_db::config::DbConfig;
use convoy_db::pool;

/// A temporary database with migrations applied.
///
/// Holds the backing [`TempDir`] so the file outlives the pool. Tests that
/// exercise restart recovery can call [`TestDb::reopen`] to simulate a
/// service restart against the same file.
pub struct TestDb {
    pub pool: SqlitePool,
    dir: TempDir,
}

impl TestDb {
    /// Create a fresh database in its own temporary directory.
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let config = DbConfig::new(dir.path().join("convoy-test.db"));

        let pool = pool::create_pool(&config)
            .await
            .expect("failed to create test pool");
        pool::run_migrations(&pool)
            .await
            .expect("migrations should succeed");

        Self { pool, dir }
    }

    /// Close the current pool and open a new one against the same file,
    /// as a restarted service would.
    pub async fn reopen(&mut self) {
        self.pool.close().await;

        let config = DbConfig::new(self.dir.path().join("convoy-test.db"));
        self.pool = pool::create_pool(&config)
            .await
            .expect("failed to reopen test pool");
        pool::run_migrations(&self.pool)
            .await
            .expect("migrations should be a no-op on reopen");
    }
}

/// Create a temporary database with migrations applied.
pub async fn create_test_db() -> TestDb {
    TestDb::new().await
}
