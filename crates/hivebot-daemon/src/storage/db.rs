//! Database connection and initialization.

use std::path::Path;

use sqlx::{Pool, Sqlite};

pub use hivebot_core::db::DatabaseError;

/// Handle to the daemon's `SQLite` database.
///
/// Cheap to clone; every clone shares the same pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open or create the database at the given path and bring the
    /// schema up to date.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        let pool = hivebot_core::db::open_pool(path).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let pool = hivebot_core::db::open_pool_in_memory().await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
