mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
mod sql;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for queries and deletes.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Connection pool to the metadata store.
///
/// One pool is created per process (or per CLI invocation) and handed to the
/// retention coordinator. Every query checks a connection out of the pool and
/// returns it when the query finishes, on success and on error alike.
pub struct DbPool {
    inner: PoolStorage,
    retention: Arc<dyn RetentionRepo>,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        DbPool {
            retention: Arc::new(sqlite::SqliteRetentionRepo::new(pool.clone())),
            inner: PoolStorage::Sqlite(pool),
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(write_pool: sqlx::PgPool, read_pool: Option<sqlx::PgPool>) -> Self {
        DbPool {
            retention: Arc::new(postgres::PostgresRetentionRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
        }
    }

    /// Build the pools without connecting. The first query (normally the
    /// retention run's ping) opens connections, so an unreachable store
    /// surfaces there rather than here.
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let mut options = sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&cfg.path)
                    .create_if_missing(cfg.create_if_missing)
                    .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms));
                if cfg.wal_mode {
                    options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
                }

                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_lazy_with(options);

                Ok(Self::from_sqlite(pool))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                use std::{str::FromStr, time::Duration};

                use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

                let pool_options = || {
                    PgPoolOptions::new()
                        .min_connections(cfg.min_connections)
                        .max_connections(cfg.max_connections)
                        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
                        .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
                };

                let write_options =
                    PgConnectOptions::from_str(&cfg.url)?.ssl_mode(cfg.ssl_mode.into());
                let write_pool = pool_options().connect_lazy_with(write_options);

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    let read_options =
                        PgConnectOptions::from_str(read_url)?.ssl_mode(cfg.ssl_mode.into());
                    Some(pool_options().connect_lazy_with(read_options))
                } else {
                    None
                };

                Ok(Self::from_postgres(write_pool, read_pool))
            }
        }
    }

    /// Get the retention repository
    pub fn retention(&self) -> Arc<dyn RetentionRepo> {
        Arc::clone(&self.retention)
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                // Check both write and read pools
                sqlx::query("SELECT 1").execute(&pools.write).await?;
                if let Some(read) = &pools.read {
                    sqlx::query("SELECT 1").execute(read).await?;
                }
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Close every pooled connection, waiting for checked-out ones to return.
    pub async fn close(&self) {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                pools.write.close().await;
                if let Some(read) = &pools.read {
                    read.close().await;
                }
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}
