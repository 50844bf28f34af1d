//! Database layer - storage traits and backends

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    DynStore, PoolStats, QueueChange, QueueChangeStream, Store, StoreTransaction,
};

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::{DatabaseConfig, StorageBackend},
    Result,
};

/// Open the configured backend, running migrations for Postgres when enabled.
pub async fn connect(config: &DatabaseConfig) -> Result<DynStore> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .min_connections(config.pool_min_size)
                .max_connections(config.pool_max_size)
                .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
                .connect(&config.url)
                .await?;

            if config.run_migrations {
                run_migrations(&pool).await?;
            }

            tracing::info!(
                max_connections = config.pool_max_size,
                "Connected to PostgreSQL"
            );
            Ok(Arc::new(PostgresStore::new(pool)))
        }
    }
}

pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
