//! Production wiring: `PostgreSQL` store, Redis lock and optional Redis cache.

use crate::config::AppConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use stock_control_core::{NoCache, StockCache, StockError};
use stock_control_postgres::PostgresStockStore;
use stock_control_redis::{RedisLockCoordinator, RedisStockCache};
use stock_control_runtime::{ConfigError, StockEngine};
use thiserror::Error;

/// Failure while assembling the engine.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Engine timings are unusable.
    #[error("Invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    /// The database could not be reached.
    #[error("Failed to connect to PostgreSQL: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations or Redis setup failed.
    #[error(transparent)]
    Stock(#[from] StockError),
}

/// A ready engine plus direct handles to its store.
#[derive(Clone)]
pub struct StockControl {
    /// Engine over the production backends.
    pub engine: StockEngine,
    /// The `PostgreSQL` store, for maintenance queries.
    pub store: PostgresStockStore,
}

/// Connect every backend, run migrations and build the engine.
///
/// The distributed lock always uses Redis; the snapshot cache uses the same
/// connection when `cache_enabled` is set and is disabled otherwise.
///
/// # Errors
///
/// Returns [`BootstrapError`] if the configuration is invalid or any backend
/// is unreachable.
pub async fn bootstrap(config: &AppConfig) -> Result<StockControl, BootstrapError> {
    let engine_config = config.engine_config();
    engine_config.validate()?;

    tracing::info!(
        max_connections = config.database_max_connections,
        "Connecting to PostgreSQL"
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout))
        .connect(&config.database_url)
        .await?;

    let store =
        PostgresStockStore::from_pool(pool).with_row_lock_timeout(engine_config.row_lock_timeout);
    store.migrate().await?;
    tracing::info!("✓ Stock schema migrated");

    let redis = stock_control_redis::connect(&config.redis_url).await?;
    let locks = RedisLockCoordinator::new(redis.clone());
    let cache: Arc<dyn StockCache> = if config.cache_enabled {
        Arc::new(RedisStockCache::new(redis))
    } else {
        tracing::info!("Snapshot cache disabled");
        Arc::new(NoCache)
    };

    let engine = StockEngine::new(
        Arc::new(store.clone()),
        Arc::new(locks),
        cache,
        engine_config,
    );

    Ok(StockControl { engine, store })
}
