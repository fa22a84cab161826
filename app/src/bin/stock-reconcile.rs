//! Stock reconciliation sweep.
//!
//! Replays the movement ledger of every stock record and compares it with
//! the recorded on-hand quantity, then lists low-stock positions.
//!
//! Exits non-zero if any record disagrees with its ledger or could not be
//! reconciled.
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://... REDIS_URL=redis://... cargo run --bin stock-reconcile
//! ```

use stock_control_app::{AppConfig, SWEEP_PAGE_SIZE, bootstrap, reconcile_all};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stock_control=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    stock_control_runtime::metrics::register_metrics();

    let config = AppConfig::from_env();
    tracing::info!(
        cache_enabled = config.cache_enabled,
        low_stock_threshold = config.low_stock_threshold,
        "Configuration loaded"
    );

    let app = bootstrap(&config).await?;

    let summary = reconcile_all(&app.engine, SWEEP_PAGE_SIZE).await?;
    tracing::info!(
        checked = summary.checked,
        inconsistent = summary.inconsistent,
        failed = summary.failed,
        "Reconciliation finished"
    );

    let low = app
        .engine
        .list_low_stock(config.low_stock_threshold, None)
        .await?;
    for record in &low {
        tracing::info!(
            sku = %record.sku_id,
            warehouse = %record.warehouse_id,
            available = record.quantity_available,
            "Low stock"
        );
    }

    if !summary.is_clean() {
        anyhow::bail!(
            "{} stock record(s) disagree with their movement ledger, {} could not be reconciled",
            summary.inconsistent,
            summary.failed
        );
    }
    Ok(())
}
