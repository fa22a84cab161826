//! `PostgreSQL` stock store.
//!
//! Stock rows live in `stock_records`, ledger entries in `stock_movements`.
//! Every change runs in one transaction that locks the stock row with
//! `SELECT ... FOR UPDATE`, so even writers that bypass the distributed lock
//! are serialized per key.
//!
//! The caller's timeout covers everything up to `COMMIT`: it is set as the
//! transaction's `statement_timeout` and enforced client-side as well. The
//! `COMMIT` itself runs unbounded here, so `TransactionTimeout` from this
//! store always means the transaction was rolled back.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use stock_control_core::store::StockStore;
use stock_control_core::{
    CommittedChange, MovementType, NewMovement, SkuId, StockChange, StockError, StockFuture,
    StockKey, StockMovement, StockRecord, Warehouse, WarehouseId,
};

/// SQLSTATE raised when `lock_timeout` expires while waiting for a row lock.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATE raised when `statement_timeout` cancels a query.
const QUERY_CANCELED: &str = "57014";

/// Default bound on waiting for a row lock.
pub const DEFAULT_ROW_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const RECORD_COLUMNS: &str = "id, sku_id, warehouse_id, quantity_on_hand, quantity_reserved, \
     quantity_available, created_at, updated_at";

/// `PostgreSQL`-backed [`StockStore`].
///
/// # Example
///
/// ```no_run
/// use stock_control_postgres::PostgresStockStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresStockStore::connect("postgres://localhost/stock", 10).await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
    row_lock_timeout: Duration,
}

impl PostgresStockStore {
    /// Create a store on an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            row_lock_timeout: DEFAULT_ROW_LOCK_TIMEOUT,
        }
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::TransactionFailed`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StockError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StockError::TransactionFailed(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Bound on how long a transaction waits for another transaction's row lock.
    #[must_use]
    pub const fn with_row_lock_timeout(mut self, timeout: Duration) -> Self {
        self.row_lock_timeout = timeout;
        self
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::TransactionFailed`] if migrations fail.
    pub async fn migrate(&self) -> Result<(), StockError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StockError::TransactionFailed(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn apply_in_transaction(
        &self,
        key: &StockKey,
        change: &StockChange,
        timeout: Duration,
    ) -> Result<CommittedChange, StockError> {
        // Dropping the unfinished transaction on expiry rolls it back.
        let (tx, committed) = tokio::time::timeout(timeout, self.prepare(key, change, timeout))
            .await
            .map_err(|_elapsed| {
                tracing::warn!(key = %key, ?timeout, "Stock transaction timed out before commit");
                StockError::TransactionTimeout {
                    key: key.clone(),
                    timeout,
                }
            })??;

        tx.commit()
            .await
            .map_err(|e| self.map_error(key, timeout, "commit", &e))?;

        tracing::debug!(
            key = %key,
            movement_id = committed.movement.id,
            movement_type = %committed.movement.movement_type,
            quantity_delta = committed.movement.quantity_delta,
            "Stock change committed"
        );

        Ok(committed)
    }

    /// Run a change up to, but not including, `COMMIT`.
    async fn prepare(
        &self,
        key: &StockKey,
        change: &StockChange,
        timeout: Duration,
    ) -> Result<(Transaction<'static, Postgres>, CommittedChange), StockError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.map_error(key, timeout, "begin transaction", &e))?;

        // SET LOCAL does not accept bind parameters; set_config(..., true) is its equivalent.
        sqlx::query(
            "SELECT set_config('lock_timeout', $1, true),                     set_config('statement_timeout', $2, true)",
        )
        .bind(format!("{}ms", self.row_lock_timeout.as_millis()))
        .bind(format!("{}ms", timeout.as_millis()))
        .execute(&mut *tx)
        .await
        .map_err(|e| self.map_error(key, timeout, "set timeouts", &e))?;

        if change.creates_record() {
            self.ensure_record(&mut tx, key, timeout).await?;
        }

        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records \
             WHERE sku_id = $1 AND warehouse_id = $2 FOR UPDATE"
        ))
        .bind(key.sku_id.as_str())
        .bind(key.warehouse_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| self.map_error(key, timeout, "lock stock row", &e))?;

        // Early returns drop `tx`, which rolls the transaction back.
        let Some(row) = row else {
            return Err(StockError::StockNotFound(key.clone()));
        };
        let current = row_to_record(&row)?;
        current.check_invariant()?;

        let applied = change.apply(key, current.levels())?;

        let row = sqlx::query(&format!(
            "UPDATE stock_records \
             SET quantity_on_hand = $2, quantity_reserved = $3, quantity_available = $4, \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(current.id)
        .bind(applied.levels.on_hand)
        .bind(applied.levels.reserved)
        .bind(applied.levels.available)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| self.map_error(key, timeout, "update stock row", &e))?;
        let record = row_to_record(&row)?;

        let movement = insert_movement(&mut tx, record.id, &applied.movement)
            .await
            .map_err(|e| self.map_error(key, timeout, "append movement", &e))?;
        let movement = row_to_movement(&movement)?;

        Ok((tx, CommittedChange { record, movement }))
    }

    /// Insert an empty record for an intake, checking the warehouse first.
    async fn ensure_record(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        key: &StockKey,
        timeout: Duration,
    ) -> Result<(), StockError> {
        let warehouse: Option<(String,)> =
            sqlx::query_as("SELECT id FROM warehouses WHERE id = $1")
                .bind(key.warehouse_id.as_str())
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| self.map_error(key, timeout, "check warehouse", &e))?;

        if warehouse.is_none() {
            return Err(StockError::WarehouseNotFound(key.warehouse_id.clone()));
        }

        let inserted = sqlx::query(
            r"
            INSERT INTO stock_records (sku_id, warehouse_id)
            VALUES ($1, $2)
            ON CONFLICT (sku_id, warehouse_id) DO NOTHING
            ",
        )
        .bind(key.sku_id.as_str())
        .bind(key.warehouse_id.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| self.map_error(key, timeout, "create stock row", &e))?;

        if inserted.rows_affected() == 1 {
            tracing::info!(key = %key, "Stock record created on first intake");
        }

        Ok(())
    }

    fn map_error(
        &self,
        key: &StockKey,
        timeout: Duration,
        context: &str,
        error: &sqlx::Error,
    ) -> StockError {
        if let sqlx::Error::Database(db) = error {
            match db.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) => {
                    tracing::warn!(key = %key, context, "Row lock wait timed out");
                    metrics::counter!("stock.store.row_lock_timeouts").increment(1);
                    return StockError::LockTimeout {
                        key: key.clone(),
                        waited: self.row_lock_timeout,
                    };
                }
                Some(QUERY_CANCELED) => {
                    tracing::warn!(key = %key, context, "Statement timed out");
                    return StockError::TransactionTimeout {
                        key: key.clone(),
                        timeout,
                    };
                }
                _ => {}
            }
        }

        tracing::error!(key = %key, context, error = %error, "Stock store query failed");
        StockError::TransactionFailed(format!("{context}: {error}"))
    }
}

async fn insert_movement(
    tx: &mut Transaction<'static, Postgres>,
    stock_record_id: i64,
    movement: &NewMovement,
) -> Result<PgRow, sqlx::Error> {
    sqlx::query(
        r"
        INSERT INTO stock_movements (
            stock_record_id, movement_type, quantity_delta, reference, reason,
            operator, on_hand_after, reserved_after
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, stock_record_id, movement_type, quantity_delta, reference, reason,
                  operator, on_hand_after, reserved_after, created_at
        ",
    )
    .bind(stock_record_id)
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity_delta)
    .bind(&movement.reference)
    .bind(&movement.reason)
    .bind(movement.operator.as_deref())
    .bind(movement.on_hand_after)
    .bind(movement.reserved_after)
    .fetch_one(&mut **tx)
    .await
}

fn query_failed(context: &str, error: &sqlx::Error) -> StockError {
    tracing::error!(context, error = %error, "Stock store query failed");
    StockError::TransactionFailed(format!("{context}: {error}"))
}

fn decode<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StockError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StockError::TransactionFailed(format!("Failed to decode {column}: {e}")))
}

fn row_to_record(row: &PgRow) -> Result<StockRecord, StockError> {
    Ok(StockRecord {
        id: decode(row, "id")?,
        sku_id: SkuId::new(decode::<String>(row, "sku_id")?),
        warehouse_id: WarehouseId::new(decode::<String>(row, "warehouse_id")?),
        quantity_on_hand: decode(row, "quantity_on_hand")?,
        quantity_reserved: decode(row, "quantity_reserved")?,
        quantity_available: decode(row, "quantity_available")?,
        created_at: decode::<DateTime<Utc>>(row, "created_at")?,
        updated_at: decode::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn row_to_movement(row: &PgRow) -> Result<StockMovement, StockError> {
    let movement_type: String = decode(row, "movement_type")?;

    Ok(StockMovement {
        id: decode(row, "id")?,
        stock_record_id: decode(row, "stock_record_id")?,
        movement_type: MovementType::parse(&movement_type)?,
        quantity_delta: decode(row, "quantity_delta")?,
        reference: decode(row, "reference")?,
        reason: decode(row, "reason")?,
        operator: decode(row, "operator")?,
        on_hand_after: decode(row, "on_hand_after")?,
        reserved_after: decode(row, "reserved_after")?,
        created_at: decode::<DateTime<Utc>>(row, "created_at")?,
    })
}

const MOVEMENT_SELECT: &str = r"
    SELECT m.id, m.stock_record_id, m.movement_type, m.quantity_delta, m.reference, m.reason,
           m.operator, m.on_hand_after, m.reserved_after, m.created_at
    FROM stock_movements m
    JOIN stock_records r ON r.id = m.stock_record_id
    WHERE r.sku_id = $1 AND r.warehouse_id = $2
";

impl StockStore for PostgresStockStore {
    fn get_record<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Option<StockRecord>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {RECORD_COLUMNS} FROM stock_records WHERE sku_id = $1 AND warehouse_id = $2"
            ))
            .bind(key.sku_id.as_str())
            .bind(key.warehouse_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("get stock record", &e))?;

            row.as_ref().map(row_to_record).transpose()
        })
    }

    fn apply_change<'a>(
        &'a self,
        key: &'a StockKey,
        change: &'a StockChange,
        timeout: Duration,
    ) -> StockFuture<'a, CommittedChange> {
        Box::pin(self.apply_in_transaction(key, change, timeout))
    }

    fn list_low_stock(&self, threshold: i64, limit: i64) -> StockFuture<'_, Vec<StockRecord>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {RECORD_COLUMNS} FROM stock_records \
                 WHERE quantity_available < $1 \
                 ORDER BY quantity_available ASC, id ASC \
                 LIMIT $2"
            ))
            .bind(threshold)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("list low stock", &e))?;

            rows.iter().map(row_to_record).collect()
        })
    }

    fn list_records(
        &self,
        after_id: Option<i64>,
        limit: i64,
    ) -> StockFuture<'_, Vec<StockRecord>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {RECORD_COLUMNS} FROM stock_records \
                 WHERE $1::BIGINT IS NULL OR id > $1 \
                 ORDER BY id ASC LIMIT $2"
            ))
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("list stock records", &e))?;

            rows.iter().map(row_to_record).collect()
        })
    }

    fn list_movements<'a>(
        &'a self,
        key: &'a StockKey,
        limit: i64,
    ) -> StockFuture<'a, Vec<StockMovement>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!("{MOVEMENT_SELECT} ORDER BY m.id DESC LIMIT $3"))
                .bind(key.sku_id.as_str())
                .bind(key.warehouse_id.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_failed("list movements", &e))?;

            rows.iter().map(row_to_movement).collect()
        })
    }

    fn replay_movements<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Vec<StockMovement>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!("{MOVEMENT_SELECT} ORDER BY m.id ASC"))
                .bind(key.sku_id.as_str())
                .bind(key.warehouse_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_failed("replay movements", &e))?;

            rows.iter().map(row_to_movement).collect()
        })
    }

    fn upsert_warehouse<'a>(&'a self, warehouse: &'a Warehouse) -> StockFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO warehouses (id, name, location)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, location = EXCLUDED.location
                ",
            )
            .bind(warehouse.id.as_str())
            .bind(&warehouse.name)
            .bind(&warehouse.location)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("upsert warehouse", &e))?;

            tracing::info!(warehouse_id = %warehouse.id, "Warehouse upserted");
            Ok(())
        })
    }

    fn get_warehouse<'a>(&'a self, id: &'a WarehouseId) -> StockFuture<'a, Option<Warehouse>> {
        Box::pin(async move {
            let row: Option<(String, String, String)> =
                sqlx::query_as("SELECT id, name, location FROM warehouses WHERE id = $1")
                    .bind(id.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| query_failed("get warehouse", &e))?;

            Ok(row.map(|(id, name, location)| Warehouse::new(id, name, location)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_select_filters_by_key() {
        assert!(MOVEMENT_SELECT.contains("r.sku_id = $1"));
        assert!(MOVEMENT_SELECT.contains("r.warehouse_id = $2"));
    }

    #[test]
    fn record_columns_cover_invariant_fields() {
        for column in ["quantity_on_hand", "quantity_reserved", "quantity_available"] {
            assert!(RECORD_COLUMNS.contains(column));
        }
    }
}
