use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{HoldId, OrderId, SkuId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{Hold, HoldState, LedgerError, Result, StockRecord, StockStore};

/// PostgreSQL-backed stock store.
///
/// Atomicity of `reserve` comes from a conditional `UPDATE ... WHERE
/// available >= quantity` inside one transaction: the row lock serializes
/// concurrent reservations per SKU without any application-level locking.
/// `commit`/`release` use the same compare-and-set shape on the hold's state
/// column.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Creates a new PostgreSQL stock store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_hold(row: PgRow) -> Result<Hold> {
        let state_str: String = row.try_get("state").map_err(LedgerError::Database)?;
        let state = HoldState::parse(&state_str).ok_or_else(|| {
            LedgerError::Database(sqlx::Error::Decode(
                format!("unknown hold state: {state_str}").into(),
            ))
        })?;

        Ok(Hold {
            id: HoldId::from_uuid(row.try_get::<Uuid, _>("id")?),
            sku: SkuId::new(row.try_get::<String, _>("sku")?),
            quantity: row.try_get::<i64, _>("quantity")? as u32,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            state,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn put_stock(&self, sku: SkuId, available: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_records (sku, available, reserved)
            VALUES ($1, $2, 0)
            ON CONFLICT (sku) DO UPDATE SET available = EXCLUDED.available
            "#,
        )
        .bind(sku.as_str())
        .bind(i64::from(available))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stock(&self, sku: &SkuId) -> Result<Option<StockRecord>> {
        let row = sqlx::query("SELECT sku, available, reserved FROM stock_records WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| StockRecord {
            sku: SkuId::new(r.get::<String, _>("sku")),
            available: r.get::<i64, _>("available") as u32,
            reserved: r.get::<i64, _>("reserved") as u32,
        }))
    }

    #[tracing::instrument(skip(self), fields(sku = %sku))]
    async fn reserve(
        &self,
        sku: &SkuId,
        quantity: u32,
        order_id: OrderId,
        ttl: Duration,
    ) -> Result<Hold> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE stock_records
            SET available = available - $2, reserved = reserved + $2
            WHERE sku = $1 AND available >= $2
            "#,
        )
        .bind(sku.as_str())
        .bind(i64::from(quantity))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT available FROM stock_records WHERE sku = $1")
                    .bind(sku.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;

            metrics::counter!("ledger_reservations_rejected_total").increment(1);
            return Err(LedgerError::InsufficientStock {
                sku: sku.clone(),
                requested: quantity,
                available: available.unwrap_or(0) as u32,
            });
        }

        let hold = Hold::new(sku.clone(), quantity, order_id, Utc::now(), ttl);
        sqlx::query(
            r#"
            INSERT INTO reservation_holds (id, sku, quantity, order_id, state, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(hold.id.as_uuid())
        .bind(hold.sku.as_str())
        .bind(i64::from(hold.quantity))
        .bind(hold.order_id.as_uuid())
        .bind(hold.state.as_str())
        .bind(hold.created_at)
        .bind(hold.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::counter!("ledger_reservations_total").increment(1);
        Ok(hold)
    }

    #[tracing::instrument(skip(self))]
    async fn commit(&self, hold_id: HoldId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let finalized: Option<(String, i64)> = sqlx::query_as(
            r#"
            UPDATE reservation_holds SET state = 'committed'
            WHERE id = $1 AND state = 'active'
            RETURNING sku, quantity
            "#,
        )
        .bind(hold_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        match finalized {
            Some((sku, quantity)) => {
                sqlx::query("UPDATE stock_records SET reserved = reserved - $2 WHERE sku = $1")
                    .bind(&sku)
                    .bind(quantity)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(())
            }
            None => finalize_noop(&mut tx, hold_id, HoldState::Committed).await,
        }
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, hold_id: HoldId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let finalized: Option<(String, i64)> = sqlx::query_as(
            r#"
            UPDATE reservation_holds SET state = 'released'
            WHERE id = $1 AND state = 'active'
            RETURNING sku, quantity
            "#,
        )
        .bind(hold_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        match finalized {
            Some((sku, quantity)) => {
                sqlx::query(
                    r#"
                    UPDATE stock_records
                    SET reserved = reserved - $2, available = available + $2
                    WHERE sku = $1
                    "#,
                )
                .bind(&sku)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(())
            }
            None => finalize_noop(&mut tx, hold_id, HoldState::Released).await,
        }
    }

    async fn hold(&self, hold_id: HoldId) -> Result<Option<Hold>> {
        let row = sqlx::query(
            "SELECT id, sku, quantity, order_id, state, created_at, expires_at \
             FROM reservation_holds WHERE id = $1",
        )
        .bind(hold_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_hold).transpose()
    }

    async fn holds_for_order(&self, order_id: OrderId) -> Result<Vec<Hold>> {
        let rows = sqlx::query(
            "SELECT id, sku, quantity, order_id, state, created_at, expires_at \
             FROM reservation_holds WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_hold).collect()
    }

    async fn expired_holds(&self, as_of: DateTime<Utc>) -> Result<Vec<Hold>> {
        let rows = sqlx::query(
            "SELECT id, sku, quantity, order_id, state, created_at, expires_at \
             FROM reservation_holds WHERE state = 'active' AND expires_at <= $1",
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_hold).collect()
    }
}

/// Resolves a failed state CAS: an Ok no-op when the hold already reached the
/// target state, otherwise `HoldNotFound` or `AlreadyFinalized`.
async fn finalize_noop(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    hold_id: HoldId,
    target: HoldState,
) -> Result<()> {
    let current: Option<String> = sqlx::query_scalar("SELECT state FROM reservation_holds WHERE id = $1")
        .bind(hold_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

    let Some(current) = current else {
        return Err(LedgerError::HoldNotFound(hold_id));
    };

    let state = HoldState::parse(&current).ok_or_else(|| {
        LedgerError::Database(sqlx::Error::Decode(
            format!("unknown hold state: {current}").into(),
        ))
    })?;

    if state == target {
        Ok(())
    } else {
        Err(LedgerError::AlreadyFinalized { hold_id, state })
    }
}
