use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, HoldId, Money, OrderId, SkuId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{LineItem, Order, OrderState, OrderStore, OrderStoreError, Result};

/// PostgreSQL-backed order store.
///
/// The terminal transition is a single conditional `UPDATE ... WHERE state =
/// expected`; the row lock makes the compare-and-set atomic, so exactly one
/// of two racing finalizers observes `rows_affected == 1`.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
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

    fn row_to_order(row: PgRow, items: Vec<LineItem>) -> Result<Order> {
        let state_str: String = row.try_get("state")?;
        let state = OrderState::parse(&state_str).ok_or_else(|| {
            OrderStoreError::Database(sqlx::Error::Decode(
                format!("unknown order state: {state_str}").into(),
            ))
        })?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            items,
            hold_ids: row
                .try_get::<Vec<Uuid>, _>("hold_ids")?
                .into_iter()
                .map(HoldId::from_uuid)
                .collect(),
            state,
            created_at: row.try_get("created_at")?,
            paid_at: row.try_get("paid_at")?,
            closed_at: row.try_get("closed_at")?,
        })
    }

    async fn items_for(&self, order_id: OrderId) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(
            "SELECT sku, quantity, unit_price_cents FROM order_items WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LineItem {
                sku: SkuId::new(r.get::<String, _>("sku")),
                quantity: r.get::<i64, _>("quantity") as u32,
                unit_price: Money::from_cents(r.get::<i64, _>("unit_price_cents")),
            })
            .collect())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert(&self, order: Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let hold_uuids: Vec<Uuid> = order.hold_ids.iter().map(|h| h.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, state, hold_ids, created_at, paid_at, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.customer_id.as_uuid())
        .bind(order.state.as_str())
        .bind(&hold_uuids)
        .bind(order.created_at)
        .bind(order.paid_at)
        .bind(order.closed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return OrderStoreError::DuplicateOrder(order.id);
            }
            OrderStoreError::Database(e)
        })?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, sku, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(item.sku.as_str())
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            "SELECT id, customer_id, state, hold_ids, created_at, paid_at, closed_at \
             FROM orders WHERE id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let items = self.items_for(order_id).await?;
                Ok(Some(Self::row_to_order(row, items)?))
            }
            None => Ok(None),
        }
    }

    async fn orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT id, customer_id, state, hold_ids, created_at, paid_at, closed_at \
             FROM orders WHERE customer_id = $1 ORDER BY created_at DESC",
        )
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
            let items = self.items_for(order_id).await?;
            orders.push(Self::row_to_order(row, items)?);
        }
        Ok(orders)
    }

    #[tracing::instrument(skip(self), fields(expected = %expected, next = %next))]
    async fn transition(
        &self,
        order_id: OrderId,
        expected: OrderState,
        next: OrderState,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = $3,
                paid_at   = CASE WHEN $3 = 'paid' THEN $4 ELSE paid_at END,
                closed_at = CASE WHEN $3 IN ('cancelled', 'expired') THEN $4 ELSE closed_at END
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        // The CAS missed: distinguish a missing order from a lost race.
        let actual: Option<String> = sqlx::query_scalar("SELECT state FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(actual) = actual else {
            return Err(OrderStoreError::OrderNotFound(order_id));
        };

        let actual = OrderState::parse(&actual).ok_or_else(|| {
            OrderStoreError::Database(sqlx::Error::Decode(
                format!("unknown order state: {actual}").into(),
            ))
        })?;

        Err(OrderStoreError::AlreadyFinalized { order_id, actual })
    }
}
