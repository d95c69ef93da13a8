//! SQLite-backed `OrderStore` reference implementation, generalized from
//! the teacher's `storage::SqliteStorage`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tracing::info;

use super::{OrderStore, StoreError};
use crate::domain::{
    ExchangeOrderId, Order, OrderId, OrderSide, OrderStatus, OrderType, SessionId, Symbol,
};

#[derive(Debug, Clone)]
pub struct SqliteOrderStoreConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for SqliteOrderStoreConfig {
    fn default() -> Self {
        Self {
            path: "orders.db".to_string(),
            max_connections: 5,
        }
    }
}

pub struct SqliteOrderStore {
    pool: Pool<Sqlite>,
}

impl SqliteOrderStore {
    pub async fn new(config: SqliteOrderStoreConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path = %config.path, "sqlite order store initialized");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                internal_id TEXT PRIMARY KEY,
                exchange_id TEXT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                price TEXT,
                size TEXT NOT NULL,
                filled_size TEXT NOT NULL,
                remaining_size TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                ttl_ms INTEGER NOT NULL,
                expires_at TEXT NOT NULL,
                session_id TEXT NOT NULL,
                parent_order_id TEXT,
                purpose TEXT,
                pricing_metadata TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_exchange_id ON orders(exchange_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                internal_id, exchange_id, symbol, side, order_type, price, size,
                filled_size, remaining_size, status, created_at, last_updated,
                ttl_ms, expires_at, session_id, parent_order_id, purpose, pricing_metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(internal_id) DO UPDATE SET
                exchange_id = excluded.exchange_id,
                price = excluded.price,
                size = excluded.size,
                filled_size = excluded.filled_size,
                remaining_size = excluded.remaining_size,
                status = excluded.status,
                last_updated = excluded.last_updated,
                parent_order_id = excluded.parent_order_id,
                purpose = excluded.purpose,
                pricing_metadata = excluded.pricing_metadata
            "#,
        )
        .bind(order.internal_id.as_str())
        .bind(order.exchange_id.as_ref().map(|id| id.as_str()))
        .bind(order.symbol.as_str())
        .bind(format!("{:?}", order.side))
        .bind(format!("{:?}", order.order_type))
        .bind(order.price.map(|p| p.to_string()))
        .bind(order.size.to_string())
        .bind(order.filled_size.to_string())
        .bind(order.remaining_size.to_string())
        .bind(format!("{:?}", order.status))
        .bind(order.created_at.to_rfc3339())
        .bind(order.last_updated.to_rfc3339())
        .bind(order.ttl_ms as i64)
        .bind(order.expires_at.to_rfc3339())
        .bind(order.session_id.as_str())
        .bind(order.parent_order_id.as_ref().map(|id| id.as_str()))
        .bind(order.purpose.as_deref())
        .bind(
            order
                .pricing_metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn add(&self, order: &Order) -> Result<(), StoreError> {
        self.upsert(order).await
    }

    async fn update(&self, order: &Order) -> Result<(), StoreError> {
        self.upsert(order).await
    }

    async fn get_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE internal_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_order_row).transpose()
    }

    async fn get_all(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query("SELECT * FROM orders ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_order_row).collect()
    }

    async fn get_client_order_id_by_exchange(
        &self,
        exchange_id: &ExchangeOrderId,
    ) -> Result<Option<OrderId>, StoreError> {
        let row = sqlx::query("SELECT internal_id FROM orders WHERE exchange_id = ?")
            .bind(exchange_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| OrderId::new(row.get::<String, _>("internal_id"))))
    }
}

fn parse_order_row(row: &SqliteRow) -> Result<Order, StoreError> {
    let side_str: String = row.try_get("side")?;
    let order_type_str: String = row.try_get("order_type")?;
    let status_str: String = row.try_get("status")?;

    let side = match side_str.as_str() {
        "Buy" => OrderSide::Buy,
        _ => OrderSide::Sell,
    };
    let order_type = match order_type_str.as_str() {
        "Limit" => OrderType::Limit,
        _ => OrderType::Market,
    };
    let status = match status_str.as_str() {
        "Pending" => OrderStatus::Pending,
        "Open" => OrderStatus::Open,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Filled" => OrderStatus::Filled,
        "Cancelled" => OrderStatus::Cancelled,
        "Expired" => OrderStatus::Expired,
        _ => OrderStatus::Rejected,
    };

    let price: Option<String> = row.try_get("price")?;
    let size: String = row.try_get("size")?;
    let filled_size: String = row.try_get("filled_size")?;
    let remaining_size: String = row.try_get("remaining_size")?;
    let created_at: String = row.try_get("created_at")?;
    let last_updated: String = row.try_get("last_updated")?;
    let expires_at: String = row.try_get("expires_at")?;
    let pricing_metadata: Option<String> = row.try_get("pricing_metadata")?;

    Ok(Order {
        internal_id: OrderId::new(row.try_get::<String, _>("internal_id")?),
        exchange_id: row
            .try_get::<Option<String>, _>("exchange_id")?
            .map(ExchangeOrderId::new),
        symbol: Symbol::new(row.try_get::<String, _>("symbol")?),
        side,
        order_type,
        price: price
            .map(|p| Decimal::from_str(&p))
            .transpose()
            .map_err(|e: rust_decimal::Error| StoreError::Decimal(e.to_string()))?,
        size: Decimal::from_str(&size).unwrap_or_default(),
        filled_size: Decimal::from_str(&filled_size).unwrap_or_default(),
        remaining_size: Decimal::from_str(&remaining_size).unwrap_or_default(),
        status,
        created_at: parse_rfc3339(&created_at),
        last_updated: parse_rfc3339(&last_updated),
        ttl_ms: row.try_get::<i64, _>("ttl_ms")? as u64,
        expires_at: parse_rfc3339(&expires_at),
        session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
        parent_order_id: row
            .try_get::<Option<String>, _>("parent_order_id")?
            .map(OrderId::new),
        purpose: row.try_get::<Option<String>, _>("purpose")?,
        pricing_metadata: pricing_metadata
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Symbol;
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
        let now = Utc::now();
        Order {
            internal_id: OrderId::new("o1"),
            exchange_id: Some(ExchangeOrderId::new("EX-1")),
            symbol: Symbol::new("BTC/USD"),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(30000)),
            size: dec!(0.01),
            filled_size: dec!(0),
            remaining_size: dec!(0.01),
            status: OrderStatus::Open,
            created_at: now,
            last_updated: now,
            ttl_ms: 16_000,
            expires_at: now,
            session_id: SessionId::new("s1"),
            parent_order_id: None,
            purpose: None,
            pricing_metadata: None,
        }
    }

    #[tokio::test]
    async fn add_then_get_round_trips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.db");
        let store = SqliteOrderStore::new(SqliteOrderStoreConfig {
            path: path.to_string_lossy().to_string(),
            max_connections: 1,
        })
        .await
        .unwrap();

        let order = sample_order();
        store.add(&order).await.unwrap();

        let fetched = store.get_by_id(&order.internal_id).await.unwrap().unwrap();
        assert_eq!(fetched.size, order.size);
        assert_eq!(fetched.status, OrderStatus::Open);

        let resolved = store
            .get_client_order_id_by_exchange(&ExchangeOrderId::new("EX-1"))
            .await
            .unwrap();
        assert_eq!(resolved, Some(OrderId::new("o1")));
    }

    #[tokio::test]
    async fn update_overwrites_status_and_filled_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.db");
        let store = SqliteOrderStore::new(SqliteOrderStoreConfig {
            path: path.to_string_lossy().to_string(),
            max_connections: 1,
        })
        .await
        .unwrap();

        let mut order = sample_order();
        store.add(&order).await.unwrap();

        order.status = OrderStatus::Filled;
        order.filled_size = dec!(0.01);
        order.remaining_size = dec!(0);
        store.update(&order).await.unwrap();

        let fetched = store.get_by_id(&order.internal_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Filled);
        assert_eq!(fetched.filled_size, dec!(0.01));
    }
}

fn parse_rfc3339(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
