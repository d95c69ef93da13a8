//! In-memory reference `OrderStore` — the facade's default backing store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{OrderStore, StoreError};
use crate::domain::{ExchangeOrderId, Order, OrderId};

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    exchange_to_client: RwLock<HashMap<ExchangeOrderId, OrderId>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn add(&self, order: &Order) -> Result<(), StoreError> {
        if let Some(exchange_id) = &order.exchange_id {
            self.exchange_to_client
                .write()
                .await
                .insert(exchange_id.clone(), order.internal_id.clone());
        }
        self.orders
            .write()
            .await
            .insert(order.internal_id.clone(), order.clone());
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<(), StoreError> {
        if let Some(exchange_id) = &order.exchange_id {
            self.exchange_to_client
                .write()
                .await
                .insert(exchange_id.clone(), order.internal_id.clone());
        }
        self.orders
            .write()
            .await
            .insert(order.internal_id.clone(), order.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Order>, StoreError> {
        Ok(self.orders.read().await.values().cloned().collect())
    }

    async fn get_client_order_id_by_exchange(
        &self,
        exchange_id: &ExchangeOrderId,
    ) -> Result<Option<OrderId>, StoreError> {
        Ok(self
            .exchange_to_client
            .read()
            .await
            .get(exchange_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderSide, OrderStatus, OrderType, SessionId, Symbol};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_order(id: &str, exchange_id: Option<&str>) -> Order {
        let now = Utc::now();
        Order {
            internal_id: OrderId::new(id),
            exchange_id: exchange_id.map(ExchangeOrderId::new),
            symbol: Symbol::new("BTC/USD"),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(100)),
            size: dec!(1),
            filled_size: dec!(0),
            remaining_size: dec!(1),
            status: OrderStatus::Pending,
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
    async fn add_then_get_by_id_round_trips() {
        let store = InMemoryOrderStore::new();
        let order = sample_order("o1", None);
        store.add(&order).await.unwrap();
        let fetched = store.get_by_id(&order.internal_id).await.unwrap().unwrap();
        assert_eq!(fetched.internal_id, order.internal_id);
    }

    #[tokio::test]
    async fn exchange_id_resolves_back_to_client_order_id() {
        let store = InMemoryOrderStore::new();
        let order = sample_order("o1", Some("EX-1"));
        store.add(&order).await.unwrap();
        let resolved = store
            .get_client_order_id_by_exchange(&ExchangeOrderId::new("EX-1"))
            .await
            .unwrap();
        assert_eq!(resolved, Some(OrderId::new("o1")));
    }
}
