//! Minimal demonstration binary: wires one [`AdapterFacade`] up against a
//! JSON-framed venue in paper trading mode and prints the events it emits.
//!
//! This is not a production strategy runner (§1 excludes that); it exists
//! to exercise the facade end to end the way a real strategy would drive
//! it, the same role the teacher's `main.rs` played for its notifier.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;
use venue_session_core::config::{AdapterConfig, ReconnectCaps, TradingMode, TtlOverrides};
use venue_session_core::facade::{AdapterFacade, FacadeDeps};
use venue_session_core::store::InMemoryOrderStore;
use venue_session_core::venue_protocol::{CreateOrderRequest, json_venue::JsonVenueProtocol};
use venue_session_core::domain::{AdapterEvent, OrderId, OrderSide, OrderType, Symbol};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "no .env file found, continuing with process environment");
    }

    let config = AdapterConfig {
        venue: "krakenesque".to_string(),
        api_key: String::new(),
        api_secret: String::new(),
        symbol: "BTC/USD".to_string(),
        session_id: None,
        trading_mode: TradingMode::Paper,
        initial_budget: None,
        base_currency_balance: None,
        subscribe_to_order_book: true,
        order_book_depth: 10,
        reconnect_caps: ReconnectCaps::default(),
        ttl_overrides: TtlOverrides::default(),
        fee_refresh_interval_ms: 60_000,
    };

    let protocol = Arc::new(JsonVenueProtocol::new(
        Decimal::new(16, 4),
        Decimal::new(26, 4),
    ));
    let store = Arc::new(InMemoryOrderStore::new());

    let deps = FacadeDeps {
        protocol,
        public_url: "wss://demo.invalid/public".to_string(),
        private_url: None,
        token_source: None,
        store,
        paper_simulator: None,
    };

    let (facade, mut events) = AdapterFacade::new(config, deps);

    if let Err(e) = facade.connect().await {
        tracing::warn!(error = %e, "connect failed in demo (expected against a fake endpoint)");
    }

    let request = CreateOrderRequest {
        client_order_id: OrderId::generate(),
        symbol: Symbol::new("BTC/USD"),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        price: Some(Decimal::new(30_000, 0)),
        size: Decimal::new(1, 2),
        expires_at: None,
        ttl_s: None,
        parent_order_id: None,
        purpose: None,
        pricing_metadata: None,
    };

    match facade.create_order(request).await {
        Ok(order) => tracing::info!(order_id = %order.internal_id, status = ?order.status, "order created"),
        Err(e) => tracing::error!(error = %e, "order creation failed"),
    }

    tokio::select! {
        _ = async {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        } => {}
        _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
            tracing::info!("demo window elapsed, shutting down");
        }
    }

    facade.disconnect().await;
}

fn log_event(event: &AdapterEvent) {
    match event {
        AdapterEvent::Connected { session_id } => tracing::info!(%session_id, "connected"),
        AdapterEvent::Disconnected { session_id, reason } => {
            tracing::info!(%session_id, reason, "disconnected")
        }
        AdapterEvent::OrderFilled { order, fill } => {
            tracing::info!(order_id = %order.internal_id, fill_id = %fill.fill_id, size = %fill.size, "order filled")
        }
        AdapterEvent::OrderPartiallyFilled { order, cumulative_filled_size, .. } => {
            tracing::info!(order_id = %order.internal_id, %cumulative_filled_size, "partial fill")
        }
        AdapterEvent::OrderUpdate(order) => {
            tracing::info!(order_id = %order.internal_id, status = ?order.status, "order update")
        }
        AdapterEvent::OrderCancelled(order) => {
            tracing::info!(order_id = %order.internal_id, "order cancelled")
        }
        AdapterEvent::OrderBookUpdate(update) => {
            tracing::debug!(symbol = %update.symbol, "order book update")
        }
        AdapterEvent::Trade(trade) => tracing::debug!(symbol = %trade.symbol, "trade"),
        AdapterEvent::Ticker(ticker) => tracing::debug!(symbol = %ticker.symbol, "ticker"),
        AdapterEvent::BalancesUpdated(balances) => {
            tracing::info!(count = balances.len(), "balances updated")
        }
        AdapterEvent::UnreconciledExchangeUpdate(update) => {
            tracing::warn!(kind = ?update.kind, "unreconciled exchange update")
        }
        AdapterEvent::Error(e) => tracing::error!(error = %e, "adapter error"),
    }
}
