//! Matching Engine Types
//!
//! Shared types and DTOs for the matching engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Order, OrderSide};

/// A book entry: the in-memory view of a revealed order. Price and bounds
/// are immutable after admission; only `remaining` moves.
#[derive(Debug, Clone)]
pub struct BookOrder {
    pub id: Uuid,
    pub user_address: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub quantity: Decimal,
    pub remaining: Decimal,
    pub created_at_ms: i64,
}

impl From<&Order> for BookOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            user_address: order.user_address.clone(),
            side: order.side,
            price: order.price,
            min_price: order.min_price,
            max_price: order.max_price,
            quantity: order.quantity,
            remaining: order.remaining_quantity,
            created_at_ms: order.created_at.timestamp_millis(),
        }
    }
}

/// A cancel command travelling the cancel channel: the row transition has
/// already happened, the worker excises the book entry.
#[derive(Debug, Clone)]
pub struct CancelCommand {
    pub order_id: Uuid,
    pub owner: String,
}

/// One match, as emitted to downstream consumers.
#[derive(Debug, Clone, Serialize)]
pub struct MatchEvent {
    pub match_id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buyer: String,
    pub seller: String,
    pub base_token: String,
    pub quote_token: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub matched_at_ms: i64,
}

/// One aggregated price level in a book snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderBookSnapshot {
    pub base_token: String,
    pub quote_token: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: i64,
}

/// Engine health, served by the gateway health check.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub books: usize,
    pub open_orders: usize,
    pub workers: usize,
}

/// Matching engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid order: {0}")]
    Validation(String),

    #[error("commitment mismatch: {0}")]
    CommitmentMismatch(String),

    #[error("not the order owner")]
    NotOwner,

    #[error("order already terminal")]
    OrderTerminal,

    #[error("order expired")]
    Expired,

    #[error("engine channel full")]
    ChannelFull,

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::ChainError),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

/// Two orders cross iff the buyer's ceiling reaches the seller's floor.
pub fn compatible(buy_max: Decimal, sell_min: Decimal) -> bool {
    buy_max >= sell_min
}

/// Execution price: midpoint of the declared prices, clamped into
/// [sell.min_price, buy.max_price].
pub fn execution_price(
    buy_price: Decimal,
    sell_price: Decimal,
    sell_min: Decimal,
    buy_max: Decimal,
) -> Decimal {
    let mid = (buy_price + sell_price) / Decimal::from(2);
    mid.clamp(sell_min, buy_max)
}

/// Time used for expiry checks at admission and match time.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_compatibility() {
        assert!(compatible(dec!(101), dec!(101)));
        assert!(compatible(dec!(102), dec!(101)));
        assert!(!compatible(dec!(100.99), dec!(101)));
    }

    #[test]
    fn test_execution_price_midpoint() {
        // Equal declared prices: midpoint is the shared price
        assert_eq!(execution_price(dec!(100), dec!(100), dec!(100), dec!(100)), dec!(100));
        // Midpoint inside the window stays put
        assert_eq!(execution_price(dec!(102), dec!(100), dec!(99), dec!(103)), dec!(101));
    }

    #[test]
    fn test_execution_price_clamped_by_sell_floor() {
        // buy 100 var 100bps (max 101), sell 101 var 0 (min 101):
        // midpoint 100.5 clamps up to the seller's floor
        assert_eq!(execution_price(dec!(100), dec!(101), dec!(101), dec!(101)), dec!(101));
    }

    #[test]
    fn test_execution_price_clamped_by_buy_ceiling() {
        assert_eq!(execution_price(dec!(100), dec!(104), dec!(99), dec!(101)), dec!(101));
    }

}
