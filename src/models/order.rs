use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

// Helper module to serialize DateTime as milliseconds timestamp
mod datetime_as_millis {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp_millis())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order lifecycle status.
///
/// Committed rows exist before reveal; only Revealed and PartiallyFilled
/// orders have an in-memory book entry. Filled, Cancelled and Expired are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Committed,
    Revealed,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    /// True while the order is eligible to rest in a book.
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Revealed | OrderStatus::PartiallyFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Committed => "committed",
            OrderStatus::Revealed => "revealed",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// A persisted order row.
///
/// `order_id` and `commitment_hash` are decimal strings of BN128 field
/// elements; the on-chain commitment keyed by `order_id` is the order's
/// authoritative identity, the row is the engine's view of it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_id: String,
    pub user_address: String,
    pub chain_id: i64,
    pub side: OrderSide,
    pub base_token: String,
    pub quote_token: String,
    pub sell_token: String,
    pub buy_token: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub variance_bps: i32,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub status: OrderStatus,
    pub commitment_hash: String,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// The revealed order detail submitted to the engine.
///
/// Must hash to the on-chain commitment registered under `order_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    pub order_id: String,
    pub side: OrderSide,
    pub base_token: String,
    pub quote_token: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub variance_bps: i32,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_id: String,
    pub side: OrderSide,
    pub base_token: String,
    pub quote_token: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub variance_bps: i32,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub status: OrderStatus,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            order_id: order.order_id,
            side: order.side,
            base_token: order.base_token,
            quote_token: order.quote_token,
            quantity: order.quantity,
            price: order.price,
            variance_bps: order.variance_bps,
            filled_quantity: order.filled_quantity,
            remaining_quantity: order.remaining_quantity,
            status: order.status,
            created_at: order.created_at,
        }
    }
}

/// Derive min/max price from the declared price and variance.
///
/// Variance is symmetric, in basis points of the declared price:
/// `min = price * (10000 - bps) / 10000`, `max = price * (10000 + bps) / 10000`.
pub fn price_bounds(price: Decimal, variance_bps: i32) -> (Decimal, Decimal) {
    let scale = Decimal::from(10_000);
    let bps = Decimal::from(variance_bps);
    let min = price * (scale - bps) / scale;
    let max = price * (scale + bps) / scale;
    (min, max)
}

/// Admission-time contract-token derivation: a buyer of base spends quote,
/// a seller of base spends base.
pub fn contract_tokens(side: OrderSide, base: &str, quote: &str) -> (String, String) {
    match side {
        OrderSide::Buy => (quote.to_string(), base.to_string()),
        OrderSide::Sell => (base.to_string(), quote.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_bounds_zero_variance() {
        let (min, max) = price_bounds(dec!(100), 0);
        assert_eq!(min, dec!(100));
        assert_eq!(max, dec!(100));
    }

    #[test]
    fn test_price_bounds_symmetric() {
        let (min, max) = price_bounds(dec!(100), 100);
        assert_eq!(min, dec!(99));
        assert_eq!(max, dec!(101));
    }

    #[test]
    fn test_price_bounds_full_variance() {
        let (min, max) = price_bounds(dec!(50), 10_000);
        assert_eq!(min, dec!(0));
        assert_eq!(max, dec!(100));
    }

    #[test]
    fn test_contract_tokens() {
        let (sell, buy) = contract_tokens(OrderSide::Buy, "WETH", "USDC");
        assert_eq!((sell.as_str(), buy.as_str()), ("USDC", "WETH"));

        let (sell, buy) = contract_tokens(OrderSide::Sell, "WETH", "USDC");
        assert_eq!((sell.as_str(), buy.as_str()), ("WETH", "USDC"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Revealed.is_terminal());
        assert!(OrderStatus::PartiallyFilled.is_active());
    }
}
