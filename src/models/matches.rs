use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Settlement state machine.
///
/// Transitions only move forward: Pending -> Settling -> Settled | Failed.
/// Failed may be reset to Pending by an operator; nothing else moves
/// backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "settlement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Settling,
    Settled,
    Failed,
}

impl SettlementStatus {
    pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, next),
            (Pending, Settling) | (Settling, Settled) | (Settling, Failed) | (Failed, Pending)
        )
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Settling => "settling",
            SettlementStatus::Settled => "settled",
            SettlementStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A single cross of one buy with one sell, created atomically with both
/// orders' fill updates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Match {
    pub id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub base_token: String,
    pub quote_token: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub settlement_status: SettlementStatus,
    pub settlement_error: Option<String>,
    pub matched_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub settlement_tx_hash: Option<String>,
    pub app_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub base_token: String,
    pub quote_token: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub settlement_status: SettlementStatus,
    pub settlement_error: Option<String>,
    pub matched_at_ms: i64,
    pub settled_at_ms: Option<i64>,
    pub settlement_tx_hash: Option<String>,
}

impl From<Match> for MatchResponse {
    fn from(m: Match) -> Self {
        Self {
            id: m.id,
            buy_order_id: m.buy_order_id,
            sell_order_id: m.sell_order_id,
            base_token: m.base_token,
            quote_token: m.quote_token,
            quantity: m.quantity,
            price: m.price,
            settlement_status: m.settlement_status,
            settlement_error: m.settlement_error,
            matched_at_ms: m.matched_at.timestamp_millis(),
            settled_at_ms: m.settled_at.map(|t| t.timestamp_millis()),
            settlement_tx_hash: m.settlement_tx_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        use SettlementStatus::*;
        assert!(Pending.can_transition_to(Settling));
        assert!(Settling.can_transition_to(Settled));
        assert!(Settling.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));

        assert!(!Settled.can_transition_to(Pending));
        assert!(!Settled.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Settled));
        assert!(!Settling.can_transition_to(Pending));
    }
}
