//! WebSocket Channel Definitions

use serde::{Deserialize, Serialize};

use crate::services::matching::MatchEvent;
use crate::services::settlement::SettlementEvent;

/// Everything the hub fans out: match events from the engine and
/// settlement-status transitions from the worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    Match(MatchEvent),
    Settlement(SettlementEvent),
}

/// Channel types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// matches:{base}/{quote}
    Matches(String, String),
    /// settlements:{address}
    Settlements(String),
}

impl Channel {
    pub fn parse(channel_str: &str) -> Option<Self> {
        if let Some(pair) = channel_str.strip_prefix("matches:") {
            let (base, quote) = pair.split_once('/')?;
            if base.is_empty() || quote.is_empty() {
                return None;
            }
            return Some(Channel::Matches(base.to_lowercase(), quote.to_lowercase()));
        }
        if let Some(address) = channel_str.strip_prefix("settlements:") {
            if address.is_empty() {
                return None;
            }
            return Some(Channel::Settlements(address.to_lowercase()));
        }
        None
    }

    /// Does this subscription want the given notification?
    pub fn wants(&self, notification: &Notification) -> bool {
        match (self, notification) {
            (Channel::Matches(base, quote), Notification::Match(event)) => {
                event.base_token.eq_ignore_ascii_case(base)
                    && event.quote_token.eq_ignore_ascii_case(quote)
            }
            (Channel::Settlements(address), Notification::Settlement(event)) => {
                event.participant.eq_ignore_ascii_case(address)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Event { payload: Notification },
    Pong,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SettlementStatus;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn match_event(base: &str, quote: &str) -> Notification {
        Notification::Match(MatchEvent {
            match_id: Uuid::new_v4(),
            buy_order_id: Uuid::new_v4(),
            sell_order_id: Uuid::new_v4(),
            buyer: "0xbuyer".into(),
            seller: "0xseller".into(),
            base_token: base.into(),
            quote_token: quote.into(),
            quantity: dec!(1),
            price: dec!(100),
            matched_at_ms: 0,
        })
    }

    #[test]
    fn test_parse_channels() {
        assert_eq!(
            Channel::parse("matches:0xAA/0xBB"),
            Some(Channel::Matches("0xaa".into(), "0xbb".into()))
        );
        assert_eq!(
            Channel::parse("settlements:0xAbC"),
            Some(Channel::Settlements("0xabc".into()))
        );
        assert_eq!(Channel::parse("matches:onlybase"), None);
        assert_eq!(Channel::parse("klines:x"), None);
    }

    #[test]
    fn test_match_routing() {
        let channel = Channel::parse("matches:0xaa/0xbb").unwrap();
        assert!(channel.wants(&match_event("0xAA", "0xBB")));
        assert!(!channel.wants(&match_event("0xAA", "0xCC")));
    }

    #[test]
    fn test_settlement_routing() {
        let channel = Channel::parse("settlements:0xseller").unwrap();
        let event = Notification::Settlement(SettlementEvent {
            match_id: Uuid::new_v4(),
            participant: "0xSELLER".into(),
            status: SettlementStatus::Settled,
            tx_hash: None,
            error: None,
        });
        assert!(channel.wants(&event));
        assert!(!channel.wants(&match_event("0xaa", "0xbb")));
    }
}
