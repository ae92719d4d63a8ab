//! Order Book Implementation
//!
//! Per-pair dual-heap book with price-time priority. Heaps hold ordering
//! keys only; fill state lives in the id map, so a fill never re-heapifies
//! anything. Removal tombstones the map entry and stale heap keys are
//! pruned when they surface at the top.

use super::types::{BookOrder, OrderBookSnapshot, PriceLevel};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::OrderSide;

/// Bid ordering key: higher price wins, then earlier arrival, then id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BidKey {
    price: Decimal,
    created_at_ms: i64,
    id: Uuid,
}

impl Ord for BidKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.price
            .cmp(&other.price)
            .then_with(|| other.created_at_ms.cmp(&self.created_at_ms))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for BidKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ask ordering key: lower price wins, then earlier arrival, then id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AskKey {
    price: Decimal,
    created_at_ms: i64,
    id: Uuid,
}

impl Ord for AskKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .price
            .cmp(&self.price)
            .then_with(|| other.created_at_ms.cmp(&self.created_at_ms))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for AskKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct BookInner {
    bids: BinaryHeap<BidKey>,
    asks: BinaryHeap<AskKey>,
    orders: HashMap<Uuid, BookOrder>,
}

/// A single pair's order book. One lock per book; never held across awaits.
pub struct OrderBook {
    pub base_token: String,
    pub quote_token: String,
    inner: RwLock<BookInner>,
}

impl OrderBook {
    pub fn new(base_token: String, quote_token: String) -> Self {
        Self {
            base_token,
            quote_token,
            inner: RwLock::new(BookInner::default()),
        }
    }

    pub fn add(&self, order: BookOrder) {
        let mut inner = self.inner.write();
        match order.side {
            OrderSide::Buy => inner.bids.push(BidKey {
                price: order.price,
                created_at_ms: order.created_at_ms,
                id: order.id,
            }),
            OrderSide::Sell => inner.asks.push(AskKey {
                price: order.price,
                created_at_ms: order.created_at_ms,
                id: order.id,
            }),
        }
        inner.orders.insert(order.id, order);
    }

    /// Excise an order. The heap key stays behind as a tombstone and is
    /// discarded next time it reaches the top.
    pub fn remove(&self, id: Uuid) -> Option<BookOrder> {
        self.inner.write().orders.remove(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<BookOrder> {
        self.inner.read().orders.get(&id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.read().orders.contains_key(&id)
    }

    /// Fold a fill into the entry; fully-filled orders leave the book.
    /// Returns the remaining quantity after the fill.
    pub fn apply_fill(&self, id: Uuid, quantity: Decimal) -> Option<Decimal> {
        let mut inner = self.inner.write();
        let order = inner.orders.get_mut(&id)?;
        order.remaining -= quantity;
        let remaining = order.remaining;
        if remaining <= Decimal::ZERO {
            inner.orders.remove(&id);
        }
        Some(remaining)
    }

    pub fn peek_best_bid(&self) -> Option<BookOrder> {
        let mut inner = self.inner.write();
        loop {
            let id = inner.bids.peek()?.id;
            match inner.orders.get(&id) {
                Some(order) if order.side == OrderSide::Buy => return Some(order.clone()),
                _ => {
                    inner.bids.pop();
                }
            }
        }
    }

    pub fn peek_best_ask(&self) -> Option<BookOrder> {
        let mut inner = self.inner.write();
        loop {
            let id = inner.asks.peek()?.id;
            match inner.orders.get(&id) {
                Some(order) if order.side == OrderSide::Sell => return Some(order.clone()),
                _ => {
                    inner.asks.pop();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate resting orders into price levels, best first on each side.
    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        let inner = self.inner.read();

        let mut bid_levels: BTreeMap<Decimal, (Decimal, usize)> = BTreeMap::new();
        let mut ask_levels: BTreeMap<Decimal, (Decimal, usize)> = BTreeMap::new();
        for order in inner.orders.values() {
            let levels = match order.side {
                OrderSide::Buy => &mut bid_levels,
                OrderSide::Sell => &mut ask_levels,
            };
            let entry = levels.entry(order.price).or_insert((Decimal::ZERO, 0));
            entry.0 += order.remaining;
            entry.1 += 1;
        }

        let to_level = |(price, level): (&Decimal, &(Decimal, usize))| PriceLevel {
            price: *price,
            quantity: level.0,
            order_count: level.1,
        };

        OrderBookSnapshot {
            base_token: self.base_token.clone(),
            quote_token: self.quote_token.clone(),
            bids: bid_levels.iter().rev().take(depth).map(to_level).collect(),
            asks: ask_levels.iter().take(depth).map(to_level).collect(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// The per-pair book set. Creation is lazy and idempotent under concurrent
/// access.
#[derive(Default)]
pub struct OrderBookSet {
    books: DashMap<(String, String), Arc<OrderBook>>,
}

impl OrderBookSet {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    pub fn book(&self, base_token: &str, quote_token: &str) -> Arc<OrderBook> {
        self.books
            .entry((base_token.to_string(), quote_token.to_string()))
            .or_insert_with(|| {
                Arc::new(OrderBook::new(
                    base_token.to_string(),
                    quote_token.to_string(),
                ))
            })
            .clone()
    }

    pub fn get(&self, base_token: &str, quote_token: &str) -> Option<Arc<OrderBook>> {
        self.books
            .get(&(base_token.to_string(), quote_token.to_string()))
            .map(|b| b.clone())
    }

    /// Remove an order without knowing its pair; cancellation is rare
    /// enough that a scan over books is acceptable.
    pub fn remove_anywhere(&self, id: Uuid) -> Option<BookOrder> {
        for book in self.books.iter() {
            if let Some(order) = book.value().remove(id) {
                return Some(order);
            }
        }
        None
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    pub fn open_orders(&self) -> usize {
        self.books.iter().map(|b| b.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(price: Decimal, amount: Decimal, side: OrderSide, created_at_ms: i64) -> BookOrder {
        BookOrder {
            id: Uuid::new_v4(),
            user_address: "0x1234".to_string(),
            side,
            price,
            min_price: price,
            max_price: price,
            quantity: amount,
            remaining: amount,
            created_at_ms,
        }
    }

    #[test]
    fn test_add_and_remove() {
        let book = OrderBook::new("WETH".into(), "USDC".into());
        let order = entry(dec!(100), dec!(1), OrderSide::Buy, 1);
        let id = order.id;

        book.add(order);
        assert_eq!(book.len(), 1);
        assert!(book.contains(id));

        assert!(book.remove(id).is_some());
        assert_eq!(book.len(), 0);
        assert!(book.peek_best_bid().is_none());
    }

    #[test]
    fn test_price_priority() {
        let book = OrderBook::new("WETH".into(), "USDC".into());
        book.add(entry(dec!(100), dec!(1), OrderSide::Buy, 1));
        book.add(entry(dec!(101), dec!(1), OrderSide::Buy, 2));
        book.add(entry(dec!(102), dec!(1), OrderSide::Sell, 1));
        book.add(entry(dec!(103), dec!(1), OrderSide::Sell, 2));

        assert_eq!(book.peek_best_bid().unwrap().price, dec!(101));
        assert_eq!(book.peek_best_ask().unwrap().price, dec!(102));
    }

    #[test]
    fn test_time_priority_on_equal_price() {
        let book = OrderBook::new("WETH".into(), "USDC".into());
        let older = entry(dec!(100), dec!(1), OrderSide::Sell, 10);
        let older_id = older.id;
        let newer = entry(dec!(100), dec!(1), OrderSide::Sell, 20);

        // Insertion order must not matter
        book.add(newer);
        book.add(older);

        assert_eq!(book.peek_best_ask().unwrap().id, older_id);
    }

    #[test]
    fn test_tombstone_pruning() {
        let book = OrderBook::new("WETH".into(), "USDC".into());
        let best = entry(dec!(105), dec!(1), OrderSide::Buy, 1);
        let best_id = best.id;
        let second = entry(dec!(104), dec!(1), OrderSide::Buy, 1);
        let second_id = second.id;

        book.add(best);
        book.add(second);
        book.remove(best_id);

        // The stale heap key for the removed best bid is skipped
        assert_eq!(book.peek_best_bid().unwrap().id, second_id);
    }

    #[test]
    fn test_fill_visibility_without_reinsert() {
        let book = OrderBook::new("WETH".into(), "USDC".into());
        let order = entry(dec!(100), dec!(10), OrderSide::Sell, 1);
        let id = order.id;
        book.add(order);

        assert_eq!(book.apply_fill(id, dec!(4)), Some(dec!(6)));
        assert_eq!(book.peek_best_ask().unwrap().remaining, dec!(6));

        // Filling the rest removes the order entirely
        assert_eq!(book.apply_fill(id, dec!(6)), Some(dec!(0)));
        assert!(!book.contains(id));
        assert!(book.peek_best_ask().is_none());
    }

    #[test]
    fn test_snapshot_levels() {
        let book = OrderBook::new("WETH".into(), "USDC".into());
        book.add(entry(dec!(100), dec!(1), OrderSide::Buy, 1));
        book.add(entry(dec!(100), dec!(2), OrderSide::Buy, 2));
        book.add(entry(dec!(99), dec!(5), OrderSide::Buy, 3));
        book.add(entry(dec!(102), dec!(1.5), OrderSide::Sell, 4));

        let snap = book.snapshot(10);
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.bids[0].price, dec!(100));
        assert_eq!(snap.bids[0].quantity, dec!(3));
        assert_eq!(snap.bids[0].order_count, 2);
        assert_eq!(snap.bids[1].price, dec!(99));
        assert_eq!(snap.asks.len(), 1);
        assert_eq!(snap.asks[0].quantity, dec!(1.5));
    }

    #[test]
    fn test_lazy_book_creation_idempotent() {
        let set = OrderBookSet::new();
        let a = set.book("WETH", "USDC");
        let b = set.book("WETH", "USDC");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(set.book_count(), 1);
    }

    #[test]
    fn test_partial_fill_sequencing() {
        // A resting 100 @ 50 sell crossed by a 60 buy, then a 50 buy:
        // first cross fills 60, second fills the remaining 40
        let book = OrderBook::new("WETH".into(), "USDC".into());
        let sell = entry(dec!(50), dec!(100), OrderSide::Sell, 1);
        let sell_id = sell.id;
        book.add(sell);

        let first = dec!(60).min(book.peek_best_ask().unwrap().remaining);
        assert_eq!(first, dec!(60));
        assert_eq!(book.apply_fill(sell_id, first), Some(dec!(40)));

        let second = dec!(50).min(book.peek_best_ask().unwrap().remaining);
        assert_eq!(second, dec!(40));
        assert_eq!(book.apply_fill(sell_id, second), Some(dec!(0)));
        assert!(book.peek_best_ask().is_none());
    }

    #[test]
    fn test_remove_anywhere() {
        let set = OrderBookSet::new();
        let order = entry(dec!(100), dec!(1), OrderSide::Buy, 1);
        let id = order.id;
        set.book("WETH", "USDC").add(order);
        set.book("WBTC", "USDC");

        assert!(set.remove_anywhere(id).is_some());
        assert!(set.remove_anywhere(id).is_none());
        assert_eq!(set.open_orders(), 0);
    }
}
