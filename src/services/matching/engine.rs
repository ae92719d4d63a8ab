//! Matching Engine
//!
//! A fixed pool of worker tasks consumes one shared order channel and one
//! shared cancel channel; match events leave on a bounded channel whose
//! send blocks for backpressure. Admission happens on the submit path so
//! callers see commitment failures synchronously; workers own the matching
//! loop and book mutation.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ethers::types::U256;
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::orderbook::OrderBookSet;
use super::types::*;
use crate::chain::commitment::{parse_address, parse_field_element, CommitmentHasher, OrderDetail};
use crate::chain::custody::{ChainClient, CommitmentStatus};
use crate::db::orders;
use crate::metrics;
use crate::models::{
    contract_tokens, price_bounds, Order, OrderResponse, OrderSide, OrderStatus,
    SubmitOrderRequest,
};
use crate::utils::decimal::decimal_to_units;

/// Hard cap on candidates pulled from the store per incoming order.
const CANDIDATE_BATCH: i64 = 100;

/// Detail quantities and prices are hashed at this fixed-point scale.
const DETAIL_SCALE: u32 = 18;

pub struct EngineConfig {
    pub workers: usize,
    pub order_channel_size: usize,
    pub cancel_channel_size: usize,
    pub match_channel_size: usize,
}

pub struct MatchingEngine {
    books: OrderBookSet,
    pool: PgPool,
    chain: Arc<ChainClient>,
    hasher: Arc<dyn CommitmentHasher>,
    order_tx: mpsc::Sender<Order>,
    cancel_tx: mpsc::Sender<CancelCommand>,
    match_tx: mpsc::Sender<MatchEvent>,
    workers: usize,
}

impl MatchingEngine {
    /// Build the engine and spawn its worker pool. The returned receiver
    /// carries match events; the engine blocks on it when it fills, so the
    /// consumer must keep draining.
    pub fn start(
        config: EngineConfig,
        pool: PgPool,
        chain: Arc<ChainClient>,
        hasher: Arc<dyn CommitmentHasher>,
    ) -> (Arc<Self>, mpsc::Receiver<MatchEvent>) {
        let (order_tx, order_rx) = mpsc::channel(config.order_channel_size);
        let (cancel_tx, cancel_rx) = mpsc::channel(config.cancel_channel_size);
        let (match_tx, match_rx) = mpsc::channel(config.match_channel_size);

        let engine = Arc::new(Self {
            books: OrderBookSet::new(),
            pool,
            chain,
            hasher,
            order_tx,
            cancel_tx,
            match_tx,
            workers: config.workers,
        });

        let order_rx = Arc::new(Mutex::new(order_rx));
        let cancel_rx = Arc::new(Mutex::new(cancel_rx));
        for worker_id in 0..config.workers {
            tokio::spawn(Self::worker_loop(
                engine.clone(),
                order_rx.clone(),
                cancel_rx.clone(),
                worker_id,
            ));
        }

        (engine, match_rx)
    }

    /// Rebuild the in-memory books from the store. Run once before the
    /// gateway opens.
    pub async fn recover_from_store(&self) -> Result<usize, EngineError> {
        let active = orders::active_orders(&self.pool).await?;
        let count = active.len();
        for order in &active {
            self.books
                .book(&order.base_token, &order.quote_token)
                .add(BookOrder::from(order));
        }
        Ok(count)
    }

    /// Admit an order: check the commitment, transition to revealed, push
    /// into the book and hand it to the workers. Fails fast with
    /// `ChannelFull` before touching anything when the engine is saturated.
    pub async fn submit_order(
        &self,
        request: SubmitOrderRequest,
    ) -> Result<OrderResponse, EngineError> {
        validate(&request)?;

        let permit = self
            .order_tx
            .try_reserve()
            .map_err(|_| EngineError::ChannelFull)?;

        let row = orders::find_by_order_id(&self.pool, &request.order_id)
            .await?
            .ok_or_else(|| {
                EngineError::CommitmentMismatch(format!(
                    "no committed order with id {}",
                    request.order_id
                ))
            })?;
        if row.status != OrderStatus::Committed {
            return Err(EngineError::CommitmentMismatch(format!(
                "order {} is {}, not committed",
                request.order_id, row.status
            )));
        }

        let now = now_utc();
        let expires_at = request
            .expires_at
            .map(|secs| {
                Utc.timestamp_opt(secs, 0)
                    .single()
                    .ok_or_else(|| EngineError::Validation("invalid expiry timestamp".into()))
            })
            .transpose()?;
        if let Some(exp) = expires_at {
            if exp <= now {
                orders::mark_expired(&self.pool, row.id).await?;
                return Err(EngineError::Expired);
            }
        }

        let (min_price, max_price) = price_bounds(request.price, request.variance_bps);
        let (sell_token, buy_token) =
            contract_tokens(request.side, &request.base_token, &request.quote_token);

        let detail = OrderDetail {
            owner: parse_address(&row.user_address)?,
            sell_token: parse_address(&sell_token)?,
            buy_token: parse_address(&buy_token)?,
            quantity: decimal_to_units(&request.quantity.normalize().to_string(), DETAIL_SCALE)
                .map_err(crate::chain::ChainError::from)?,
            min_price: decimal_to_units(&min_price.normalize().to_string(), DETAIL_SCALE)
                .map_err(crate::chain::ChainError::from)?,
            max_price: decimal_to_units(&max_price.normalize().to_string(), DETAIL_SCALE)
                .map_err(crate::chain::ChainError::from)?,
            expires_at: U256::from(expires_at.map(|e| e.timestamp()).unwrap_or(0) as u64),
        };
        let detail_hash = self.hasher.hash(&detail);

        let order_id_field = parse_field_element(&request.order_id)
            .map_err(|_| EngineError::Validation("order id is not a field element".into()))?;
        match self.chain.commitment(order_id_field).await? {
            Some(view) => {
                if view.status != CommitmentStatus::Active {
                    return Err(EngineError::CommitmentMismatch(
                        "on-chain commitment is not active".into(),
                    ));
                }
                if view.order_hash != detail_hash {
                    return Err(EngineError::CommitmentMismatch(
                        "revealed detail does not hash to the on-chain commitment".into(),
                    ));
                }
            }
            // Test mode: the stored hash is the only commitment we have
            None => {
                if row.commitment_hash != detail_hash.to_string() {
                    return Err(EngineError::CommitmentMismatch(
                        "revealed detail does not hash to the stored commitment".into(),
                    ));
                }
            }
        }

        let revealed = orders::reveal(
            &self.pool,
            row.id,
            request.side,
            &request.base_token,
            &request.quote_token,
            &sell_token,
            &buy_token,
            request.quantity,
            request.price,
            request.variance_bps,
            min_price,
            max_price,
            expires_at,
        )
        .await?;
        if revealed == 0 {
            return Err(EngineError::CommitmentMismatch(format!(
                "order {} was admitted concurrently",
                request.order_id
            )));
        }

        let order = Order {
            id: row.id,
            order_id: row.order_id,
            user_address: row.user_address,
            chain_id: row.chain_id,
            side: request.side,
            base_token: request.base_token,
            quote_token: request.quote_token,
            sell_token,
            buy_token,
            quantity: request.quantity,
            price: request.price,
            variance_bps: request.variance_bps,
            min_price,
            max_price,
            filled_quantity: rust_decimal::Decimal::ZERO,
            remaining_quantity: request.quantity,
            status: OrderStatus::Revealed,
            commitment_hash: row.commitment_hash,
            created_at: row.created_at,
            expires_at,
        };

        self.books
            .book(&order.base_token, &order.quote_token)
            .add(BookOrder::from(&order));

        metrics::record_order_submitted(&order.side.to_string());
        tracing::info!(
            order = %order.id,
            side = %order.side,
            pair = %format!("{}/{}", order.base_token, order.quote_token),
            price = %order.price,
            quantity = %order.quantity,
            "order admitted"
        );

        let response = OrderResponse::from(order.clone());
        permit.send(order);
        Ok(response)
    }

    /// Cancel an order. Reserves a cancel-channel slot first so a saturated
    /// engine fails fast before any state moves, then runs the conditional
    /// transition and hands the book excision to the workers.
    pub async fn cancel_order(&self, order_id: Uuid, owner: &str) -> Result<(), EngineError> {
        let permit = self
            .cancel_tx
            .try_reserve()
            .map_err(|_| EngineError::ChannelFull)?;

        let updated = orders::cancel(&self.pool, order_id, owner).await?;
        if updated == 0 {
            return match orders::find_by_id(&self.pool, order_id).await? {
                None => Err(EngineError::NotOwner),
                Some(row) if !row.user_address.eq_ignore_ascii_case(owner) => {
                    Err(EngineError::NotOwner)
                }
                Some(_) => Err(EngineError::OrderTerminal),
            };
        }

        metrics::record_order_cancelled();
        tracing::info!(order = %order_id, "order cancelled");
        permit.send(CancelCommand {
            order_id,
            owner: owner.to_lowercase(),
        });
        Ok(())
    }

    pub fn order_book_snapshot(
        &self,
        base_token: &str,
        quote_token: &str,
        depth: usize,
    ) -> OrderBookSnapshot {
        match self.books.get(base_token, quote_token) {
            Some(book) => book.snapshot(depth),
            None => OrderBookSnapshot {
                base_token: base_token.to_string(),
                quote_token: quote_token.to_string(),
                bids: Vec::new(),
                asks: Vec::new(),
                timestamp: Utc::now().timestamp_millis(),
            },
        }
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            books: self.books.book_count(),
            open_orders: self.books.open_orders(),
            workers: self.workers,
        }
    }

    async fn worker_loop(
        engine: Arc<Self>,
        order_rx: Arc<Mutex<mpsc::Receiver<Order>>>,
        cancel_rx: Arc<Mutex<mpsc::Receiver<CancelCommand>>>,
        worker_id: usize,
    ) {
        tracing::debug!(worker = worker_id, "matching worker started");
        loop {
            tokio::select! {
                maybe_order = recv_shared(&order_rx) => {
                    match maybe_order {
                        Some(order) => engine.match_incoming(order, worker_id).await,
                        None => break,
                    }
                }
                maybe_cancel = recv_shared(&cancel_rx) => {
                    match maybe_cancel {
                        Some(command) => {
                            engine.books.remove_anywhere(command.order_id);
                            tracing::debug!(order = %command.order_id, "book entry excised");
                        }
                        None => break,
                    }
                }
            }
        }
        tracing::debug!(worker = worker_id, "matching worker stopped");
    }

    /// Match one incoming order against the canonical candidate set. Each
    /// fill commits independently; a failed fill drops that candidate and
    /// the loop continues.
    async fn match_incoming(&self, incoming: Order, worker_id: usize) {
        let limit_price = match incoming.side {
            OrderSide::Buy => incoming.max_price,
            OrderSide::Sell => incoming.min_price,
        };

        let candidates = match orders::candidates(
            &self.pool,
            &incoming.base_token,
            &incoming.quote_token,
            incoming.side,
            limit_price,
            CANDIDATE_BATCH,
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(worker = worker_id, order = %incoming.id, "candidate query failed: {}", e);
                return;
            }
        };

        let now = now_utc();
        let mut remaining = incoming.remaining_quantity;

        for candidate in candidates {
            if remaining <= rust_decimal::Decimal::ZERO {
                break;
            }
            if candidate.id == incoming.id {
                continue;
            }
            if candidate.is_expired(now) {
                if let Err(e) = orders::mark_expired(&self.pool, candidate.id).await {
                    tracing::warn!(order = %candidate.id, "expiry transition failed: {}", e);
                }
                self.books.remove_anywhere(candidate.id);
                continue;
            }

            let (buy, sell) = match incoming.side {
                OrderSide::Buy => (&incoming, &candidate),
                OrderSide::Sell => (&candidate, &incoming),
            };
            if !compatible(buy.max_price, sell.min_price) {
                continue;
            }

            let price = execution_price(buy.price, sell.price, sell.min_price, buy.max_price);
            let quantity = remaining.min(candidate.remaining_quantity);

            let matched = match crate::db::matches::record_fill(
                &self.pool,
                buy.id,
                sell.id,
                &incoming.base_token,
                &incoming.quote_token,
                quantity,
                price,
            )
            .await
            {
                Ok(matched) => matched,
                Err(e) => {
                    tracing::warn!(
                        worker = worker_id,
                        incoming = %incoming.id,
                        candidate = %candidate.id,
                        "fill transaction failed, dropping candidate: {}",
                        e
                    );
                    continue;
                }
            };

            // The store committed; mirror the fill in memory
            remaining -= quantity;
            let book = self.books.book(&incoming.base_token, &incoming.quote_token);
            book.apply_fill(incoming.id, quantity);
            book.apply_fill(candidate.id, quantity);

            metrics::record_match(&incoming.base_token, &incoming.quote_token);
            tracing::info!(
                worker = worker_id,
                r#match = %matched.id,
                buy = %buy.id,
                sell = %sell.id,
                price = %price,
                quantity = %quantity,
                "orders matched"
            );

            let event = MatchEvent {
                match_id: matched.id,
                buy_order_id: buy.id,
                sell_order_id: sell.id,
                buyer: buy.user_address.clone(),
                seller: sell.user_address.clone(),
                base_token: incoming.base_token.clone(),
                quote_token: incoming.quote_token.clone(),
                quantity,
                price,
                matched_at_ms: matched.matched_at.timestamp_millis(),
            };
            // Backpressure: block until the downstream consumer drains
            if self.match_tx.send(event).await.is_err() {
                tracing::warn!("match channel closed, event dropped");
            }
        }
    }
}

fn validate(request: &SubmitOrderRequest) -> Result<(), EngineError> {
    if request.quantity <= rust_decimal::Decimal::ZERO {
        return Err(EngineError::Validation("quantity must be positive".into()));
    }
    if request.price <= rust_decimal::Decimal::ZERO {
        return Err(EngineError::Validation("price must be positive".into()));
    }
    if !(0..=10_000).contains(&request.variance_bps) {
        return Err(EngineError::Validation(
            "variance must be within [0, 10000] bps".into(),
        ));
    }
    if request.base_token.is_empty() || request.quote_token.is_empty() {
        return Err(EngineError::Validation("token addresses required".into()));
    }
    if request.base_token.eq_ignore_ascii_case(&request.quote_token) {
        return Err(EngineError::Validation(
            "base and quote must differ".into(),
        ));
    }
    parse_field_element(&request.order_id)
        .map_err(|_| EngineError::Validation("order id is not a field element".into()))?;
    Ok(())
}

async fn recv_shared<T>(rx: &Arc<Mutex<mpsc::Receiver<T>>>) -> Option<T> {
    rx.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> SubmitOrderRequest {
        SubmitOrderRequest {
            order_id: "12345".into(),
            side: OrderSide::Buy,
            base_token: "0x00000000000000000000000000000000000000aa".into(),
            quote_token: "0x00000000000000000000000000000000000000bb".into(),
            quantity: dec!(10),
            price: dec!(100),
            variance_bps: 0,
            expires_at: None,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(validate(&request()).is_ok());
    }

    #[test]
    fn test_validate_rejects_nonpositive() {
        let mut bad = request();
        bad.quantity = dec!(0);
        assert!(matches!(validate(&bad), Err(EngineError::Validation(_))));

        let mut bad = request();
        bad.price = dec!(-1);
        assert!(matches!(validate(&bad), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_variance_out_of_range() {
        let mut bad = request();
        bad.variance_bps = 10_001;
        assert!(matches!(validate(&bad), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_same_pair() {
        let mut bad = request();
        bad.quote_token = bad.base_token.clone();
        assert!(matches!(validate(&bad), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_order_id() {
        let mut bad = request();
        bad.order_id = crate::config::SNARK_SCALAR_FIELD.into();
        assert!(matches!(validate(&bad), Err(EngineError::Validation(_))));
    }
}
