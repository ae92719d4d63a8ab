//! Settlement Worker
//!
//! Polls for pending matches and drives each through the settlement state
//! machine: claim, prove, settle on-chain, swap funds in an off-chain app
//! session, finalize. Financial effect is forward-only; any failure marks
//! the match failed and stops, and retries are operator-driven. The proof's
//! public inputs are bound to the on-chain cumulative settled amounts, so a
//! replayed or stale proof can never settle the same fill twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::U256;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chain::commitment::{parse_address, parse_field_element, OrderDetail};
use crate::chain::custody::ChainClient;
use crate::chain::prover::{
    ProofPrivateInputs, ProofPublicInputs, ProofRequest, ProverClient,
};
use crate::chain::ChainError;
use crate::clearnode::types::{
    AppAllocation, AppDefinition, CloseAppSessionParams, CreateAppSessionParams,
};
use crate::clearnode::{rpc, AssetMap, ClearnodeError, ClearnodePool, APPLICATION};
use crate::db::{matches, orders, session_keys};
use crate::metrics;
use crate::models::{Match, Order, SettlementStatus};
use crate::utils::decimal::{decimal_to_units, mul_decimal_str, DecimalError};

/// Settlement worker errors. Every variant fails the match it occurred in;
/// the error text is persisted on the row.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("order {0} not found")]
    MissingOrder(Uuid),

    #[error("no active session key for {0}")]
    MissingSessionKey(String),

    #[error("no symbol for token {0}")]
    UnknownAsset(String),

    #[error("no on-chain commitment for order id {0}")]
    MissingCommitment(String),

    #[error("prover returned no proof")]
    ProofMissing,

    #[error("invalid session key secret for {0}")]
    InvalidSessionSecret(String),

    #[error("decimal error: {0}")]
    Decimal(#[from] DecimalError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("clearing network error: {0}")]
    Clearnode(#[from] ClearnodeError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Settlement notification, one per participant per transition.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementEvent {
    pub match_id: Uuid,
    pub participant: String,
    pub status: SettlementStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

pub struct SettlementConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

pub struct SettlementWorker {
    pool: PgPool,
    clearnode: Arc<ClearnodePool>,
    assets: Arc<AssetMap>,
    chain: Arc<ChainClient>,
    prover: Arc<ProverClient>,
    event_tx: mpsc::Sender<SettlementEvent>,
    batch_size: i64,
}

impl SettlementWorker {
    /// Spawn the polling loop. The returned receiver carries settlement
    /// notifications; the handle aborts the poller at shutdown.
    pub fn start(
        config: SettlementConfig,
        pool: PgPool,
        clearnode: Arc<ClearnodePool>,
        assets: Arc<AssetMap>,
        chain: Arc<ChainClient>,
        prover: Arc<ProverClient>,
    ) -> (mpsc::Receiver<SettlementEvent>, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let worker = Arc::new(Self {
            pool,
            clearnode,
            assets,
            chain,
            prover,
            event_tx,
            batch_size: config.batch_size,
        });

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!("settlement worker started");
            loop {
                ticker.tick().await;
                if let Err(e) = worker.poll_cycle().await {
                    tracing::error!("settlement poll cycle failed: {}", e);
                }
            }
        });

        (event_rx, handle)
    }

    /// One cycle: claim up to `batch_size` pending matches and settle the
    /// claimed ones concurrently. Losing the claim race just skips.
    async fn poll_cycle(&self) -> Result<(), sqlx::Error> {
        let pending = matches::pending(&self.pool, self.batch_size).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut claimed = Vec::new();
        for m in pending {
            if matches::claim(&self.pool, m.id).await? == 1 {
                claimed.push(m);
            } else {
                tracing::debug!(r#match = %m.id, "claim lost, skipping");
            }
        }

        futures::future::join_all(claimed.into_iter().map(|m| self.settle(m))).await;
        Ok(())
    }

    async fn settle(&self, m: Match) {
        let started = Instant::now();
        let match_id = m.id;
        match self.settle_claimed(&m).await {
            Ok((buyer, seller, tx_hash)) => {
                if let Err(e) = matches::mark_settled(&self.pool, match_id).await {
                    tracing::error!(r#match = %match_id, "settled transition failed: {}", e);
                    return;
                }
                metrics::record_settlement_completed(started.elapsed().as_secs_f64());
                tracing::info!(r#match = %match_id, "settlement complete");
                self.notify(match_id, &buyer, SettlementStatus::Settled, tx_hash.clone(), None)
                    .await;
                self.notify(match_id, &seller, SettlementStatus::Settled, tx_hash, None)
                    .await;
            }
            Err(e) => {
                let text = e.to_string();
                if let Err(db_err) = matches::mark_failed(&self.pool, match_id, &text).await {
                    tracing::error!(r#match = %match_id, "failed transition failed: {}", db_err);
                }
                metrics::record_settlement_failed();
                tracing::warn!(r#match = %match_id, "settlement failed: {}", text);

                // Participants hear about the failure too, when the orders
                // are still loadable
                if let Ok(Some(buy)) = orders::find_by_id(&self.pool, m.buy_order_id).await {
                    self.notify(
                        match_id,
                        &buy.user_address,
                        SettlementStatus::Failed,
                        None,
                        Some(text.clone()),
                    )
                    .await;
                }
                if let Ok(Some(sell)) = orders::find_by_id(&self.pool, m.sell_order_id).await {
                    self.notify(
                        match_id,
                        &sell.user_address,
                        SettlementStatus::Failed,
                        None,
                        Some(text),
                    )
                    .await;
                }
            }
        }
    }

    /// The per-match pipeline. Returns (buyer, seller, tx hash) on success.
    async fn settle_claimed(
        &self,
        m: &Match,
    ) -> Result<(String, String, Option<String>), SettlementError> {
        // 1. Load both orders and the three signing keys
        let buy = orders::find_by_id(&self.pool, m.buy_order_id)
            .await?
            .ok_or(SettlementError::MissingOrder(m.buy_order_id))?;
        let sell = orders::find_by_id(&self.pool, m.sell_order_id)
            .await?
            .ok_or(SettlementError::MissingOrder(m.sell_order_id))?;

        let buyer_wallet = self.session_wallet(&buy.user_address).await?;
        let seller_wallet = self.session_wallet(&sell.user_address).await?;
        let engine_wallet = self.clearnode.engine_session_wallet().await?;

        // 2. Resolve token symbols from the cached asset map
        let base_asset = self
            .assets
            .get(&m.base_token)
            .ok_or_else(|| SettlementError::UnknownAsset(m.base_token.clone()))?
            .clone();
        let quote_asset = self
            .assets
            .get(&m.quote_token)
            .ok_or_else(|| SettlementError::UnknownAsset(m.quote_token.clone()))?
            .clone();

        // 3. quote = quantity x price, exact string arithmetic
        let base_amount = m.quantity.normalize().to_string();
        let quote_amount = mul_decimal_str(&base_amount, &m.price.normalize().to_string())?;

        let seller_fill = decimal_to_units(&base_amount, base_asset.decimals)?;
        let buyer_fill = decimal_to_units(&quote_amount, quote_asset.decimals)?;

        // 4-7. Prove and settle on-chain (skipped entirely in test mode)
        let tx_hash = if self.chain.is_enabled() {
            Some(
                self.prove_and_settle_on_chain(m, &buy, &sell, seller_fill, buyer_fill)
                    .await?,
            )
        } else {
            None
        };
        if let Some(hash) = &tx_hash {
            matches::set_tx_hash(&self.pool, m.id, hash).await?;
        }

        // 8. Open the app session: the two traders fund it, the engine judges
        let engine_address = format!("{:#x}", engine_wallet.address());
        let participants = vec![
            sell.user_address.clone(),
            buy.user_address.clone(),
            engine_address.clone(),
        ];
        let definition = AppDefinition {
            protocol: "darkpool-settlement".to_string(),
            participants: participants.clone(),
            weights: vec![0, 0, 100],
            quorum: 100,
            challenge: 86_400,
            nonce: Utc::now().timestamp_millis() as u64,
        };
        let open_allocations = vec![
            AppAllocation {
                participant: sell.user_address.clone(),
                asset: base_asset.symbol.clone(),
                amount: base_amount.clone(),
            },
            AppAllocation {
                participant: buy.user_address.clone(),
                asset: quote_asset.symbol.clone(),
                amount: quote_amount.clone(),
            },
            AppAllocation {
                participant: engine_address.clone(),
                asset: quote_asset.symbol.clone(),
                amount: "0".to_string(),
            },
        ];

        let conn = self.clearnode.engine_connection().await?;
        let session_id = rpc::create_app_session(
            &conn,
            &[&seller_wallet, &buyer_wallet, &engine_wallet],
            &CreateAppSessionParams {
                definition,
                allocations: open_allocations,
            },
        )
        .await?;
        matches::set_app_session(&self.pool, m.id, &session_id).await?;

        // 9. Close with the swapped allocations
        let close_allocations = vec![
            AppAllocation {
                participant: sell.user_address.clone(),
                asset: quote_asset.symbol.clone(),
                amount: quote_amount.clone(),
            },
            AppAllocation {
                participant: buy.user_address.clone(),
                asset: base_asset.symbol.clone(),
                amount: base_amount.clone(),
            },
            AppAllocation {
                participant: engine_address,
                asset: quote_asset.symbol.clone(),
                amount: "0".to_string(),
            },
        ];
        rpc::close_app_session(
            &conn,
            &engine_wallet,
            &CloseAppSessionParams {
                app_session_id: session_id,
                allocations: close_allocations,
            },
        )
        .await?;

        // 10. Fully-consumed orders get their commitments retired
        for order in [&buy, &sell] {
            if order_fully_filled(&self.pool, order.id).await? {
                let order_id = parse_field_element(&order.order_id)?;
                self.chain.mark_fully_settled(order_id).await?;
            }
        }

        Ok((buy.user_address, sell.user_address, tx_hash))
    }

    /// Steps 4-7: read both settled amounts, generate the proof bound to
    /// them, submit, and return the tx hash.
    async fn prove_and_settle_on_chain(
        &self,
        m: &Match,
        buy: &Order,
        sell: &Order,
        seller_fill: U256,
        buyer_fill: U256,
    ) -> Result<String, SettlementError> {
        let seller_id = parse_field_element(&sell.order_id)?;
        let buyer_id = parse_field_element(&buy.order_id)?;

        // Public inputs carry the current cumulative settled amounts; a
        // crashed or retried settlement regenerates against fresh values
        let seller_view = self
            .chain
            .commitment(seller_id)
            .await?
            .ok_or_else(|| SettlementError::MissingCommitment(sell.order_id.clone()))?;
        let buyer_view = self
            .chain
            .commitment(buyer_id)
            .await?
            .ok_or_else(|| SettlementError::MissingCommitment(buy.order_id.clone()))?;

        let timestamp = Utc::now().timestamp() as u64;
        let public_inputs = ProofPublicInputs {
            seller_commitment: seller_view.order_hash.to_string(),
            buyer_commitment: buyer_view.order_hash.to_string(),
            seller_fill: seller_fill.to_string(),
            buyer_fill: buyer_fill.to_string(),
            seller_settled: seller_view.settled_amount.to_string(),
            buyer_settled: buyer_view.settled_amount.to_string(),
            timestamp: timestamp.to_string(),
        };
        let private_inputs =
            ProofPrivateInputs::from_details(&order_detail(sell)?, &order_detail(buy)?);

        let proof = self
            .prover
            .generate(&ProofRequest {
                public_inputs: public_inputs.clone(),
                private_inputs,
            })
            .await?
            .ok_or(SettlementError::ProofMissing)?;
        let (proof_a, proof_b, proof_c) = proof.to_contract_form()?;

        let tx_hash = self
            .chain
            .prove_and_settle(
                seller_id,
                buyer_id,
                seller_fill,
                buyer_fill,
                proof_a,
                proof_b,
                proof_c,
                public_inputs.to_field_array()?,
            )
            .await?
            .ok_or(SettlementError::ProofMissing)?;

        tracing::info!(r#match = %m.id, tx = %tx_hash, "proveAndSettle confirmed");
        Ok(tx_hash)
    }

    async fn session_wallet(&self, owner: &str) -> Result<LocalWallet, SettlementError> {
        let key = session_keys::active_for(&self.pool, owner, APPLICATION)
            .await?
            .ok_or_else(|| SettlementError::MissingSessionKey(owner.to_string()))?;
        key.secret
            .parse::<LocalWallet>()
            .map_err(|_| SettlementError::InvalidSessionSecret(owner.to_string()))
    }

    async fn notify(
        &self,
        match_id: Uuid,
        participant: &str,
        status: SettlementStatus,
        tx_hash: Option<String>,
        error: Option<String>,
    ) {
        let event = SettlementEvent {
            match_id,
            participant: participant.to_string(),
            status,
            tx_hash,
            error,
        };
        if self.event_tx.send(event).await.is_err() {
            tracing::warn!("settlement event channel closed");
        }
    }
}

/// Rebuild the detail tuple the owner originally committed to.
fn order_detail(order: &Order) -> Result<OrderDetail, SettlementError> {
    const DETAIL_SCALE: u32 = 18;
    Ok(OrderDetail {
        owner: parse_address(&order.user_address)?,
        sell_token: parse_address(&order.sell_token)?,
        buy_token: parse_address(&order.buy_token)?,
        quantity: decimal_to_units(&order.quantity.normalize().to_string(), DETAIL_SCALE)?,
        min_price: decimal_to_units(&order.min_price.normalize().to_string(), DETAIL_SCALE)?,
        max_price: decimal_to_units(&order.max_price.normalize().to_string(), DETAIL_SCALE)?,
        expires_at: U256::from(order.expires_at.map(|e| e.timestamp()).unwrap_or(0) as u64),
    })
}

/// Re-read the order's remaining quantity; matched-at snapshots go stale
/// while settlement runs.
async fn order_fully_filled(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let remaining: Option<rust_decimal::Decimal> =
        sqlx::query_scalar("SELECT remaining_quantity FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(remaining.map(|r| r <= rust_decimal::Decimal::ZERO).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_amount_examples() {
        assert_eq!(mul_decimal_str("10", "100").unwrap(), "1000");
        assert_eq!(mul_decimal_str("0.5", "101").unwrap(), "50.5");
    }

    #[test]
    fn test_error_text_is_descriptive() {
        let e = SettlementError::MissingSessionKey("0xabc".into());
        assert!(e.to_string().contains("0xabc"));

        let e = SettlementError::UnknownAsset("0xdef".into());
        assert!(e.to_string().contains("0xdef"));
    }
}
