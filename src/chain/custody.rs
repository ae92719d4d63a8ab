//! Custody contract client.

use std::sync::Arc;

use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};

use super::ChainError;
use crate::config::AppConfig;

abigen!(
    Custody,
    r#"[
        function commitments(uint256 id) external view returns (address user, uint256 orderHash, uint256 timestamp, uint256 settledAmount, uint8 status)
        function commitOnly(uint256 id, uint256 hash) external
        function depositAndCommit(address token, uint256 amount, uint256 id, uint256 hash) external
        function proveAndSettle(uint256 sellerId, uint256 buyerId, uint256 sellerFill, uint256 buyerFill, uint256[2] proofA, uint256[2][2] proofB, uint256[2] proofC, uint256[7] publicInputs) external
        function markFullySettled(uint256 id) external
        function withdraw(address token, uint256 amount) external
    ]"#
);

abigen!(
    ChannelRouter,
    r#"[
        function create(bytes params, bytes initialState) external returns (bytes32 channelId)
        function deposit(address user, address token, uint256 amount) external
        function resize(bytes32 channelId, bytes candidateState, bytes[] proofStates) external
    ]"#
);

type ChainMiddleware = SignerMiddleware<Provider<Http>, LocalWallet>;

/// On-chain commitment record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentStatus {
    Inactive,
    Active,
    FullySettled,
}

impl From<u8> for CommitmentStatus {
    fn from(raw: u8) -> Self {
        match raw {
            1 => CommitmentStatus::Active,
            2 => CommitmentStatus::FullySettled,
            _ => CommitmentStatus::Inactive,
        }
    }
}

/// One `commitments(id)` view result.
#[derive(Debug, Clone)]
pub struct CommitmentView {
    pub user: Address,
    pub order_hash: U256,
    pub timestamp: U256,
    pub settled_amount: U256,
    pub status: CommitmentStatus,
}

/// Client over the custody contract and channel router.
///
/// Holds `None` contracts when the addresses are not configured; every call
/// then reports `Disabled` (views return `Ok(None)`), which is how test mode
/// skips the on-chain steps.
pub struct ChainClient {
    custody: Option<Custody<ChainMiddleware>>,
    router: Option<ChannelRouter<ChainMiddleware>>,
}

impl ChainClient {
    pub fn new(config: &AppConfig) -> Result<Self, ChainError> {
        let custody_address = match &config.custody_address {
            Some(addr) => Some(
                addr.parse::<Address>()
                    .map_err(|_| ChainError::InvalidAddress(addr.clone()))?,
            ),
            None => None,
        };
        let router_address = match &config.router_address {
            Some(addr) => Some(
                addr.parse::<Address>()
                    .map_err(|_| ChainError::InvalidAddress(addr.clone()))?,
            ),
            None => None,
        };

        let (custody, router) = if custody_address.is_some() || router_address.is_some() {
            let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
                .map_err(|e| ChainError::Rpc(e.to_string()))?;
            let wallet = config
                .engine_wallet_key
                .parse::<LocalWallet>()
                .map_err(|_| ChainError::InvalidKey)?
                .with_chain_id(config.chain_id as u64);
            let middleware = Arc::new(SignerMiddleware::new(provider, wallet));

            (
                custody_address.map(|addr| Custody::new(addr, middleware.clone())),
                router_address.map(|addr| ChannelRouter::new(addr, middleware)),
            )
        } else {
            (None, None)
        };

        Ok(Self { custody, router })
    }

    pub fn is_enabled(&self) -> bool {
        self.custody.is_some()
    }

    /// Read the commitment record for an order id. `Ok(None)` in test mode.
    pub async fn commitment(&self, order_id: U256) -> Result<Option<CommitmentView>, ChainError> {
        let Some(custody) = &self.custody else {
            return Ok(None);
        };

        let (user, order_hash, timestamp, settled_amount, status) = custody
            .commitments(order_id)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(Some(CommitmentView {
            user,
            order_hash,
            timestamp,
            settled_amount,
            status: CommitmentStatus::from(status),
        }))
    }

    /// Submit `proveAndSettle` and wait for the receipt. A reverted receipt
    /// is fatal for the match being settled.
    #[allow(clippy::too_many_arguments)]
    pub async fn prove_and_settle(
        &self,
        seller_id: U256,
        buyer_id: U256,
        seller_fill: U256,
        buyer_fill: U256,
        proof_a: [U256; 2],
        proof_b: [[U256; 2]; 2],
        proof_c: [U256; 2],
        public_inputs: [U256; 7],
    ) -> Result<Option<String>, ChainError> {
        let Some(custody) = &self.custody else {
            return Ok(None);
        };

        let call = custody.prove_and_settle(
            seller_id,
            buyer_id,
            seller_fill,
            buyer_fill,
            proof_a,
            proof_b,
            proof_c,
            public_inputs,
        );
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Reverted(e.to_string()))?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or_else(|| ChainError::Rpc("transaction dropped from mempool".to_string()))?;

        if receipt.status != Some(1.into()) {
            return Err(ChainError::Reverted(format!(
                "proveAndSettle reverted in tx {:?}",
                receipt.transaction_hash
            )));
        }
        Ok(Some(format!("{:?}", receipt.transaction_hash)))
    }

    /// Mark an order fully settled. Skips the call when the commitment is
    /// already past Active, so retries never surface the contract's
    /// double-call rejection as a new failure.
    pub async fn mark_fully_settled(&self, order_id: U256) -> Result<Option<String>, ChainError> {
        let Some(custody) = &self.custody else {
            return Ok(None);
        };

        if let Some(view) = self.commitment(order_id).await? {
            if view.status != CommitmentStatus::Active {
                return Ok(None);
            }
        }

        let call = custody.mark_fully_settled(order_id);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Reverted(e.to_string()))?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or_else(|| ChainError::Rpc("transaction dropped from mempool".to_string()))?;

        if receipt.status != Some(1.into()) {
            return Err(ChainError::Reverted(format!(
                "markFullySettled reverted in tx {:?}",
                receipt.transaction_hash
            )));
        }
        Ok(Some(format!("{:?}", receipt.transaction_hash)))
    }

    pub async fn channel_deposit(
        &self,
        user: Address,
        token: Address,
        amount: U256,
    ) -> Result<Option<String>, ChainError> {
        let Some(router) = &self.router else {
            return Ok(None);
        };

        let call = router.deposit(user, token, amount);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Reverted(e.to_string()))?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or_else(|| ChainError::Rpc("transaction dropped from mempool".to_string()))?;
        Ok(Some(format!("{:?}", receipt.transaction_hash)))
    }

    /// Submit a counter-signed channel state to the router. The state bytes
    /// are opaque to the engine; the clearing network produced them.
    pub async fn channel_create(
        &self,
        params: Bytes,
        initial_state: Bytes,
    ) -> Result<Option<String>, ChainError> {
        let Some(router) = &self.router else {
            return Ok(None);
        };

        let call = router.create(params, initial_state);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Reverted(e.to_string()))?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or_else(|| ChainError::Rpc("transaction dropped from mempool".to_string()))?;
        Ok(Some(format!("{:?}", receipt.transaction_hash)))
    }

    pub async fn channel_resize(
        &self,
        channel_id: [u8; 32],
        candidate_state: Bytes,
        proof_states: Vec<Bytes>,
    ) -> Result<Option<String>, ChainError> {
        let Some(router) = &self.router else {
            return Ok(None);
        };

        let call = router.resize(channel_id, candidate_state, proof_states);
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Reverted(e.to_string()))?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or_else(|| ChainError::Rpc("transaction dropped from mempool".to_string()))?;
        Ok(Some(format!("{:?}", receipt.transaction_hash)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_status_decoding() {
        assert_eq!(CommitmentStatus::from(0), CommitmentStatus::Inactive);
        assert_eq!(CommitmentStatus::from(1), CommitmentStatus::Active);
        assert_eq!(CommitmentStatus::from(2), CommitmentStatus::FullySettled);
        assert_eq!(CommitmentStatus::from(7), CommitmentStatus::Inactive);
    }
}
