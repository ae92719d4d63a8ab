//! Session-Key Lifecycle
//!
//! A user delegates an operational signing key to the engine in two steps:
//! `create` mints the keypair and fetches a clearing-network challenge, and
//! `activate` presents the wallet's EIP-712 signature over that challenge.
//! The verify must travel on the same connection that issued the challenge,
//! so pending connections are parked here between the two calls.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use serde::Serialize;
use thiserror::Error;

use crate::clearnode::{auth, rpc, ClearnodeError, ClearnodePool, Connection, APPLICATION};
use crate::db::{session_keys, Database};
use crate::models::{Allowance, SessionKey};

const DEFAULT_KEY_TTL_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no pending session for key {0}")]
    NoPendingSession(String),

    #[error("session key not found: {0}")]
    NotFound(String),

    #[error("clearing network error: {0}")]
    Clearnode(#[from] ClearnodeError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// What the wallet must sign to activate a pending key.
#[derive(Debug, Clone, Serialize)]
pub struct SessionChallenge {
    pub session_key_address: String,
    pub challenge: String,
    pub typed_data: serde_json::Value,
    pub expires_at_ms: i64,
}

struct PendingAuth {
    connection: Arc<Connection>,
    challenge: String,
    key_id: i64,
}

pub struct SessionService {
    db: Database,
    clearnode: Arc<ClearnodePool>,
    pending: DashMap<String, PendingAuth>,
}

impl SessionService {
    pub fn new(db: Database, clearnode: Arc<ClearnodePool>) -> Self {
        Self {
            db,
            clearnode,
            pending: DashMap::new(),
        }
    }

    /// Mint a session keypair for `owner` and fetch the activation
    /// challenge. The key stays pending until the wallet signature lands.
    pub async fn create(
        &self,
        owner: &str,
        allowances: Vec<Allowance>,
        expires_in_secs: Option<i64>,
    ) -> Result<SessionChallenge, SessionError> {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let address = format!("{:#x}", wallet.address());
        let secret = hex::encode(wallet.signer().to_bytes());
        let ttl = expires_in_secs.unwrap_or(DEFAULT_KEY_TTL_SECS);
        let expires_at = Utc::now() + ChronoDuration::seconds(ttl);

        let key = session_keys::insert_pending(
            &self.db.pool,
            owner,
            &address,
            &secret,
            APPLICATION,
            &serde_json::to_value(&allowances).unwrap_or_else(|_| serde_json::json!([])),
            expires_at,
        )
        .await?;

        let connection = self.clearnode.open_unauthenticated().await?;
        let challenge = auth::request_challenge(
            &connection,
            owner,
            &address,
            APPLICATION,
            &allowances,
            expires_at,
        )
        .await?;

        let typed_data = serde_json::to_value(auth::policy_typed_data(
            &challenge,
            owner,
            &address,
            expires_at,
            &allowances,
        )?)
        .unwrap_or_default();

        self.pending.insert(
            address.clone(),
            PendingAuth {
                connection,
                challenge: challenge.clone(),
                key_id: key.id,
            },
        );

        Ok(SessionChallenge {
            session_key_address: address,
            challenge,
            typed_data,
            expires_at_ms: expires_at.timestamp_millis(),
        })
    }

    /// Present the wallet's EIP-712 signature and activate the key. The
    /// activation transaction revokes any previously-active key for the
    /// same owner.
    pub async fn activate(
        &self,
        session_key_address: &str,
        signature: &str,
    ) -> Result<SessionKey, SessionError> {
        let address = session_key_address.to_lowercase();
        let (_, pending) = self
            .pending
            .remove(&address)
            .ok_or_else(|| SessionError::NoPendingSession(address.clone()))?;

        let verified =
            auth::verify_challenge(&pending.connection, &pending.challenge, signature).await;
        pending.connection.close().await;
        let token = verified?;
        session_keys::activate(&self.db.pool, pending.key_id, &token).await?;

        session_keys::find_by_address(&self.db.pool, &address)
            .await?
            .ok_or(SessionError::NotFound(address))
    }

    /// Revoke a key on the clearing network (best effort) and locally.
    pub async fn revoke(&self, owner: &str, address: &str) -> Result<(), SessionError> {
        let key = session_keys::find_by_address(&self.db.pool, address)
            .await?
            .filter(|k| k.owner.eq_ignore_ascii_case(owner))
            .ok_or_else(|| SessionError::NotFound(address.to_string()))?;

        match self.clearnode.user_connection(owner).await {
            Ok((conn, wallet)) => {
                if let Err(e) = rpc::revoke_session_key(&conn, &wallet, &key.address).await {
                    tracing::warn!(key = %key.address, "remote revoke failed: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(key = %key.address, "no connection for remote revoke: {}", e);
            }
        }

        session_keys::revoke(&self.db.pool, address).await?;
        Ok(())
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<SessionKey>, SessionError> {
        Ok(session_keys::list_by_owner(&self.db.pool, owner).await?)
    }
}
