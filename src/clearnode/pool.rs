//! Connection pool.
//!
//! One process-wide engine connection, supervised with exponential-backoff
//! reconnect and token re-auth, plus per-user connections opened lazily when
//! a user-scoped operation arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use rand::Rng;

use super::auth;
use super::connection::Connection;
use super::{ClearnodeError, APPLICATION};
use crate::db::{session_keys, Database};
use crate::models::{SessionKey, ENGINE_OWNER};

/// Engine session keys are rotated well before this horizon in practice;
/// the row-level expiry is the hard stop.
const ENGINE_KEY_TTL_DAYS: i64 = 30;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);

pub struct ClearnodePool {
    url: String,
    ping_interval: Duration,
    response_timeout: Duration,
    engine_wallet: LocalWallet,
    db: Database,
    engine: tokio::sync::RwLock<Option<Arc<Connection>>>,
    users: DashMap<String, Arc<Connection>>,
    shutting_down: AtomicBool,
}

impl ClearnodePool {
    pub fn new(
        url: String,
        ping_interval: Duration,
        response_timeout: Duration,
        engine_wallet_key: &str,
        db: Database,
    ) -> Result<Arc<Self>, ClearnodeError> {
        let engine_wallet = engine_wallet_key
            .parse::<LocalWallet>()
            .map_err(|e| ClearnodeError::Signing(e.to_string()))?;

        Ok(Arc::new(Self {
            url,
            ping_interval,
            response_timeout,
            engine_wallet,
            db,
            engine: tokio::sync::RwLock::new(None),
            users: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn engine_wallet(&self) -> &LocalWallet {
        &self.engine_wallet
    }

    async fn open_socket(&self) -> Result<Arc<Connection>, ClearnodeError> {
        Connection::open(&self.url, self.ping_interval, self.response_timeout).await
    }

    /// A fresh unauthenticated socket, used by the session-creation flow
    /// whose challenge and verify must share one connection.
    pub async fn open_unauthenticated(&self) -> Result<Arc<Connection>, ClearnodeError> {
        self.open_socket().await
    }

    /// The authenticated engine connection, re-established on demand.
    pub async fn engine_connection(self: &Arc<Self>) -> Result<Arc<Connection>, ClearnodeError> {
        {
            let guard = self.engine.read().await;
            if let Some(conn) = guard.as_ref() {
                if conn.is_open() {
                    return Ok(conn.clone());
                }
            }
        }
        self.init_engine().await
    }

    /// Connect and authenticate the engine connection, creating the engine
    /// session key row on first boot. Spawns the reconnect supervisor.
    pub async fn init_engine(self: &Arc<Self>) -> Result<Arc<Connection>, ClearnodeError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ClearnodeError::ConnectionClosed);
        }

        let mut guard = self.engine.write().await;
        if let Some(conn) = guard.as_ref() {
            if conn.is_open() {
                return Ok(conn.clone());
            }
        }

        let conn = self.open_socket().await?;
        let key = self.ensure_engine_key().await?;
        self.authenticate(&conn, &key, &self.engine_wallet).await?;

        *guard = Some(conn.clone());
        drop(guard);

        self.spawn_engine_supervisor(conn.clone());
        tracing::info!("engine clearnode connection established");
        Ok(conn)
    }

    /// Authenticate a socket for a session key: cached-token fast path
    /// first, full wallet challenge flow when the token is missing or
    /// rejected.
    async fn authenticate(
        &self,
        conn: &Connection,
        key: &SessionKey,
        wallet: &LocalWallet,
    ) -> Result<(), ClearnodeError> {
        if let Some(token) = key.auth_token.as_deref().filter(|t| !t.is_empty()) {
            match auth::authenticate_with_token(conn, token).await {
                Ok(()) => return Ok(()),
                Err(ClearnodeError::Unauthenticated(_)) => {
                    tracing::debug!(owner = %key.owner, "cached token rejected, re-running challenge");
                }
                Err(other) => return Err(other),
            }
        }

        let allowances: Vec<crate::models::Allowance> =
            serde_json::from_value(key.allowances.clone()).unwrap_or_default();
        let token = auth::authenticate_with_wallet(
            conn,
            wallet,
            &key.address,
            &key.application,
            &allowances,
            key.expires_at,
        )
        .await?;

        session_keys::set_auth_token(&self.db.pool, key.id, &token)
            .await
            .map_err(|e| ClearnodeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Load the active engine session key, minting one on first boot.
    async fn ensure_engine_key(&self) -> Result<SessionKey, ClearnodeError> {
        if let Some(key) = session_keys::active_for(&self.db.pool, ENGINE_OWNER, APPLICATION)
            .await
            .map_err(|e| ClearnodeError::Storage(e.to_string()))?
        {
            return Ok(key);
        }

        let session_wallet = LocalWallet::new(&mut rand::thread_rng());
        let secret = hex::encode(session_wallet.signer().to_bytes());
        let address = format!("{:#x}", session_wallet.address());
        let expires_at = Utc::now() + ChronoDuration::days(ENGINE_KEY_TTL_DAYS);

        let key = session_keys::insert_pending(
            &self.db.pool,
            ENGINE_OWNER,
            &address,
            &secret,
            APPLICATION,
            &serde_json::json!([]),
            expires_at,
        )
        .await
        .map_err(|e| ClearnodeError::Storage(e.to_string()))?;

        session_keys::activate(&self.db.pool, key.id, "")
            .await
            .map_err(|e| ClearnodeError::Storage(e.to_string()))?;

        session_keys::find_by_address(&self.db.pool, &address)
            .await
            .map_err(|e| ClearnodeError::Storage(e.to_string()))?
            .ok_or_else(|| ClearnodeError::Storage("engine key vanished after insert".to_string()))
    }

    fn spawn_engine_supervisor(self: &Arc<Self>, conn: Arc<Connection>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            conn.wait_closed().await;
            if pool.shutting_down.load(Ordering::Acquire) {
                return;
            }
            tracing::warn!("engine clearnode connection lost, reconnecting");

            let mut delay = RECONNECT_BASE;
            loop {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                tokio::time::sleep(delay + jitter).await;
                if pool.shutting_down.load(Ordering::Acquire) {
                    return;
                }
                match pool.init_engine().await {
                    Ok(_) => {
                        crate::metrics::record_clearnode_reconnect();
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("engine reconnect failed: {}, backing off", e);
                        delay = (delay * 2).min(RECONNECT_CAP);
                    }
                }
            }
        });
    }

    /// The user's authenticated connection plus their session signing key.
    /// Opened lazily; requires an active session key with a cached token.
    pub async fn user_connection(
        &self,
        owner: &str,
    ) -> Result<(Arc<Connection>, LocalWallet), ClearnodeError> {
        let owner = owner.to_lowercase();
        let key = session_keys::active_for(&self.db.pool, &owner, APPLICATION)
            .await
            .map_err(|e| ClearnodeError::Storage(e.to_string()))?
            .ok_or_else(|| {
                ClearnodeError::Unauthenticated(format!("no active session key for {}", owner))
            })?;
        let wallet = key
            .secret
            .parse::<LocalWallet>()
            .map_err(|e| ClearnodeError::Signing(e.to_string()))?;

        if let Some(existing) = self.users.get(&owner) {
            if existing.is_open() {
                return Ok((existing.clone(), wallet));
            }
        }
        self.users.remove(&owner);

        let token = key
            .auth_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ClearnodeError::Unauthenticated(format!("no cached token for {}", owner))
            })?;

        let conn = self.open_socket().await?;
        auth::authenticate_with_token(&conn, &token).await?;
        self.users.insert(owner, conn.clone());
        Ok((conn, wallet))
    }

    /// Session signing wallet for the engine's own key.
    pub async fn engine_session_wallet(&self) -> Result<LocalWallet, ClearnodeError> {
        let key = session_keys::active_for(&self.db.pool, ENGINE_OWNER, APPLICATION)
            .await
            .map_err(|e| ClearnodeError::Storage(e.to_string()))?
            .ok_or_else(|| {
                ClearnodeError::Unauthenticated("no active engine session key".to_string())
            })?;
        key.secret
            .parse::<LocalWallet>()
            .map_err(|e| ClearnodeError::Signing(e.to_string()))
    }

    /// Close every connection; supervisors observe the flag and stand down.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);

        if let Some(conn) = self.engine.write().await.take() {
            conn.close().await;
        }
        let users: Vec<Arc<Connection>> = self.users.iter().map(|e| e.value().clone()).collect();
        self.users.clear();
        for conn in users {
            conn.close().await;
        }
    }
}
