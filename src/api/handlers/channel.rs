//! Channel and balance handlers.
//!
//! Channels live on the clearing network; the router contract only sees the
//! opaque encoded states the network hands back. When no router is
//! configured the on-chain leg is skipped and the network response is
//! returned as-is.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clearnode::rpc;
use crate::clearnode::types::{CreateChannelResponse, ResizeChannelParams};
use crate::models::LedgerBalance;
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner: String,
}

/// GET /channels?owner=0x..
pub async fn list_channels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let (conn, key) = state.clearnode.user_connection(&query.owner).await?;
    let channels = rpc::list_channels(&conn, &key, &query.owner).await?;
    Ok(Json(ApiResponse::success(
        serde_json::to_value(channels).unwrap_or_default(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub owner: String,
    pub token: String,
    pub chain_id: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateChannelResult {
    #[serde(flatten)]
    pub network: CreateChannelResponse,
    pub tx_hash: Option<String>,
}

/// POST /channels
pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<Json<ApiResponse<CreateChannelResult>>, AppError> {
    let (conn, key) = state.clearnode.user_connection(&req.owner).await?;
    let network =
        rpc::create_channel(&conn, &key, &req.owner, &req.token, req.chain_id).await?;

    // Submit the counter-signed state on-chain when the router is wired
    let tx_hash = match (&network.encoded_params, &network.encoded_state) {
        (Some(params), Some(initial_state)) => {
            let params = parse_hex(params)?;
            let initial_state = parse_hex(initial_state)?;
            state
                .chain
                .channel_create(params, initial_state)
                .await
                .map_err(|e| AppError::internal(&e.to_string()))?
        }
        _ => None,
    };

    Ok(Json(ApiResponse::success(CreateChannelResult {
        network,
        tx_hash,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ResizeChannelRequest {
    pub owner: String,
    pub resize_amount: String,
    pub allocate_amount: String,
}

/// POST /channels/:channel_id/resize
pub async fn resize_channel(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Json(req): Json<ResizeChannelRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let (conn, key) = state.clearnode.user_connection(&req.owner).await?;
    let params = ResizeChannelParams {
        channel_id: channel_id.clone(),
        resize_amount: req.resize_amount,
        allocate_amount: req.allocate_amount,
        funds_destination: req.owner.clone(),
    };
    // The returned state and any delta-allocation bookkeeping inside it are
    // opaque; they pass through to the caller untouched
    let payload = rpc::resize_channel(&conn, &key, &params).await?;

    // When the network hands back an encoded candidate state, submit it to
    // the router contract (skipped without a router)
    if let Some(encoded_state) = payload.get("encoded_state").and_then(|v| v.as_str()) {
        let id_bytes = parse_hex(&channel_id)?;
        let id: [u8; 32] = id_bytes
            .to_vec()
            .try_into()
            .map_err(|_| AppError::bad_request("channel id must be 32 bytes"))?;
        let candidate = parse_hex(encoded_state)?;
        let proofs = payload
            .get("proof_states")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(parse_hex)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();
        state
            .chain
            .channel_resize(id, candidate, proofs)
            .await
            .map_err(|e| AppError::internal(&e.to_string()))?;
    }

    Ok(Json(ApiResponse::success(payload)))
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub owner: String,
    pub token: String,
    pub amount: String,
}

/// On-chain deposit into the channel router.
/// POST /channels/deposit
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<ApiResponse<Option<String>>>, AppError> {
    let user = req
        .owner
        .parse::<Address>()
        .map_err(|_| AppError::bad_request("owner must be a 0x address"))?;
    let token = req
        .token
        .parse::<Address>()
        .map_err(|_| AppError::bad_request("token must be a 0x address"))?;
    let amount = U256::from_dec_str(&req.amount)
        .map_err(|_| AppError::bad_request("amount must be a decimal integer"))?;

    let tx_hash = state
        .chain
        .channel_deposit(user, token, amount)
        .await
        .map_err(|e| AppError::internal(&e.to_string()))?;
    Ok(Json(ApiResponse::success(tx_hash)))
}

/// GET /balances?owner=0x..
pub async fn get_ledger_balances(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<ApiResponse<Vec<LedgerBalance>>>, AppError> {
    let (conn, key) = state.clearnode.user_connection(&query.owner).await?;
    let balances = rpc::get_ledger_balances(&conn, &key, &query.owner).await?;
    Ok(Json(ApiResponse::success(balances)))
}

fn parse_hex(value: &str) -> Result<Bytes, AppError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let raw = hex::decode(stripped)
        .map_err(|_| AppError::bad_request("invalid hex payload from network"))?;
    Ok(Bytes::from(raw))
}
