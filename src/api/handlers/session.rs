//! Session-key handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{CreateSessionKeyRequest, SessionKeyResponse};
use crate::services::session::SessionChallenge;
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

/// Mint a pending session key and return the activation challenge.
/// POST /session-keys
pub async fn create_session_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionKeyRequest>,
) -> Result<Json<ApiResponse<SessionChallenge>>, AppError> {
    if !req.owner.starts_with("0x") {
        return Err(AppError::bad_request("owner must be a 0x address"));
    }
    let challenge = state
        .sessions
        .create(&req.owner, req.allowances, req.expires_in_secs)
        .await?;
    Ok(Json(ApiResponse::success(challenge)))
}

#[derive(Debug, Deserialize)]
pub struct ActivateSessionKeyRequest {
    pub signature: String,
}

/// Activate a pending key with the wallet's EIP-712 signature.
/// POST /session-keys/:address/activate
pub async fn activate_session_key(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Json(req): Json<ActivateSessionKeyRequest>,
) -> Result<Json<ApiResponse<SessionKeyResponse>>, AppError> {
    let key = state.sessions.activate(&address, &req.signature).await?;
    Ok(Json(ApiResponse::success(key.into())))
}

#[derive(Debug, Deserialize)]
pub struct RevokeSessionKeyRequest {
    pub owner: String,
}

/// DELETE /session-keys/:address
pub async fn revoke_session_key(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Json(req): Json<RevokeSessionKeyRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.sessions.revoke(&req.owner, &address).await?;
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionKeysQuery {
    pub owner: String,
}

/// GET /session-keys?owner=0x..
pub async fn list_session_keys(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSessionKeysQuery>,
) -> Result<Json<ApiResponse<Vec<SessionKeyResponse>>>, AppError> {
    let keys = state.sessions.list(&query.owner).await?;
    Ok(Json(ApiResponse::success(
        keys.into_iter().map(SessionKeyResponse::from).collect(),
    )))
}
