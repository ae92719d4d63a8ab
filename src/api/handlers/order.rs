//! Order API Handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::chain::commitment::parse_field_element;
use crate::db::orders;
use crate::models::{OrderResponse, SubmitOrderRequest};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CommitOrderRequest {
    pub order_id: String,
    pub user_address: String,
    pub chain_id: i64,
    pub commitment_hash: String,
}

#[derive(Debug, Serialize)]
pub struct CommitOrderResponse {
    pub id: Uuid,
    pub order_id: String,
}

/// Record an on-chain commitment ahead of the reveal.
/// POST /orders/commit
pub async fn commit_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommitOrderRequest>,
) -> Result<Json<ApiResponse<CommitOrderResponse>>, AppError> {
    parse_field_element(&req.order_id)
        .map_err(|_| AppError::bad_request("order_id is not a field element"))?;
    parse_field_element(&req.commitment_hash)
        .map_err(|_| AppError::bad_request("commitment_hash is not a field element"))?;
    if !req.user_address.starts_with("0x") {
        return Err(AppError::bad_request("user_address must be a 0x address"));
    }

    let id = orders::insert_committed(
        &state.db.pool,
        &req.order_id,
        &req.user_address,
        req.chain_id,
        &req.commitment_hash,
    )
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::conflict("DUPLICATE_COMMITMENT", "order id already committed")
        }
        other => other.into(),
    })?;

    Ok(Json(ApiResponse::success(CommitOrderResponse {
        id,
        order_id: req.order_id,
    })))
}

/// Reveal an order to the engine.
/// POST /orders
pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let response = state.engine.submit_order(req).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderBody {
    pub owner: String,
}

/// Cancel an active order.
/// DELETE /orders/:order_id
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CancelOrderBody>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.engine.cancel_order(order_id, &body.owner).await?;
    Ok(Json(ApiResponse::success(())))
}

/// GET /orders/:order_id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = orders::find_by_id(&state.db.pool, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("order not found"))?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub address: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /orders?address=0x..
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, AppError> {
    let limit = query.limit.clamp(1, 200);
    let rows = orders::list_by_user(&state.db.pool, &query.address, limit).await?;
    Ok(Json(ApiResponse::success(
        rows.into_iter().map(OrderResponse::from).collect(),
    )))
}
