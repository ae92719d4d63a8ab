//! Order-book and match handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::matches;
use crate::models::MatchResponse;
use crate::services::matching::{EngineHealth, OrderBookSnapshot};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OrderBookQuery {
    pub base: String,
    pub quote: String,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    20
}

/// GET /orderbook?base=0x..&quote=0x..
pub async fn get_orderbook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrderBookQuery>,
) -> Result<Json<ApiResponse<OrderBookSnapshot>>, AppError> {
    let depth = query.depth.clamp(1, 100);
    let snapshot = state
        .engine
        .order_book_snapshot(&query.base, &query.quote, depth);
    Ok(Json(ApiResponse::success(snapshot)))
}

#[derive(Debug, Deserialize)]
pub struct ListMatchesQuery {
    pub address: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /matches?address=0x..
pub async fn list_matches(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListMatchesQuery>,
) -> Result<Json<ApiResponse<Vec<MatchResponse>>>, AppError> {
    let limit = query.limit.clamp(1, 200);
    let rows = matches::list_by_user(&state.db.pool, &query.address, limit).await?;
    Ok(Json(ApiResponse::success(
        rows.into_iter().map(MatchResponse::from).collect(),
    )))
}

/// GET /matches/:match_id
pub async fn get_match(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<ApiResponse<MatchResponse>>, AppError> {
    let row = matches::find_by_id(&state.db.pool, match_id)
        .await?
        .ok_or_else(|| AppError::not_found("match not found"))?;
    Ok(Json(ApiResponse::success(row.into())))
}

/// Operator reset of a failed settlement back onto the pending queue.
/// POST /matches/:match_id/retry
pub async fn retry_match(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let reset = matches::reset_failed(&state.db.pool, match_id).await?;
    if reset == 0 {
        return Err(AppError::conflict(
            "NOT_FAILED",
            "match is not in a failed state",
        ));
    }
    tracing::info!(r#match = %match_id, "failed settlement reset to pending");
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub environment: String,
    pub database: bool,
    pub engine: EngineHealth,
}

/// GET /health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        environment: state.config.environment.clone(),
        database: state.db.health_check().await,
        engine: state.engine.health(),
    }))
}
