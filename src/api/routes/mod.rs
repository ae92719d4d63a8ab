use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::AppState;

pub fn create_router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        // Orders
        .route("/orders/commit", post(handlers::order::commit_order))
        .route("/orders", post(handlers::order::submit_order))
        .route("/orders", get(handlers::order::list_orders))
        .route("/orders/:order_id", get(handlers::order::get_order))
        .route("/orders/:order_id", delete(handlers::order::cancel_order))
        // Matches & book
        .route("/matches", get(handlers::market::list_matches))
        .route("/matches/:match_id", get(handlers::market::get_match))
        .route("/matches/:match_id/retry", post(handlers::market::retry_match))
        .route("/orderbook", get(handlers::market::get_orderbook))
        // Session keys
        .route("/session-keys", post(handlers::session::create_session_key))
        .route("/session-keys", get(handlers::session::list_session_keys))
        .route(
            "/session-keys/:address/activate",
            post(handlers::session::activate_session_key),
        )
        .route(
            "/session-keys/:address",
            delete(handlers::session::revoke_session_key),
        )
        // Channels & balances
        .route("/channels", get(handlers::channel::list_channels))
        .route("/channels", post(handlers::channel::create_channel))
        .route("/channels/deposit", post(handlers::channel::deposit))
        .route(
            "/channels/:channel_id/resize",
            post(handlers::channel::resize_channel),
        )
        .route("/balances", get(handlers::channel::get_ledger_balances))
}
