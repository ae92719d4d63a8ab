//! Order queries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Order, OrderSide};

/// Record an on-chain commitment. The detail columns stay at their defaults
/// until the reveal; the row is what admission checks for.
pub async fn insert_committed(
    pool: &PgPool,
    order_id: &str,
    user_address: &str,
    chain_id: i64,
    commitment_hash: &str,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO orders (order_id, user_address, chain_id, commitment_hash, status)
        VALUES ($1, $2, $3, $4, 'committed')
        RETURNING id
        "#,
    )
    .bind(order_id)
    .bind(user_address.to_lowercase())
    .bind(chain_id)
    .bind(commitment_hash)
    .fetch_one(pool)
    .await
}

pub async fn find_by_order_id(pool: &PgPool, order_id: &str) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Admit a committed order into the book: write the revealed detail and move
/// the row to `revealed`. Zero rows affected means the order was never
/// committed or was already admitted.
#[allow(clippy::too_many_arguments)]
pub async fn reveal(
    pool: &PgPool,
    id: Uuid,
    side: OrderSide,
    base_token: &str,
    quote_token: &str,
    sell_token: &str,
    buy_token: &str,
    quantity: Decimal,
    price: Decimal,
    variance_bps: i32,
    min_price: Decimal,
    max_price: Decimal,
    expires_at: Option<DateTime<Utc>>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET side = $2, base_token = $3, quote_token = $4,
            sell_token = $5, buy_token = $6,
            quantity = $7, price = $8, variance_bps = $9,
            min_price = $10, max_price = $11,
            remaining_quantity = $7, filled_quantity = 0,
            expires_at = $12, status = 'revealed'
        WHERE id = $1 AND status = 'committed'
        "#,
    )
    .bind(id)
    .bind(side)
    .bind(base_token)
    .bind(quote_token)
    .bind(sell_token)
    .bind(buy_token)
    .bind(quantity)
    .bind(price)
    .bind(variance_bps)
    .bind(min_price)
    .bind(max_price)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Opposing-side candidates for an incoming order, best price first, oldest
/// first, hard-capped. The store is canonical here so a late-joining worker
/// sees the same set as everyone else.
pub async fn candidates(
    pool: &PgPool,
    base_token: &str,
    quote_token: &str,
    incoming_side: OrderSide,
    limit_price: Decimal,
    cap: i64,
) -> Result<Vec<Order>, sqlx::Error> {
    match incoming_side {
        // Incoming buy matches sells whose floor is within the buyer's ceiling
        OrderSide::Buy => {
            sqlx::query_as::<_, Order>(
                r#"
                SELECT * FROM orders
                WHERE base_token = $1 AND quote_token = $2
                  AND side = 'sell'
                  AND status IN ('revealed', 'partially_filled')
                  AND min_price <= $3
                ORDER BY price ASC, created_at ASC
                LIMIT $4
                "#,
            )
            .bind(base_token)
            .bind(quote_token)
            .bind(limit_price)
            .bind(cap)
            .fetch_all(pool)
            .await
        }
        // Incoming sell matches buys whose ceiling reaches the seller's floor
        OrderSide::Sell => {
            sqlx::query_as::<_, Order>(
                r#"
                SELECT * FROM orders
                WHERE base_token = $1 AND quote_token = $2
                  AND side = 'buy'
                  AND status IN ('revealed', 'partially_filled')
                  AND max_price >= $3
                ORDER BY price DESC, created_at ASC
                LIMIT $4
                "#,
            )
            .bind(base_token)
            .bind(quote_token)
            .bind(limit_price)
            .bind(cap)
            .fetch_all(pool)
            .await
        }
    }
}

/// Conditional cancel. Zero rows affected means the caller is not the owner
/// or the order already reached a terminal status.
pub async fn cancel(pool: &PgPool, id: Uuid, owner: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE orders SET status = 'cancelled'
        WHERE id = $1 AND user_address = $2
          AND status IN ('revealed', 'partially_filled')
        "#,
    )
    .bind(id)
    .bind(owner.to_lowercase())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_expired(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE orders SET status = 'expired'
        WHERE id = $1 AND status IN ('committed', 'revealed', 'partially_filled')
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Every order that should hold a book entry; used to rebuild books on boot.
pub async fn active_orders(pool: &PgPool) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE status IN ('revealed', 'partially_filled')
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn list_by_user(
    pool: &PgPool,
    user_address: &str,
    limit: i64,
) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE user_address = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_address.to_lowercase())
    .bind(limit)
    .fetch_all(pool)
    .await
}
