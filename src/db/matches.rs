//! Match queries and the atomic fill write.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Match;

/// Persist one match in a single transaction: insert the match row as
/// `pending` and fold the fill into both orders. The fill updates carry a
/// remaining-quantity guard; a concurrent fill that depleted either side
/// makes the whole write roll back with `RowNotFound`, which the caller
/// treats as losing the candidate.
pub async fn record_fill(
    pool: &PgPool,
    buy_order_id: Uuid,
    sell_order_id: Uuid,
    base_token: &str,
    quote_token: &str,
    quantity: Decimal,
    price: Decimal,
) -> Result<Match, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let matched: Match = sqlx::query_as::<_, Match>(
        r#"
        INSERT INTO matches (buy_order_id, sell_order_id, base_token, quote_token,
                             quantity, price, settlement_status)
        VALUES ($1, $2, $3, $4, $5, $6, 'pending')
        RETURNING *
        "#,
    )
    .bind(buy_order_id)
    .bind(sell_order_id)
    .bind(base_token)
    .bind(quote_token)
    .bind(quantity)
    .bind(price)
    .fetch_one(&mut *tx)
    .await?;

    for order_id in [buy_order_id, sell_order_id] {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET filled_quantity = filled_quantity + $2,
                remaining_quantity = remaining_quantity - $2,
                status = CASE
                    WHEN remaining_quantity - $2 <= 0 THEN 'filled'::order_status
                    ELSE 'partially_filled'::order_status
                END
            WHERE id = $1
              AND status IN ('revealed', 'partially_filled')
              AND remaining_quantity >= $2
            "#,
        )
        .bind(order_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(sqlx::Error::RowNotFound);
        }
    }

    tx.commit().await?;
    Ok(matched)
}

/// Claim a pending match for settlement. Zero rows affected means another
/// worker won the race or the match already finished.
pub async fn claim(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE matches SET settlement_status = 'settling' WHERE id = $1 AND settlement_status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn pending(pool: &PgPool, limit: i64) -> Result<Vec<Match>, sqlx::Error> {
    sqlx::query_as::<_, Match>(
        r#"
        SELECT * FROM matches
        WHERE settlement_status = 'pending'
        ORDER BY matched_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn set_tx_hash(pool: &PgPool, id: Uuid, tx_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE matches SET settlement_tx_hash = $2 WHERE id = $1")
        .bind(id)
        .bind(tx_hash)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_app_session(pool: &PgPool, id: Uuid, session_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE matches SET app_session_id = $2 WHERE id = $1")
        .bind(id)
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_settled(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE matches
        SET settlement_status = 'settled', settled_at = $2, settlement_error = NULL
        WHERE id = $1 AND settlement_status = 'settling'
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE matches
        SET settlement_status = 'failed', settlement_error = $2
        WHERE id = $1 AND settlement_status = 'settling'
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Operator-driven retry: a failed match goes back to the pending queue.
pub async fn reset_failed(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE matches
        SET settlement_status = 'pending', settlement_error = NULL
        WHERE id = $1 AND settlement_status = 'failed'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Match>, sqlx::Error> {
    sqlx::query_as::<_, Match>("SELECT * FROM matches WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Matches where the user owns either side.
pub async fn list_by_user(
    pool: &PgPool,
    user_address: &str,
    limit: i64,
) -> Result<Vec<Match>, sqlx::Error> {
    sqlx::query_as::<_, Match>(
        r#"
        SELECT m.* FROM matches m
        JOIN orders b ON b.id = m.buy_order_id
        JOIN orders s ON s.id = m.sell_order_id
        WHERE b.user_address = $1 OR s.user_address = $1
        ORDER BY m.matched_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_address.to_lowercase())
    .bind(limit)
    .fetch_all(pool)
    .await
}
