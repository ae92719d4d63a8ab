//! Session-key queries.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::SessionKey;

#[allow(clippy::too_many_arguments)]
pub async fn insert_pending(
    pool: &PgPool,
    owner: &str,
    address: &str,
    secret: &str,
    application: &str,
    allowances: &serde_json::Value,
    expires_at: DateTime<Utc>,
) -> Result<SessionKey, sqlx::Error> {
    sqlx::query_as::<_, SessionKey>(
        r#"
        INSERT INTO session_keys (owner, address, secret, application, allowances, status, expires_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6)
        RETURNING *
        "#,
    )
    .bind(owner.to_lowercase())
    .bind(address.to_lowercase())
    .bind(secret)
    .bind(application)
    .bind(allowances)
    .bind(expires_at)
    .fetch_one(pool)
    .await
}

/// Activate a verified key. Runs in one transaction that first revokes any
/// currently-active key for the same (owner, application), keeping the
/// at-most-one-active invariant even under concurrent activations.
pub async fn activate(pool: &PgPool, id: i64, auth_token: &str) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE session_keys SET status = 'revoked'
        WHERE status = 'active'
          AND (owner, application) = (SELECT owner, application FROM session_keys WHERE id = $1)
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE session_keys SET status = 'active', auth_token = $2
        WHERE id = $1 AND status = 'pending' AND expires_at > NOW()
        "#,
    )
    .bind(id)
    .bind(auth_token)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.rows_affected())
}

pub async fn revoke(pool: &PgPool, address: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE session_keys SET status = 'revoked' WHERE address = $1 AND status != 'revoked'",
    )
    .bind(address.to_lowercase())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// The usable key for an owner: active and not expired.
pub async fn active_for(
    pool: &PgPool,
    owner: &str,
    application: &str,
) -> Result<Option<SessionKey>, sqlx::Error> {
    sqlx::query_as::<_, SessionKey>(
        r#"
        SELECT * FROM session_keys
        WHERE owner = $1 AND application = $2 AND status = 'active' AND expires_at > NOW()
        "#,
    )
    .bind(owner.to_lowercase())
    .bind(application)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_address(
    pool: &PgPool,
    address: &str,
) -> Result<Option<SessionKey>, sqlx::Error> {
    sqlx::query_as::<_, SessionKey>("SELECT * FROM session_keys WHERE address = $1")
        .bind(address.to_lowercase())
        .fetch_optional(pool)
        .await
}

/// Cache the clearing-network bearer token for reconnect fast-path auth.
pub async fn set_auth_token(pool: &PgPool, id: i64, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE session_keys SET auth_token = $2 WHERE id = $1")
        .bind(id)
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_by_owner(
    pool: &PgPool,
    owner: &str,
) -> Result<Vec<SessionKey>, sqlx::Error> {
    sqlx::query_as::<_, SessionKey>(
        "SELECT * FROM session_keys WHERE owner = $1 ORDER BY created_at DESC",
    )
    .bind(owner.to_lowercase())
    .fetch_all(pool)
    .await
}
