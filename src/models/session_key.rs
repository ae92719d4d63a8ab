use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Owner string used for the engine's own session key row.
pub const ENGINE_OWNER: &str = "engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_key_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionKeyStatus {
    Pending,
    Active,
    Revoked,
}

impl fmt::Display for SessionKeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionKeyStatus::Pending => "pending",
            SessionKeyStatus::Active => "active",
            SessionKeyStatus::Revoked => "revoked",
        };
        write!(f, "{}", s)
    }
}

/// An operational signing key delegated from a wallet to the coordinator.
///
/// At most one Active row exists per (owner, application); the partial
/// unique index in schema.sql backs the invariant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionKey {
    pub id: i64,
    pub owner: String,
    pub address: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub application: String,
    pub allowances: serde_json::Value,
    pub status: SessionKeyStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionKeyStatus::Active && self.expires_at > now
    }
}

/// One spending allowance granted to a session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allowance {
    pub asset: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionKeyRequest {
    pub owner: String,
    pub allowances: Vec<Allowance>,
    pub expires_in_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKeyResponse {
    pub address: String,
    pub application: String,
    pub status: SessionKeyStatus,
    pub expires_at_ms: i64,
}

impl From<SessionKey> for SessionKeyResponse {
    fn from(key: SessionKey) -> Self {
        Self {
            address: key.address,
            application: key.application,
            status: key.status,
            expires_at_ms: key.expires_at.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(status: SessionKeyStatus, expires_at: DateTime<Utc>) -> SessionKey {
        SessionKey {
            id: 1,
            owner: "0xabc".into(),
            address: "0xdef".into(),
            secret: "00".into(),
            application: "darkpool".into(),
            allowances: serde_json::json!([]),
            status,
            expires_at,
            auth_token: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_usability() {
        let now = Utc::now();
        assert!(key(SessionKeyStatus::Active, now + Duration::hours(1)).is_usable(now));
        assert!(!key(SessionKeyStatus::Active, now - Duration::hours(1)).is_usable(now));
        assert!(!key(SessionKeyStatus::Pending, now + Duration::hours(1)).is_usable(now));
        assert!(!key(SessionKeyStatus::Revoked, now + Duration::hours(1)).is_usable(now));
    }
}
