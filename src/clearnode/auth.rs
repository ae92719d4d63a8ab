//! Clearing-network authentication.
//!
//! Two-phase: an `auth_request` returns a challenge, the delegating wallet
//! signs it as EIP-712 Policy typed data, and `auth_verify` exchanges the
//! signature for a bearer token. Reconnects on the same session key present
//! the cached token instead of asking the wallet again.

use chrono::{DateTime, Utc};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip712::TypedData;
use serde_json::json;

use super::connection::{parse_payload, Connection};
use super::types::{
    AuthChallenge, AuthRequestParams, AuthResult, AuthVerifyParams, METHOD_AUTH_JWT,
    METHOD_AUTH_REQUEST, METHOD_AUTH_VERIFY,
};
use super::ClearnodeError;
use crate::models::Allowance;

pub const AUTH_SCOPE: &str = "trading";
pub const EIP712_DOMAIN_NAME: &str = "darkpool";

/// Build the Policy typed data the delegating wallet signs.
pub fn policy_typed_data(
    challenge: &str,
    wallet: &str,
    session_key: &str,
    expire: DateTime<Utc>,
    allowances: &[Allowance],
) -> Result<TypedData, ClearnodeError> {
    let allowance_values: Vec<serde_json::Value> = allowances
        .iter()
        .map(|a| json!({"asset": a.asset, "amount": a.amount}))
        .collect();

    let raw = json!({
        "types": {
            "EIP712Domain": [
                {"name": "name", "type": "string"}
            ],
            "Policy": [
                {"name": "challenge", "type": "string"},
                {"name": "scope", "type": "string"},
                {"name": "wallet", "type": "address"},
                {"name": "session_key", "type": "address"},
                {"name": "expire", "type": "string"},
                {"name": "allowances", "type": "Allowance[]"}
            ],
            "Allowance": [
                {"name": "asset", "type": "string"},
                {"name": "amount", "type": "string"}
            ]
        },
        "primaryType": "Policy",
        "domain": {"name": EIP712_DOMAIN_NAME},
        "message": {
            "challenge": challenge,
            "scope": AUTH_SCOPE,
            "wallet": wallet,
            "session_key": session_key,
            "expire": expire.timestamp().to_string(),
            "allowances": allowance_values
        }
    });

    serde_json::from_value(raw).map_err(|e| ClearnodeError::Protocol(e.to_string()))
}

/// Phase one: ask for a challenge scoped to (wallet, session key).
pub async fn request_challenge(
    conn: &Connection,
    wallet_address: &str,
    session_key_address: &str,
    application: &str,
    allowances: &[Allowance],
    expire: DateTime<Utc>,
) -> Result<String, ClearnodeError> {
    let params = AuthRequestParams {
        address: wallet_address.to_string(),
        session_key: session_key_address.to_string(),
        application: application.to_string(),
        allowances: allowances.to_vec(),
        expire: expire.timestamp().to_string(),
        scope: AUTH_SCOPE.to_string(),
    };

    let payload = conn
        .request(
            METHOD_AUTH_REQUEST,
            json!([serde_json::to_value(&params).map_err(|e| ClearnodeError::Protocol(e.to_string()))?]),
            None,
        )
        .await?;
    let challenge: AuthChallenge = parse_payload(payload)?;
    Ok(challenge.challenge_message)
}

/// Phase two: present the wallet's EIP-712 signature over the Policy and
/// receive a bearer token.
pub async fn verify_challenge(
    conn: &Connection,
    challenge: &str,
    eip712_signature: &str,
) -> Result<String, ClearnodeError> {
    let params = AuthVerifyParams {
        challenge: challenge.to_string(),
    };
    let payload = conn
        .request_with_sigs(
            METHOD_AUTH_VERIFY,
            json!([serde_json::to_value(&params).map_err(|e| ClearnodeError::Protocol(e.to_string()))?]),
            vec![eip712_signature.to_string()],
            conn.default_timeout(),
        )
        .await?;

    let result: AuthResult = parse_payload(payload)?;
    if !result.success {
        return Err(ClearnodeError::Unauthenticated(format!(
            "verification rejected for {}",
            result.address
        )));
    }
    result
        .jwt_token
        .ok_or_else(|| ClearnodeError::Unauthenticated("no token in auth result".to_string()))
}

/// Full challenge flow signed by the delegating wallet.
pub async fn authenticate_with_wallet(
    conn: &Connection,
    wallet: &LocalWallet,
    session_key_address: &str,
    application: &str,
    allowances: &[Allowance],
    expire: DateTime<Utc>,
) -> Result<String, ClearnodeError> {
    let wallet_address = format!("{:#x}", wallet.address());
    let challenge = request_challenge(
        conn,
        &wallet_address,
        session_key_address,
        application,
        allowances,
        expire,
    )
    .await?;

    let typed_data = policy_typed_data(
        &challenge,
        &wallet_address,
        session_key_address,
        expire,
        allowances,
    )?;
    let signature = wallet
        .sign_typed_data(&typed_data)
        .await
        .map_err(|e| ClearnodeError::Signing(e.to_string()))?;

    verify_challenge(conn, &challenge, &format!("0x{}", signature)).await
}

/// Token fast path: re-authenticate a fresh socket with a cached bearer
/// token, no wallet involvement.
pub async fn authenticate_with_token(
    conn: &Connection,
    token: &str,
) -> Result<(), ClearnodeError> {
    let payload = conn
        .request(METHOD_AUTH_JWT, json!([{"jwt": token}]), None)
        .await?;
    let result: AuthResult = parse_payload(payload)?;
    if !result.success {
        return Err(ClearnodeError::Unauthenticated(
            "cached token rejected".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::transaction::eip712::Eip712;

    fn allowances() -> Vec<Allowance> {
        vec![Allowance {
            asset: "usdc".to_string(),
            amount: "1000".to_string(),
        }]
    }

    #[test]
    fn test_policy_typed_data_builds() {
        let expire = Utc::now();
        let typed = policy_typed_data(
            "challenge-123",
            "0x1111111111111111111111111111111111111111",
            "0x2222222222222222222222222222222222222222",
            expire,
            &allowances(),
        )
        .unwrap();
        assert_eq!(typed.primary_type, "Policy");
        assert!(typed.encode_eip712().is_ok());
    }

    #[test]
    fn test_policy_digest_binds_challenge() {
        let expire = Utc::now();
        let wallet = "0x1111111111111111111111111111111111111111";
        let key = "0x2222222222222222222222222222222222222222";

        let a = policy_typed_data("challenge-a", wallet, key, expire, &allowances())
            .unwrap()
            .encode_eip712()
            .unwrap();
        let b = policy_typed_data("challenge-b", wallet, key, expire, &allowances())
            .unwrap()
            .encode_eip712()
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_policy_digest_stable() {
        let expire = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let wallet = "0x1111111111111111111111111111111111111111";
        let key = "0x2222222222222222222222222222222222222222";

        let a = policy_typed_data("challenge", wallet, key, expire, &allowances())
            .unwrap()
            .encode_eip712()
            .unwrap();
        let b = policy_typed_data("challenge", wallet, key, expire, &allowances())
            .unwrap()
            .encode_eip712()
            .unwrap();
        assert_eq!(a, b);
    }
}
