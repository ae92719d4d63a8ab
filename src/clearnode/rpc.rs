//! Typed clearing-network operations.

use std::time::Duration;

use ethers::signers::LocalWallet;
use serde_json::json;

use super::connection::{parse_payload, Connection};
use super::types::*;
use super::ClearnodeError;
use crate::models::{Asset, LedgerBalance};

/// Channel resizes settle slower than everything else on the network.
const RESIZE_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn list_assets(conn: &Connection, chain_id: i64) -> Result<Vec<Asset>, ClearnodeError> {
    let payload = conn
        .request(METHOD_GET_ASSETS, json!([{"chain_id": chain_id}]), None)
        .await?;

    #[derive(serde::Deserialize)]
    struct AssetsPayload {
        assets: Vec<AssetEntry>,
    }
    let parsed: AssetsPayload = parse_payload(payload)?;
    Ok(parsed
        .assets
        .into_iter()
        .map(|entry| Asset {
            chain_id: entry.chain_id,
            token: entry.token.to_lowercase(),
            symbol: entry.symbol,
            decimals: entry.decimals,
        })
        .collect())
}

pub async fn list_channels(
    conn: &Connection,
    key: &LocalWallet,
    owner: &str,
) -> Result<Vec<ChannelInfo>, ClearnodeError> {
    let payload = conn
        .request(METHOD_GET_CHANNELS, json!([{"participant": owner}]), Some(key))
        .await?;

    #[derive(serde::Deserialize)]
    struct ChannelsPayload {
        channels: Vec<ChannelInfo>,
    }
    let parsed: ChannelsPayload = parse_payload(payload)?;
    Ok(parsed.channels)
}

/// Ask the network to prepare a channel. The response carries a signable
/// state payload and the network's counter-signature; submitting it on-chain
/// is the caller's business.
pub async fn create_channel(
    conn: &Connection,
    key: &LocalWallet,
    owner: &str,
    token: &str,
    chain_id: i64,
) -> Result<CreateChannelResponse, ClearnodeError> {
    let payload = conn
        .request(
            METHOD_CREATE_CHANNEL,
            json!([{"participant": owner, "token": token, "chain_id": chain_id}]),
            Some(key),
        )
        .await?;
    parse_payload(payload)
}

pub async fn resize_channel(
    conn: &Connection,
    key: &LocalWallet,
    params: &ResizeChannelParams,
) -> Result<serde_json::Value, ClearnodeError> {
    let value =
        serde_json::to_value(params).map_err(|e| ClearnodeError::Protocol(e.to_string()))?;
    conn.request_signed_by(METHOD_RESIZE_CHANNEL, json!([value]), &[key], RESIZE_TIMEOUT)
        .await
}

pub async fn get_ledger_balances(
    conn: &Connection,
    key: &LocalWallet,
    owner: &str,
) -> Result<Vec<LedgerBalance>, ClearnodeError> {
    let payload = conn
        .request(
            METHOD_GET_LEDGER_BALANCES,
            json!([{"participant": owner}]),
            Some(key),
        )
        .await?;

    #[derive(serde::Deserialize)]
    struct BalancesPayload {
        ledger_balances: Vec<LedgerBalance>,
    }
    let parsed: BalancesPayload = parse_payload(payload)?;
    Ok(parsed.ledger_balances)
}

/// Open an app session. The creation payload is signed by every wallet in
/// `signers` (seller and buyer session keys, then the engine key submitting
/// on its own connection); signature order follows participant order.
pub async fn create_app_session(
    conn: &Connection,
    signers: &[&LocalWallet],
    params: &CreateAppSessionParams,
) -> Result<String, ClearnodeError> {
    let value =
        serde_json::to_value(params).map_err(|e| ClearnodeError::Protocol(e.to_string()))?;
    let payload = conn
        .request_signed_by(
            METHOD_CREATE_APP_SESSION,
            json!([value]),
            signers,
            conn.default_timeout(),
        )
        .await?;
    let parsed: AppSessionResponse = parse_payload(payload)?;
    Ok(parsed.app_session_id)
}

/// Close an app session with final allocations; judged by the engine key.
pub async fn close_app_session(
    conn: &Connection,
    engine_key: &LocalWallet,
    params: &CloseAppSessionParams,
) -> Result<String, ClearnodeError> {
    let value =
        serde_json::to_value(params).map_err(|e| ClearnodeError::Protocol(e.to_string()))?;
    let payload = conn
        .request(METHOD_CLOSE_APP_SESSION, json!([value]), Some(engine_key))
        .await?;
    let parsed: AppSessionResponse = parse_payload(payload)?;
    Ok(parsed.status)
}

pub async fn revoke_session_key(
    conn: &Connection,
    key: &LocalWallet,
    key_address: &str,
) -> Result<(), ClearnodeError> {
    conn.request(
        METHOD_REVOKE_SESSION_KEY,
        json!([{"session_key": key_address}]),
        Some(key),
    )
    .await?;
    Ok(())
}
