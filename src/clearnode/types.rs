//! Clearing-network wire types.
//!
//! Requests travel as `{"req": [id, method, params, timestamp], "sig": [..]}`
//! and responses as `{"res": [id, method, payload, timestamp], "sig": [..]}`.
//! Bearer tokens and channel states are opaque at this layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Allowance;

pub const METHOD_AUTH_REQUEST: &str = "auth_request";
pub const METHOD_AUTH_VERIFY: &str = "auth_verify";
pub const METHOD_AUTH_JWT: &str = "auth_jwt";
pub const METHOD_GET_ASSETS: &str = "get_assets";
pub const METHOD_GET_CHANNELS: &str = "get_channels";
pub const METHOD_CREATE_CHANNEL: &str = "create_channel";
pub const METHOD_RESIZE_CHANNEL: &str = "resize_channel";
pub const METHOD_GET_LEDGER_BALANCES: &str = "get_ledger_balances";
pub const METHOD_CREATE_APP_SESSION: &str = "create_app_session";
pub const METHOD_CLOSE_APP_SESSION: &str = "close_app_session";
pub const METHOD_REVOKE_SESSION_KEY: &str = "revoke_session_key";
pub const METHOD_ERROR: &str = "error";

#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame {
    pub req: (u64, String, Value, u64),
    pub sig: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    pub res: (u64, String, Value, u64),
    pub sig: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthRequestParams {
    pub address: String,
    pub session_key: String,
    pub application: String,
    pub allowances: Vec<Allowance>,
    pub expire: String,
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthVerifyParams {
    pub challenge: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResult {
    pub address: String,
    pub success: bool,
    #[serde(default)]
    pub jwt_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub status: String,
    pub token: String,
    pub amount: String,
    pub chain_id: i64,
}

/// `create_channel` result: an unsigned channel state the caller may
/// counter-sign and submit on-chain, plus the network's signature over it.
/// The encoded fields are the ABI renderings the router accepts verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelResponse {
    pub channel_id: String,
    pub state: Value,
    pub server_signature: String,
    #[serde(default)]
    pub encoded_params: Option<String>,
    #[serde(default)]
    pub encoded_state: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResizeChannelParams {
    pub channel_id: String,
    pub resize_amount: String,
    pub allocate_amount: String,
    pub funds_destination: String,
}

/// App-session definition: the engine sits as sole judge (weights
/// [0, 0, 100], quorum 100) over the two traders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: Vec<String>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub challenge: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppAllocation {
    pub participant: String,
    pub asset: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateAppSessionParams {
    pub definition: AppDefinition,
    pub allocations: Vec<AppAllocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseAppSessionParams {
    pub app_session_id: String,
    pub allocations: Vec<AppAllocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSessionResponse {
    pub app_session_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetEntry {
    pub chain_id: i64,
    pub token: String,
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

fn default_decimals() -> u32 {
    18
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_shape() {
        let frame = RequestFrame {
            req: (7, "get_assets".to_string(), json!([{"chain_id": 1}]), 1_700_000_000_000),
            sig: vec!["0xabc".to_string()],
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["req"][0], 7);
        assert_eq!(encoded["req"][1], "get_assets");
        assert!(encoded["req"][2].is_array());
        assert_eq!(encoded["sig"][0], "0xabc");
    }

    #[test]
    fn test_response_frame_roundtrip() {
        let raw = json!({
            "res": [7, "get_assets", [{"assets": []}], 1_700_000_000_001u64],
            "sig": []
        });
        let frame: ResponseFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame.res.0, 7);
        assert_eq!(frame.res.1, "get_assets");
    }
}
