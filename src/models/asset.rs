use serde::{Deserialize, Serialize};

/// One clearing-network asset, as returned by `list_assets` and cached in
/// the process-wide asset map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub chain_id: i64,
    pub token: String,
    pub symbol: String,
    pub decimals: u32,
}

/// A ledger balance entry on the clearing network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub asset: String,
    pub amount: String,
}
