//! Process-wide asset map.
//!
//! Populated once from `get_assets` during coordinator init, before any
//! concurrent reader starts; reads afterwards are lock-free.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::Asset;

/// Zero address and the conventional native-ETH sentinel both refer to the
/// chain's native asset.
const NATIVE_ZERO: &str = "0x0000000000000000000000000000000000000000";
const NATIVE_SENTINEL: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

#[derive(Default)]
pub struct AssetMap {
    inner: OnceLock<HashMap<String, Asset>>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Install the asset list. An empty map after filtering is a programmer
    /// or deployment error and refuses to start the process.
    pub fn init(&self, assets: Vec<Asset>, chain_id: i64) -> anyhow::Result<()> {
        let mut map = HashMap::new();
        for asset in assets.into_iter().filter(|a| a.chain_id == chain_id) {
            let token = asset.token.to_lowercase();
            if token == NATIVE_SENTINEL || token == NATIVE_ZERO {
                // Register the native asset under both aliases
                map.insert(NATIVE_ZERO.to_string(), asset.clone());
                map.insert(NATIVE_SENTINEL.to_string(), asset);
            } else {
                map.insert(token, asset);
            }
        }

        if map.is_empty() {
            anyhow::bail!("asset map empty after filtering to chain {}", chain_id);
        }
        self.inner
            .set(map)
            .map_err(|_| anyhow::anyhow!("asset map initialized twice"))?;
        Ok(())
    }

    pub fn get(&self, token: &str) -> Option<&Asset> {
        self.inner.get()?.get(&token.to_lowercase())
    }

    pub fn symbol(&self, token: &str) -> Option<&str> {
        self.get(token).map(|a| a.symbol.as_str())
    }

    pub fn len(&self) -> usize {
        self.inner.get().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(chain_id: i64, token: &str, symbol: &str) -> Asset {
        Asset {
            chain_id,
            token: token.to_string(),
            symbol: symbol.to_string(),
            decimals: 18,
        }
    }

    #[test]
    fn test_filters_to_chain() {
        let map = AssetMap::new();
        map.init(
            vec![
                asset(1, "0x00000000000000000000000000000000000000aa", "USDC"),
                asset(137, "0x00000000000000000000000000000000000000bb", "WMATIC"),
            ],
            1,
        )
        .unwrap();

        assert_eq!(map.symbol("0x00000000000000000000000000000000000000AA"), Some("USDC"));
        assert!(map.get("0x00000000000000000000000000000000000000bb").is_none());
    }

    #[test]
    fn test_native_aliases() {
        let map = AssetMap::new();
        map.init(vec![asset(1, NATIVE_SENTINEL, "ETH")], 1).unwrap();

        assert_eq!(map.symbol(NATIVE_ZERO), Some("ETH"));
        assert_eq!(map.symbol(NATIVE_SENTINEL), Some("ETH"));
    }

    #[test]
    fn test_empty_map_is_fatal() {
        let map = AssetMap::new();
        assert!(map
            .init(vec![asset(137, "0x00000000000000000000000000000000000000bb", "X")], 1)
            .is_err());
    }
}
