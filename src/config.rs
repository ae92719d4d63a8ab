//! Application Configuration
//!
//! Loaded once at startup from environment variables (with `.env` support
//! via dotenvy in main). Every recognized option has a default except the
//! secrets and endpoints that have no sensible one.

use serde::Deserialize;

/// BN128 scalar field prime; order ids and commitment hashes must stay below it.
pub const SNARK_SCALAR_FIELD: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub database_url: String,

    /// Clearing-network WebSocket endpoint.
    pub clearnode_url: String,

    /// Ethereum JSON-RPC endpoint.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Matcher worker-pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_order_channel_size")]
    pub order_channel_size: usize,

    #[serde(default = "default_cancel_channel_size")]
    pub cancel_channel_size: usize,

    #[serde(default = "default_match_channel_size")]
    pub match_channel_size: usize,

    /// Settlement poller period in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Max matches claimed per poll cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Coordinator RPC timeout in milliseconds.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Coordinator keepalive period in milliseconds.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Chain the asset map is filtered to.
    #[serde(default = "default_chain_id")]
    pub chain_id: i64,

    /// Bootstrap signing key for the engine session key (hex, no 0x).
    pub engine_wallet_key: String,

    /// Clearing-network channel router. On-chain channel calls are skipped
    /// when unset (test mode).
    #[serde(default)]
    pub router_address: Option<String>,

    /// Custody contract. On-chain settlement steps are skipped when unset
    /// (test mode).
    #[serde(default)]
    pub custody_address: Option<String>,

    /// Proof generator endpoint; required only when custody is configured.
    #[serde(default)]
    pub prover_url: Option<String>,

    #[serde(default = "default_snark_scalar_field")]
    pub snark_scalar_field: String,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_order_channel_size() -> usize {
    1024
}

fn default_cancel_channel_size() -> usize {
    256
}

fn default_match_channel_size() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_batch_size() -> i64 {
    10
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_chain_id() -> i64 {
    1
}

fn default_snark_scalar_field() -> String {
    SNARK_SCALAR_FIELD.to_string()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        let app: AppConfig = cfg.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.engine_wallet_key.trim().is_empty() {
            anyhow::bail!("engine_wallet_key must be set");
        }
        if self.custody_address.is_some() && self.prover_url.is_none() {
            anyhow::bail!("prover_url is required when custody_address is set");
        }
        // The field bound is fixed by the circuit; anything else is a
        // misconfigured deployment
        if self.snark_scalar_field != SNARK_SCALAR_FIELD {
            anyhow::bail!("snark_scalar_field must be the BN128 prime");
        }
        Ok(())
    }

    /// On-chain settlement steps run only when a custody contract is wired.
    pub fn chain_enabled(&self) -> bool {
        self.custody_address.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AppConfig {
        AppConfig {
            environment: default_environment(),
            port: default_port(),
            database_url: "postgres://localhost/darkpool".into(),
            clearnode_url: "wss://clearnode.example/ws".into(),
            rpc_url: default_rpc_url(),
            workers: default_workers(),
            order_channel_size: default_order_channel_size(),
            cancel_channel_size: default_cancel_channel_size(),
            match_channel_size: default_match_channel_size(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            response_timeout_ms: default_response_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            chain_id: default_chain_id(),
            engine_wallet_key: "4c0883a69102937d6231471b5dbb6204fe512961708279feb1be6ae5538da033"
                .into(),
            router_address: None,
            custody_address: None,
            prover_url: None,
            snark_scalar_field: default_snark_scalar_field(),
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = base();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.poll_interval_ms, 2000);
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.response_timeout_ms, 10_000);
        assert_eq!(cfg.ping_interval_ms, 30_000);
        assert!(!cfg.chain_enabled());
    }

    #[test]
    fn test_custody_requires_prover() {
        let mut cfg = base();
        cfg.custody_address = Some("0x0000000000000000000000000000000000000001".into());
        assert!(cfg.validate().is_err());

        cfg.prover_url = Some("http://localhost:9000".into());
        assert!(cfg.validate().is_ok());
        assert!(cfg.chain_enabled());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut cfg = base();
        cfg.workers = 0;
        assert!(cfg.validate().is_err());
    }
}
