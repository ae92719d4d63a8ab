//! On-Chain Custody Integration
//!
//! View and mutating calls against the custody contract, the commit-reveal
//! hash, and the opaque Groth16 proof generator. When no custody address is
//! configured every on-chain step short-circuits (test mode).

pub mod commitment;
pub mod custody;
pub mod prover;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid field element: {0}")]
    InvalidFieldElement(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid signing key")]
    InvalidKey,

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("decimal error: {0}")]
    Decimal(#[from] crate::utils::decimal::DecimalError),
}
