//! Groth16 prover client.
//!
//! The proof generator is an external service: it receives the public and
//! private inputs and returns a proof. Nothing in here knows the circuit.

use ethers::types::U256;
use serde::{Deserialize, Serialize};

use super::commitment::OrderDetail;
use super::ChainError;

/// Public inputs, bound to the current on-chain view so a stale proof
/// cannot be replayed: settled amounts are read immediately before proving
/// and the timestamp is shared with the contract call.
#[derive(Debug, Clone, Serialize)]
pub struct ProofPublicInputs {
    pub seller_commitment: String,
    pub buyer_commitment: String,
    pub seller_fill: String,
    pub buyer_fill: String,
    pub seller_settled: String,
    pub buyer_settled: String,
    pub timestamp: String,
}

impl ProofPublicInputs {
    pub fn to_field_array(&self) -> Result<[U256; 7], ChainError> {
        let parse = |s: &str| {
            U256::from_dec_str(s).map_err(|_| ChainError::InvalidFieldElement(s.to_string()))
        };
        Ok([
            parse(&self.seller_commitment)?,
            parse(&self.buyer_commitment)?,
            parse(&self.seller_fill)?,
            parse(&self.buyer_fill)?,
            parse(&self.seller_settled)?,
            parse(&self.buyer_settled)?,
            parse(&self.timestamp)?,
        ])
    }
}

/// Private witness: both revealed detail tuples, as decimal field strings.
#[derive(Debug, Clone, Serialize)]
pub struct ProofPrivateInputs {
    pub seller_detail: [String; 7],
    pub buyer_detail: [String; 7],
}

impl ProofPrivateInputs {
    pub fn from_details(seller: &OrderDetail, buyer: &OrderDetail) -> Self {
        let render = |d: &OrderDetail| -> [String; 7] {
            let fields = d.to_field_elements();
            std::array::from_fn(|i| fields[i].to_string())
        };
        Self {
            seller_detail: render(seller),
            buyer_detail: render(buyer),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofRequest {
    pub public_inputs: ProofPublicInputs,
    pub private_inputs: ProofPrivateInputs,
}

/// A Groth16 proof in the prover's JSON rendering.
#[derive(Debug, Clone, Deserialize)]
pub struct Groth16Proof {
    pub pi_a: [String; 2],
    pub pi_b: [[String; 2]; 2],
    pub pi_c: [String; 2],
}

impl Groth16Proof {
    pub fn to_contract_form(
        &self,
    ) -> Result<([U256; 2], [[U256; 2]; 2], [U256; 2]), ChainError> {
        let parse = |s: &str| {
            U256::from_dec_str(s).map_err(|_| ChainError::InvalidFieldElement(s.to_string()))
        };
        let a = [parse(&self.pi_a[0])?, parse(&self.pi_a[1])?];
        let b = [
            [parse(&self.pi_b[0][0])?, parse(&self.pi_b[0][1])?],
            [parse(&self.pi_b[1][0])?, parse(&self.pi_b[1][1])?],
        ];
        let c = [parse(&self.pi_c[0])?, parse(&self.pi_c[1])?];
        Ok((a, b, c))
    }
}

pub struct ProverClient {
    http: reqwest::Client,
    url: Option<String>,
}

impl ProverClient {
    pub fn new(url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Generate a proof. `Ok(None)` when no prover is wired (test mode).
    pub async fn generate(
        &self,
        request: &ProofRequest,
    ) -> Result<Option<Groth16Proof>, ChainError> {
        let Some(url) = &self.url else {
            return Ok(None);
        };

        let response = self
            .http
            .post(format!("{}/prove", url.trim_end_matches('/')))
            .json(request)
            .send()
            .await
            .map_err(|e| ChainError::ProofGenerationFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::ProofGenerationFailed(format!(
                "prover returned {}: {}",
                status, body
            )));
        }

        let proof = response
            .json::<Groth16Proof>()
            .await
            .map_err(|e| ChainError::ProofGenerationFailed(e.to_string()))?;
        Ok(Some(proof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_to_contract_form() {
        let proof = Groth16Proof {
            pi_a: ["1".into(), "2".into()],
            pi_b: [["3".into(), "4".into()], ["5".into(), "6".into()]],
            pi_c: ["7".into(), "8".into()],
        };
        let (a, b, c) = proof.to_contract_form().unwrap();
        assert_eq!(a[0], U256::from(1u64));
        assert_eq!(b[1][0], U256::from(5u64));
        assert_eq!(c[1], U256::from(8u64));
    }

    #[test]
    fn test_bad_proof_rejected() {
        let proof = Groth16Proof {
            pi_a: ["x".into(), "2".into()],
            pi_b: [["3".into(), "4".into()], ["5".into(), "6".into()]],
            pi_c: ["7".into(), "8".into()],
        };
        assert!(proof.to_contract_form().is_err());
    }

    #[test]
    fn test_public_inputs_roundtrip() {
        let inputs = ProofPublicInputs {
            seller_commitment: "11".into(),
            buyer_commitment: "22".into(),
            seller_fill: "10".into(),
            buyer_fill: "10".into(),
            seller_settled: "0".into(),
            buyer_settled: "5".into(),
            timestamp: "1700000000".into(),
        };
        let arr = inputs.to_field_array().unwrap();
        assert_eq!(arr[5], U256::from(5u64));
        assert_eq!(arr[6], U256::from(1_700_000_000u64));
    }
}
