//! Commit-Reveal Hashing
//!
//! The on-chain commitment is the authoritative identity of an order. The
//! hash itself is defined by the circuit; the engine treats it as an opaque
//! function of the seven detail inputs returning a BN128 field element and
//! only ever compares results for equality.

use ethers::types::{Address, U256};
use sha3::{Digest, Keccak256};

use super::ChainError;
use crate::config::SNARK_SCALAR_FIELD;

/// The seven-field detail tuple bound by the commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetail {
    pub owner: Address,
    pub sell_token: Address,
    pub buy_token: Address,
    pub quantity: U256,
    pub min_price: U256,
    pub max_price: U256,
    pub expires_at: U256,
}

impl OrderDetail {
    /// Seven field elements, in circuit order.
    pub fn to_field_elements(&self) -> [U256; 7] {
        [
            address_to_field(self.owner),
            address_to_field(self.sell_token),
            address_to_field(self.buy_token),
            self.quantity,
            self.min_price,
            self.max_price,
            self.expires_at,
        ]
    }
}

/// Opaque commitment function: seven inputs, one field element out.
///
/// The production hash is the circuit's nested Poseidon; implementations
/// plug in here without the engine caring which one is wired.
pub trait CommitmentHasher: Send + Sync {
    fn hash(&self, detail: &OrderDetail) -> U256;
}

/// Keccak-based stand-in used where the external Poseidon collaborator is
/// not deployed (test mode). Output is masked into the field like every
/// other commitment.
pub struct KeccakHasher;

impl CommitmentHasher for KeccakHasher {
    fn hash(&self, detail: &OrderDetail) -> U256 {
        let mut hasher = Keccak256::new();
        for element in detail.to_field_elements() {
            let mut word = [0u8; 32];
            element.to_big_endian(&mut word);
            hasher.update(word);
        }
        mask_to_field(U256::from_big_endian(&hasher.finalize()))
    }
}

/// Keep the low 253 bits so the value fits below the BN128 scalar field.
pub fn mask_to_field(value: U256) -> U256 {
    value & (U256::MAX >> 3)
}

pub fn snark_scalar_field() -> U256 {
    U256::from_dec_str(SNARK_SCALAR_FIELD).expect("BN128 prime constant")
}

/// Parse a decimal field-element string, rejecting values at or above the
/// field modulus.
pub fn parse_field_element(value: &str) -> Result<U256, ChainError> {
    let parsed = U256::from_dec_str(value.trim())
        .map_err(|_| ChainError::InvalidFieldElement(value.to_string()))?;
    if parsed >= snark_scalar_field() {
        return Err(ChainError::InvalidFieldElement(value.to_string()));
    }
    Ok(parsed)
}

pub fn parse_address(value: &str) -> Result<Address, ChainError> {
    value
        .parse::<Address>()
        .map_err(|_| ChainError::InvalidAddress(value.to_string()))
}

fn address_to_field(address: Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail() -> OrderDetail {
        OrderDetail {
            owner: Address::repeat_byte(0x11),
            sell_token: Address::repeat_byte(0x22),
            buy_token: Address::repeat_byte(0x33),
            quantity: U256::from(10u64),
            min_price: U256::from(99u64),
            max_price: U256::from(101u64),
            expires_at: U256::from(1_700_000_000u64),
        }
    }

    #[test]
    fn test_mask_stays_below_field() {
        let masked = mask_to_field(U256::MAX);
        assert!(masked < snark_scalar_field());
        assert_eq!(masked, U256::MAX >> 3);
    }

    #[test]
    fn test_hash_is_deterministic_and_in_field() {
        let hasher = KeccakHasher;
        let a = hasher.hash(&detail());
        let b = hasher.hash(&detail());
        assert_eq!(a, b);
        assert!(a < snark_scalar_field());
    }

    #[test]
    fn test_hash_binds_every_input() {
        let hasher = KeccakHasher;
        let base = hasher.hash(&detail());

        let mut tweaked = detail();
        tweaked.quantity = U256::from(11u64);
        assert_ne!(base, hasher.hash(&tweaked));

        let mut tweaked = detail();
        tweaked.max_price = U256::from(102u64);
        assert_ne!(base, hasher.hash(&tweaked));
    }

    #[test]
    fn test_parse_field_element_bounds() {
        assert!(parse_field_element("0").is_ok());
        assert!(parse_field_element(SNARK_SCALAR_FIELD).is_err());
        assert!(parse_field_element("not a number").is_err());
    }
}
