//! String-Decimal Arithmetic
//!
//! Settlement amounts are computed over decimal strings with big-integer
//! arithmetic. Binary floats never touch a financial quantity.

use ethers::types::U256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecimalError {
    #[error("invalid decimal string: {0}")]
    InvalidInput(String),

    #[error("decimal overflow multiplying {0} by {1}")]
    Overflow(String, String),

    #[error("value does not fit in {0} fractional digits: {1}")]
    PrecisionLoss(u32, String),
}

/// Multiply two non-negative decimal strings exactly.
///
/// Strips the decimal points, multiplies the digit strings as big integers,
/// re-inserts the combined decimal point and trims trailing zeros. The result
/// carries no trailing zeros and no trailing point.
pub fn mul_decimal_str(a: &str, b: &str) -> Result<String, DecimalError> {
    let (a_digits, a_scale) = split_decimal(a)?;
    let (b_digits, b_scale) = split_decimal(b)?;

    let lhs = U256::from_dec_str(&a_digits)
        .map_err(|_| DecimalError::InvalidInput(a.to_string()))?;
    let rhs = U256::from_dec_str(&b_digits)
        .map_err(|_| DecimalError::InvalidInput(b.to_string()))?;

    let product = lhs
        .checked_mul(rhs)
        .ok_or_else(|| DecimalError::Overflow(a.to_string(), b.to_string()))?;

    Ok(insert_point(product, a_scale + b_scale))
}

/// Convert a decimal string into integer token units at the given precision.
///
/// `"1.5"` at 6 decimals becomes `1500000`. Fails if the value carries more
/// fractional digits than the token supports.
pub fn decimal_to_units(value: &str, decimals: u32) -> Result<U256, DecimalError> {
    let (digits, scale) = split_decimal(value)?;
    if scale > decimals {
        return Err(DecimalError::PrecisionLoss(decimals, value.to_string()));
    }

    let base = U256::from_dec_str(&digits)
        .map_err(|_| DecimalError::InvalidInput(value.to_string()))?;
    let factor = U256::exp10((decimals - scale) as usize);
    base.checked_mul(factor)
        .ok_or_else(|| DecimalError::Overflow(value.to_string(), format!("10^{}", decimals - scale)))
}

/// Render integer token units back into a decimal string.
pub fn units_to_decimal(units: U256, decimals: u32) -> String {
    insert_point(units, decimals)
}

/// Split a decimal string into its digit string and fractional-digit count.
fn split_decimal(value: &str) -> Result<(String, u32), DecimalError> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('-') || value.starts_with('+') {
        return Err(DecimalError::InvalidInput(value.to_string()));
    }

    let mut parts = value.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(DecimalError::InvalidInput(value.to_string()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(DecimalError::InvalidInput(value.to_string()));
    }

    let mut digits = String::with_capacity(int_part.len() + frac_part.len());
    digits.push_str(int_part);
    digits.push_str(frac_part);
    if digits.is_empty() {
        digits.push('0');
    }

    Ok((digits, frac_part.len() as u32))
}

/// Place the decimal point `scale` digits from the right and normalize.
fn insert_point(value: U256, scale: u32) -> String {
    let raw = value.to_string();
    if scale == 0 {
        return raw;
    }

    let scale = scale as usize;
    let padded = if raw.len() <= scale {
        format!("{}{}", "0".repeat(scale - raw.len() + 1), raw)
    } else {
        raw
    };

    let split = padded.len() - scale;
    let int_part = &padded[..split];
    let frac_part = padded[split..].trim_end_matches('0');

    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_integers() {
        assert_eq!(mul_decimal_str("10", "100").unwrap(), "1000");
        assert_eq!(mul_decimal_str("0", "123.456").unwrap(), "0");
    }

    #[test]
    fn test_mul_fractions() {
        assert_eq!(mul_decimal_str("1.5", "2").unwrap(), "3");
        assert_eq!(mul_decimal_str("0.1", "0.2").unwrap(), "0.02");
        assert_eq!(mul_decimal_str("2.50", "4").unwrap(), "10");
        assert_eq!(mul_decimal_str("60", "50").unwrap(), "3000");
    }

    #[test]
    fn test_no_trailing_zeros() {
        let out = mul_decimal_str("1.25", "8").unwrap();
        assert_eq!(out, "10");
        assert!(!out.contains('.'));

        let out = mul_decimal_str("1.200", "1.50").unwrap();
        assert_eq!(out, "1.8");
    }

    #[test]
    fn test_commutative() {
        let a = "123.456789";
        let b = "987.654321";
        assert_eq!(mul_decimal_str(a, b).unwrap(), mul_decimal_str(b, a).unwrap());
    }

    #[test]
    fn test_associative() {
        let ab_c = mul_decimal_str(&mul_decimal_str("1.2", "3.4").unwrap(), "5.6").unwrap();
        let a_bc = mul_decimal_str("1.2", &mul_decimal_str("3.4", "5.6").unwrap()).unwrap();
        assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn test_high_precision() {
        // 18-decimal token amounts must multiply without drift
        assert_eq!(
            mul_decimal_str("0.000000000000000001", "1000000000000000000").unwrap(),
            "1"
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(mul_decimal_str("-1", "2").is_err());
        assert!(mul_decimal_str("1,5", "2").is_err());
        assert!(mul_decimal_str("", "2").is_err());
        assert!(mul_decimal_str(".", "2").is_err());
    }

    #[test]
    fn test_decimal_to_units() {
        assert_eq!(decimal_to_units("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(decimal_to_units("0.000001", 6).unwrap(), U256::from(1u64));
        assert!(decimal_to_units("0.0000001", 6).is_err());
    }

    #[test]
    fn test_units_roundtrip() {
        let units = decimal_to_units("42.125", 8).unwrap();
        assert_eq!(units_to_decimal(units, 8), "42.125");
    }
}
