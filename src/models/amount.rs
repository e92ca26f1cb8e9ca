use ethers::types::U256;
use thiserror::Error;

/// Decimals of the native asset (wei per ether).
pub const NATIVE_DECIMALS: usize = 18;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid native amount: {0}")]
pub struct AmountError(pub String);

fn unit() -> U256 {
    U256::exp10(NATIVE_DECIMALS)
}

/// Parses a decimal string such as `"0.001"` into atomic units, exactly.
///
/// More fractional digits than the asset has is an error rather than a rounding.
pub fn parse_native(input: &str) -> Result<U256, AmountError> {
    let cleaned = input.trim();
    let err = || AmountError(input.to_string());

    let (whole, fraction) = match cleaned.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (cleaned, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(err());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    if fraction.len() > NATIVE_DECIMALS {
        return Err(err());
    }

    let whole = if whole.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(whole).map_err(|_| err())?
    };
    let padded = format!("{:0<width$}", fraction, width = NATIVE_DECIMALS);
    let fraction = U256::from_dec_str(&padded).map_err(|_| err())?;

    whole
        .checked_mul(unit())
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(err)
}

/// Formats atomic units as a trimmed decimal string (`1000000000000000` -> `"0.001"`).
pub fn format_native(atomic: U256) -> String {
    let (whole, fraction) = atomic.div_mod(unit());
    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction.to_string(), width = NATIVE_DECIMALS);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
