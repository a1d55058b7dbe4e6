//! Unit Conversion
//!
//! Hex quantity parsing and base-unit (wei) to major-unit (ether) conversion.
//! Amounts never pass through binary floating point.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use thiserror::Error;

/// Number of fractional digits between wei and ether
pub const ETHER_DECIMALS: u32 = 18;

/// Errors that can occur during unit conversion
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("Invalid hex quantity '{0}'")]
    InvalidHex(String),

    #[error("Quantity {0} does not fit in {1}")]
    Overflow(String, &'static str),
}

/// Parse a `0x`-prefixed hex quantity into a non-negative integer.
///
/// Empty input and a bare `0x` both yield zero.
pub fn hex_to_int(hex_str: &str) -> Result<U256, UnitError> {
    let digits = hex_str
        .strip_prefix("0x")
        .or_else(|| hex_str.strip_prefix("0X"))
        .unwrap_or(hex_str);

    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(UnitError::InvalidHex(hex_str.to_string()));
    }

    U256::from_str_radix(digits, 16).map_err(|_| UnitError::InvalidHex(hex_str.to_string()))
}

/// Same as [`hex_to_int`], treating an absent field as zero
pub fn opt_hex_to_int(hex_str: Option<&str>) -> Result<U256, UnitError> {
    hex_str.map_or(Ok(U256::ZERO), hex_to_int)
}

/// Parse a hex quantity that must fit in a `u64` (block numbers, gas counters)
pub fn hex_to_u64(hex_str: &str) -> Result<u64, UnitError> {
    let value = hex_to_int(hex_str)?;
    u64::try_from(value).map_err(|_| UnitError::Overflow(value.to_string(), "u64"))
}

/// Convert an amount of wei into ether, keeping every digit.
pub fn base_units_to_major(wei: U256) -> Result<Decimal, UnitError> {
    let overflow = || UnitError::Overflow(wei.to_string(), "Decimal");

    let raw = u128::try_from(wei).map_err(|_| overflow())?;
    let raw = i128::try_from(raw).map_err(|_| overflow())?;
    Decimal::try_from_i128_with_scale(raw, ETHER_DECIMALS).map_err(|_| overflow())
}
