//! Transaction Assembly
//!
//! Combines a raw transaction, its receipt and an optional block timestamp into the
//! normalized record that gets persisted. Derived fields (status, action, fee) are
//! computed here and nowhere else.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::etherscan::{RawReceipt, RawTransaction};
use crate::units::{base_units_to_major, hex_to_int, hex_to_u64, opt_hex_to_int, UnitError};

/// Call data of a plain value transfer
pub const EMPTY_CALL: &str = "0x";

/// Receipt status code of a successful transaction
pub const STATUS_SUCCESS: &str = "0x1";

/// Errors that can occur while assembling a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid transaction hash '{0}'")]
    InvalidHash(String),

    #[error("Payload hash {returned} does not match requested hash {requested}")]
    HashMismatch { requested: String, returned: String },

    #[error("Field '{field}': {source}")]
    Unit {
        field: &'static str,
        #[source]
        source: UnitError,
    },
}

/// Execution outcome taken from the receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    Success,
    Fail,
}

impl TxStatus {
    /// `0x1` is success, anything else (including absent) is failure
    pub fn from_receipt_code(code: Option<&str>) -> Self {
        match code {
            Some(STATUS_SUCCESS) => TxStatus::Success,
            _ => TxStatus::Fail,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxStatus::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TxStatus::Success => "Success",
            TxStatus::Fail => "Fail",
        }
    }
}

/// Coarse classification inferred from call data. Not a decoded method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxAction {
    Transfer,
    ContractCall,
}

impl TxAction {
    pub fn from_input(input: &str) -> Self {
        if input == EMPTY_CALL {
            TxAction::Transfer
        } else {
            TxAction::ContractCall
        }
    }

    /// Label stored in the `action` column
    pub fn label(&self) -> &'static str {
        match self {
            TxAction::Transfer => "Transfer",
            TxAction::ContractCall => "Contract Call",
        }
    }
}

/// Fully assembled transaction, one row of the `transactions` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// `0x` + 64 lowercase hex digits
    pub hash: String,
    pub status: TxStatus,
    pub block: u64,
    /// Unix time of the containing block, absent when the lookup failed
    pub timestamp: Option<u64>,
    pub action: String,
    pub from: Option<String>,
    /// None for contract creation
    pub to: Option<String>,
    /// Ether
    pub value: Decimal,
    /// Ether, always `gas_price * gas_used`
    pub fee: Decimal,
    /// Ether per gas unit
    pub gas_price: Decimal,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub input_data: String,
}

/// Check the fixed `0x` + 64 hex digit hash format
pub fn is_valid_tx_hash(hash: &str) -> bool {
    hash.strip_prefix("0x")
        .is_some_and(|digits| digits.len() == 64 && digits.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn required<'a>(field: Option<&'a String>, name: &'static str) -> Result<&'a str, AssemblyError> {
    field.map(String::as_str).ok_or(AssemblyError::MissingField(name))
}

fn unit_err(field: &'static str) -> impl Fn(UnitError) -> AssemblyError {
    move |source| AssemblyError::Unit { field, source }
}

/// Build a record from the raw API payloads.
///
/// # Arguments
/// * `requested_hash` - Hash the payloads were fetched for
/// * `tx` - Result of `eth_getTransactionByHash`
/// * `receipt` - Result of `eth_getTransactionReceipt`
/// * `timestamp` - Block timestamp, if it could be fetched
///
/// # Returns
/// The record, or an error if `hash`, `blockNumber`, `value`, `gasPrice` or `gasUsed`
/// is missing or unparsable.
pub fn assemble(
    requested_hash: &str,
    tx: &RawTransaction,
    receipt: &RawReceipt,
    timestamp: Option<u64>,
) -> Result<TransactionRecord, AssemblyError> {
    let hash = required(tx.hash.as_ref(), "hash")?.to_ascii_lowercase();
    if !is_valid_tx_hash(&hash) {
        return Err(AssemblyError::InvalidHash(hash));
    }
    if !hash.eq_ignore_ascii_case(requested_hash) {
        return Err(AssemblyError::HashMismatch {
            requested: requested_hash.to_string(),
            returned: hash,
        });
    }

    let block = hex_to_u64(required(tx.block_number.as_ref(), "blockNumber")?).map_err(unit_err("blockNumber"))?;
    let value_wei = hex_to_int(required(tx.value.as_ref(), "value")?).map_err(unit_err("value"))?;
    let gas_price_wei = hex_to_int(required(tx.gas_price.as_ref(), "gasPrice")?).map_err(unit_err("gasPrice"))?;
    let gas_used = hex_to_u64(required(receipt.gas_used.as_ref(), "gasUsed")?).map_err(unit_err("gasUsed"))?;
    let cumulative_gas_used = opt_hex_to_int(receipt.cumulative_gas_used.as_deref())
        .and_then(|v| u64::try_from(v).map_err(|_| UnitError::Overflow(v.to_string(), "u64")))
        .map_err(unit_err("cumulativeGasUsed"))?;

    // fee in wei first, so the ether value is exact
    let fee_wei = gas_price_wei
        .checked_mul(U256::from(gas_used))
        .ok_or_else(|| AssemblyError::Unit {
            field: "fee",
            source: UnitError::Overflow(format!("{} * {}", gas_price_wei, gas_used), "U256"),
        })?;

    let input_data = match tx.input.as_deref() {
        None | Some("") => EMPTY_CALL.to_string(),
        Some(input) => input.to_string(),
    };

    Ok(TransactionRecord {
        hash,
        status: TxStatus::from_receipt_code(receipt.status.as_deref()),
        block,
        timestamp,
        action: TxAction::from_input(&input_data).label().to_string(),
        from: tx.from.clone(),
        to: tx.to.clone(),
        value: base_units_to_major(value_wei).map_err(unit_err("value"))?,
        fee: base_units_to_major(fee_wei).map_err(unit_err("fee"))?,
        gas_price: base_units_to_major(gas_price_wei).map_err(unit_err("gasPrice"))?,
        gas_used,
        cumulative_gas_used,
        input_data,
    })
}
