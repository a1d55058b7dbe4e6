//! Transaction Filtering
//!
//! Decides whether an assembled record is kept, based on caller-supplied method terms
//! and an amount mode. Filters are validated up front so a bad literal never reaches
//! the network.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::assembler::TransactionRecord;

/// Errors that can occur while building a filter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid amount filter '{0}'. Use '0' for zero value or 'not-0' for non-zero value")]
    InvalidAmountMode(String),
}

/// Value predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmountMode {
    /// `value == 0`
    Zero,
    /// `value != 0`
    NonZero,
}

impl AmountMode {
    /// Check a value against this mode. An unknown value never matches.
    pub fn matches(&self, value: Option<&Decimal>) -> bool {
        match (self, value) {
            (_, None) => false,
            (AmountMode::Zero, Some(v)) => v.is_zero(),
            (AmountMode::NonZero, Some(v)) => !v.is_zero(),
        }
    }

    /// Canonical command-line literal
    pub fn literal(&self) -> &'static str {
        match self {
            AmountMode::Zero => "0",
            AmountMode::NonZero => "not-0",
        }
    }
}

impl FromStr for AmountMode {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "zero" => Ok(AmountMode::Zero),
            "not-0" | "nonzero" => Ok(AmountMode::NonZero),
            other => Err(FilterError::InvalidAmountMode(other.to_string())),
        }
    }
}

impl fmt::Display for AmountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.literal())
    }
}

/// Parse an optional amount literal
pub fn parse_amount_mode(literal: Option<&str>) -> Result<Option<AmountMode>, FilterError> {
    literal.map(AmountMode::from_str).transpose()
}

/// Combined method and amount predicate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    /// Lowercased substrings, any of which may match the action label
    method_terms: Vec<String>,
    amount: Option<AmountMode>,
}

impl TransactionFilter {
    /// Filter that accepts everything
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Build a filter from caller input. Blank method terms are ignored.
    pub fn new<S: AsRef<str>>(method_terms: &[S], amount: Option<AmountMode>) -> Self {
        let method_terms = method_terms
            .iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        Self { method_terms, amount }
    }

    /// Build a filter from raw literals, rejecting an unknown amount mode
    pub fn parse<S: AsRef<str>>(method_terms: &[S], amount: Option<&str>) -> Result<Self, FilterError> {
        Ok(Self::new(method_terms, parse_amount_mode(amount)?))
    }

    pub fn method_terms(&self) -> &[String] {
        &self.method_terms
    }

    pub fn amount(&self) -> Option<AmountMode> {
        self.amount
    }

    pub fn is_empty(&self) -> bool {
        self.method_terms.is_empty() && self.amount.is_none()
    }

    /// Check whether an action label contains any method term (case-insensitive)
    pub fn matches_action(&self, action: Option<&str>) -> bool {
        if self.method_terms.is_empty() {
            return true;
        }
        let Some(action) = action else {
            return false;
        };
        let action = action.to_lowercase();
        self.method_terms.iter().any(|term| action.contains(term.as_str()))
    }

    /// Check whether a value passes the amount mode
    pub fn matches_value(&self, value: Option<&Decimal>) -> bool {
        self.amount.map_or(true, |mode| mode.matches(value))
    }

    /// Check an assembled record
    pub fn matches(&self, record: &TransactionRecord) -> bool {
        self.matches_action(Some(&record.action)) && self.matches_value(Some(&record.value))
    }
}
