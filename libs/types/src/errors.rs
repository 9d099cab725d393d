//! Validation errors raised when constructing domain types

use thiserror::Error;

/// Errors that can occur while building domain values from raw input
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    /// Cyclic path shorter than three assets
    #[error("asset path needs at least 3 assets, got {len}")]
    PathTooShort { len: usize },

    /// Same asset appears twice inside one cycle
    #[error("asset {symbol} appears more than once in path")]
    DuplicateAsset { symbol: String },

    /// Rational fee with a zero denominator or a numerator above it
    #[error("invalid fee rate {numerator}/{denominator}")]
    InvalidFeeRate { numerator: u64, denominator: u64 },

    /// Bundle lifetime of zero blocks
    #[error("bundle validity must be at least one block")]
    ZeroValidity,

    /// Budget window configured with zero length or zero attempts
    #[error("invalid attempt budget: {0}")]
    InvalidBudget(String),
}
