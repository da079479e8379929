//! Shared error type for the sentinel data model

use thiserror::Error;

/// Errors produced by the shared data model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SentinelError {
    #[error("Amount overflow")]
    AmountOverflow,

    #[error("Amount underflow")]
    AmountUnderflow,

    #[error("Asset mismatch: expected {expected}, got {actual}")]
    AssetMismatch { expected: String, actual: String },

    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    #[error("Unknown asset: {symbol}")]
    UnknownAsset { symbol: String },

    #[error("Invalid address: {message}")]
    InvalidAddress { message: String },
}

pub type Result<T> = std::result::Result<T, SentinelError>;
