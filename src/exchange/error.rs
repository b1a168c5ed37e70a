//! Error types returned by venue adapters.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failures a venue adapter can report to the strategy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VenueError {
    #[error("Insufficient depth on {pair}: requested {requested}, available {available}")]
    InsufficientDepth {
        pair: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    #[error("Unknown trading pair: {0}")]
    UnknownPair(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Venue unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for venue operations.
pub type VenueResult<T> = std::result::Result<T, VenueError>;
