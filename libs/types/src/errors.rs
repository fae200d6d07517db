//! Protocol-level error taxonomy
//!
//! Validation failures reject the request before any durability side
//! effect; they map to an invalid-argument status at the RPC boundary.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("invalid side code: {0}")]
    InvalidSide(u8),

    #[error("invalid order type code: {0}")]
    InvalidOrderType(u8),

    #[error("invalid status code: {0}")]
    InvalidStatus(u8),

    #[error("invalid quantity: {0} (must be positive)")]
    InvalidQuantity(i64),

    #[error("invalid price: {0} (must be positive for non-market orders)")]
    InvalidPrice(i64),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}
