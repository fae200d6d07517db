//! Order lifecycle enums
//!
//! All three enums carry stable u8 codes used verbatim in the entry-WAL
//! payload and the snapshot file, so variant order is part of the on-disk
//! contract and must never be rearranged.

use crate::errors::OrderError;
use serde::{Deserialize, Serialize};

/// Order side (which book the order rests in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order
    Bid,
    /// Sell order
    Ask,
}

impl Side {
    /// The side an incoming order matches against.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Side::Bid => 0,
            Side::Ask => 1,
        }
    }

    pub fn from_u8(code: u8) -> Result<Self, OrderError> {
        match code {
            0 => Ok(Side::Bid),
            1 => Ok(Side::Ask),
            other => Err(OrderError::InvalidSide(other)),
        }
    }
}

/// Execution semantics of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Rests in the book at the specified price.
    Limit,
    /// Executes at any price; never rests.
    Market,
    /// Immediate-or-cancel: execute what crosses, cancel the remainder.
    Ioc,
    /// Fill-or-kill: execute fully or reject without trading.
    Fok,
    /// Must not execute on arrival; rejected if it would cross.
    PostOnly,
}

impl OrderType {
    pub fn as_u8(&self) -> u8 {
        match self {
            OrderType::Limit => 0,
            OrderType::Market => 1,
            OrderType::Ioc => 2,
            OrderType::Fok => 3,
            OrderType::PostOnly => 4,
        }
    }

    pub fn from_u8(code: u8) -> Result<Self, OrderError> {
        match code {
            0 => Ok(OrderType::Limit),
            1 => Ok(OrderType::Market),
            2 => Ok(OrderType::Ioc),
            3 => Ok(OrderType::Fok),
            4 => Ok(OrderType::PostOnly),
            other => Err(OrderError::InvalidOrderType(other)),
        }
    }

    /// Whether a leftover remainder may rest in the book.
    pub fn may_rest(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::PostOnly)
    }
}

/// Order lifecycle state. `Inactive` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Active,
    Inactive,
}

impl OrderStatus {
    pub fn as_u8(&self) -> u8 {
        match self {
            OrderStatus::Active => 0,
            OrderStatus::Inactive => 1,
        }
    }

    pub fn from_u8(code: u8) -> Result<Self, OrderError> {
        match code {
            0 => Ok(OrderStatus::Active),
            1 => Ok(OrderStatus::Inactive),
            other => Err(OrderError::InvalidStatus(other)),
        }
    }
}
