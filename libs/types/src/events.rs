//! Wire payloads
//!
//! `PlaceIntent` is the entry-WAL payload: a 26-byte fixed big-endian
//! layout so replay does not depend on any serializer version.
//! `OrderAccepted` is the versioned JSON event written to the outbox for
//! downstream consumers.

use crate::errors::OrderError;
use crate::order::{OrderType, Side};
use serde::{Deserialize, Serialize};

/// Payload of a `Place` record in the entry WAL.
///
/// Layout: `[user_id:u64][side:u8][otype:u8][price:i64][qty:i64]`,
/// big-endian, 26 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceIntent {
    pub user_id: u64,
    pub side: Side,
    pub order_type: OrderType,
    pub price: i64,
    pub qty: i64,
}

/// Encoded size of a [`PlaceIntent`].
pub const PLACE_INTENT_LEN: usize = 8 + 1 + 1 + 8 + 8;

impl PlaceIntent {
    pub fn encode(&self) -> [u8; PLACE_INTENT_LEN] {
        let mut buf = [0u8; PLACE_INTENT_LEN];
        buf[0..8].copy_from_slice(&self.user_id.to_be_bytes());
        buf[8] = self.side.as_u8();
        buf[9] = self.order_type.as_u8();
        buf[10..18].copy_from_slice(&self.price.to_be_bytes());
        buf[18..26].copy_from_slice(&self.qty.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, OrderError> {
        if buf.len() != PLACE_INTENT_LEN {
            return Err(OrderError::MalformedPayload(format!(
                "place intent is {} bytes, expected {}",
                buf.len(),
                PLACE_INTENT_LEN
            )));
        }
        let user_id = u64::from_be_bytes(buf[0..8].try_into().map_err(|_| {
            OrderError::MalformedPayload("truncated user_id".into())
        })?);
        let side = Side::from_u8(buf[8])?;
        let order_type = OrderType::from_u8(buf[9])?;
        let price = i64::from_be_bytes(buf[10..18].try_into().map_err(|_| {
            OrderError::MalformedPayload("truncated price".into())
        })?);
        let qty = i64::from_be_bytes(buf[18..26].try_into().map_err(|_| {
            OrderError::MalformedPayload("truncated qty".into())
        })?);
        Ok(Self {
            user_id,
            side,
            order_type,
            price,
            qty,
        })
    }
}

/// Immutable, versioned event emitted through the outbox for every
/// accepted order. Consumers dedupe by `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAccepted {
    /// Event schema version.
    pub v: u32,
    /// Event type discriminator, always `"ORDER_ACCEPTED"`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub seq: u64,
    pub id: u64,
    pub side: Side,
    pub otype: OrderType,
    pub price: i64,
    pub qty: i64,
}

impl OrderAccepted {
    pub fn new(seq: u64, side: Side, otype: OrderType, price: i64, qty: i64) -> Self {
        Self {
            v: 1,
            event_type: "ORDER_ACCEPTED".to_string(),
            seq,
            id: seq,
            side,
            otype,
            price,
            qty,
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        // serde_json on a plain struct cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}
