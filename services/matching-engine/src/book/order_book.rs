//! Two-sided order book and matching.
//!
//! Single-writer. Matching is deterministic: it depends only on
//! red-black key order, FIFO order within a level, and the input
//! sequence. Fully filled makers are retired into the ring with the
//! current global epoch; empty levels are deleted eagerly.

use crate::arena::{OrderArena, OrderHandle, NULL_HANDLE};
use crate::book::price_level::PriceLevel;
use crate::book::tree::PriceTree;
use crate::epoch::EpochTracker;
use crate::ring::RetireRing;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use types::{OrderStatus, OrderType, Side};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    /// The retire ring has no room; the reclaimer is starved. Fail fast
    /// rather than leak the slot.
    #[error("retire ring full; reclaimer is starved")]
    RetireRingFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A post-only order would have executed on arrival.
    PostOnlyCross,
    /// A fill-or-kill order found less crossing liquidity than its size.
    FokInsufficientLiquidity,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::PostOnlyCross => write!(f, "post-only order would cross"),
            RejectReason::FokInsufficientLiquidity => {
                write!(f, "fill-or-kill liquidity insufficient")
            }
        }
    }
}

/// What happened to the incoming order.
///
/// For `Killed` and `Rejected` the book has already retired the order;
/// for `Filled` the caller retires it after emitting its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// Remainder is resting in the book.
    Rested,
    /// Fully executed; status is Inactive, caller retires.
    Filled,
    /// Non-resting type with leftover quantity; retired by the book.
    Killed,
    /// Rejected without resting; retired by the book.
    Rejected(RejectReason),
}

pub struct OrderBook {
    bids: PriceTree,
    asks: PriceTree,
    last_seq: AtomicU64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: PriceTree::new(),
            asks: PriceTree::new(),
            last_seq: AtomicU64::new(0),
        }
    }

    /// Highest sequence number the book has seen.
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    /// Place an order. The order slot must be Active with `filled == 0`.
    pub fn place(
        &mut self,
        arena: &mut OrderArena,
        ring: &RetireRing,
        epochs: &EpochTracker,
        handle: OrderHandle,
    ) -> Result<PlaceOutcome, BookError> {
        let (seq, side, order_type, price) = {
            let o = arena.get(handle);
            (o.seq, o.side, o.order_type, o.price)
        };
        self.last_seq.store(seq, Ordering::Release);

        // Post-only must not execute on arrival: check the cross before
        // any matching so the resting side stays untouched on reject.
        if order_type == OrderType::PostOnly {
            if self.would_cross(side, price) {
                retire_order(arena, ring, epochs, handle)?;
                return Ok(PlaceOutcome::Rejected(RejectReason::PostOnlyCross));
            }
            self.rest(arena, handle);
            return Ok(PlaceOutcome::Rested);
        }

        // Fill-or-kill dry run: reject without trading when the crossing
        // liquidity cannot cover the full size.
        if order_type == OrderType::Fok {
            let available = self.crossing_liquidity(side, order_type, price);
            if available < arena.get(handle).qty {
                retire_order(arena, ring, epochs, handle)?;
                return Ok(PlaceOutcome::Rejected(RejectReason::FokInsufficientLiquidity));
            }
        }

        self.match_incoming(arena, ring, epochs, handle)?;

        let remaining = arena.get(handle).remaining();
        if remaining > 0 {
            if order_type.may_rest() {
                self.rest(arena, handle);
                return Ok(PlaceOutcome::Rested);
            }
            retire_order(arena, ring, epochs, handle)?;
            return Ok(PlaceOutcome::Killed);
        }

        arena.get_mut(handle).status = OrderStatus::Inactive;
        Ok(PlaceOutcome::Filled)
    }

    /// Restore an Active order directly into its level, bypassing the
    /// matcher. Snapshot-loader path only.
    pub fn restore(&mut self, arena: &mut OrderArena, handle: OrderHandle) {
        let (seq, side, price) = {
            let o = arena.get(handle);
            (o.seq, o.side, o.price)
        };
        if seq > self.last_seq() {
            self.last_seq.store(seq, Ordering::Release);
        }
        match side {
            Side::Bid => self.bids.get_or_create(price).enqueue(arena, handle),
            Side::Ask => self.asks.get_or_create(price).enqueue(arena, handle),
        }
    }

    /// Visit bid levels best (highest) first.
    pub fn walk_bids_desc(&self, visit: impl FnMut(&PriceLevel) -> bool) {
        self.bids.walk_desc(visit);
    }

    /// Visit ask levels best (lowest) first.
    pub fn walk_asks_asc(&self, visit: impl FnMut(&PriceLevel) -> bool) {
        self.asks.walk_asc(visit);
    }

    /// Best bid as (price, total_qty).
    pub fn best_bid(&self) -> Option<(i64, i64)> {
        self.bids.best_max().map(|lvl| (lvl.price, lvl.total_qty))
    }

    /// Best ask as (price, total_qty).
    pub fn best_ask(&self) -> Option<(i64, i64)> {
        self.asks.best_min().map(|lvl| (lvl.price, lvl.total_qty))
    }

    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    pub fn bid_level(&self, price: i64) -> Option<&PriceLevel> {
        self.bids.find(price)
    }

    pub fn ask_level(&self, price: i64) -> Option<&PriceLevel> {
        self.asks.find(price)
    }

    // ── matching internals ──────────────────────────────────────────

    fn match_incoming(
        &mut self,
        arena: &mut OrderArena,
        ring: &RetireRing,
        epochs: &EpochTracker,
        handle: OrderHandle,
    ) -> Result<(), BookError> {
        let (side, order_type, limit_price) = {
            let o = arena.get(handle);
            (o.side, o.order_type, o.price)
        };

        while arena.get(handle).remaining() > 0 {
            let opposite = match side {
                Side::Bid => &mut self.asks,
                Side::Ask => &mut self.bids,
            };
            let best_price = match side {
                Side::Bid => opposite.best_min_price(),
                Side::Ask => opposite.best_max_price(),
            };
            let best_price = match best_price {
                Some(p) => p,
                None => break,
            };
            if order_type != OrderType::Market {
                let crosses = match side {
                    Side::Bid => best_price <= limit_price,
                    Side::Ask => best_price >= limit_price,
                };
                if !crosses {
                    break;
                }
            }

            let level = match opposite.find_mut(best_price) {
                Some(lvl) => lvl,
                None => break,
            };
            let maker = level.head();
            debug_assert!(maker != NULL_HANDLE, "non-empty level with no head");
            if maker == NULL_HANDLE {
                break;
            }

            let trade = arena
                .get(handle)
                .remaining()
                .min(arena.get(maker).remaining());
            arena.get_mut(handle).filled += trade;
            let maker_done = {
                let m = arena.get_mut(maker);
                m.filled += trade;
                m.remaining() == 0
            };
            level.reduce_qty(trade);

            if maker_done {
                level.pop_head(arena);
                let empty = level.is_empty();
                retire_order(arena, ring, epochs, maker)?;
                if empty {
                    opposite.remove(best_price);
                }
            }
        }
        Ok(())
    }

    /// Total crossing liquidity visible to an order of the given side,
    /// type, and limit price. Market orders see every level.
    fn crossing_liquidity(&self, side: Side, order_type: OrderType, limit_price: i64) -> i64 {
        let mut sum: i64 = 0;
        let price_filtered = order_type != OrderType::Market;
        match side {
            Side::Bid => self.asks.walk_asc(|lvl| {
                if price_filtered && lvl.price > limit_price {
                    return false;
                }
                sum = sum.saturating_add(lvl.total_qty);
                true
            }),
            Side::Ask => self.bids.walk_desc(|lvl| {
                if price_filtered && lvl.price < limit_price {
                    return false;
                }
                sum = sum.saturating_add(lvl.total_qty);
                true
            }),
        }
        sum
    }

    fn would_cross(&self, side: Side, price: i64) -> bool {
        match side {
            Side::Bid => self
                .asks
                .best_min_price()
                .map_or(false, |best| best <= price),
            Side::Ask => self
                .bids
                .best_max_price()
                .map_or(false, |best| best >= price),
        }
    }

    fn rest(&mut self, arena: &mut OrderArena, handle: OrderHandle) {
        let (side, price) = {
            let o = arena.get(handle);
            (o.side, o.price)
        };
        match side {
            Side::Bid => self.bids.get_or_create(price).enqueue(arena, handle),
            Side::Ask => self.asks.get_or_create(price).enqueue(arena, handle),
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Mark an order Inactive and hand it to the reclaimer. The retire
/// epoch is a fresh load of the global counter, which the reclamation
/// safety argument depends on.
pub fn retire_order(
    arena: &mut OrderArena,
    ring: &RetireRing,
    epochs: &EpochTracker,
    handle: OrderHandle,
) -> Result<(), BookError> {
    let epoch = epochs.current();
    let o = arena.get_mut(handle);
    o.status = OrderStatus::Inactive;
    o.retire_epoch = epoch;
    if !ring.push(handle, epoch) {
        return Err(BookError::RetireRingFull);
    }
    Ok(())
}
