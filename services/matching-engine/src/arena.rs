//! Order arena — pre-allocated slab of order slots with handle indices.
//!
//! Orders never move and are addressed by u32 handles; the intrusive
//! next/prev links inside each slot form the FIFO queues of the price
//! levels. The free list is threaded through the `next` field of unused
//! slots, giving O(1) alloc and free with no heap traffic in the hot
//! path.

use types::{OrderStatus, OrderType, Side};

/// Sentinel handle meaning "no order".
pub const NULL_HANDLE: OrderHandle = u32::MAX;

/// Index of an order slot inside the arena.
pub type OrderHandle = u32;

/// A single order slot.
///
/// Invariants: `0 <= filled <= qty`; `status == Inactive` implies the
/// slot is not linked into any price level.
#[derive(Debug, Clone)]
pub struct Order {
    /// Equals `seq`; the authoritative identifier.
    pub id: u64,
    /// Signed minor units.
    pub price: i64,
    /// Original quantity.
    pub qty: i64,
    /// Monotone non-decreasing, never exceeds `qty`.
    pub filled: i64,
    pub seq: u64,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    /// Global epoch at the moment the order was retired.
    pub retire_epoch: u64,

    pub(crate) next: OrderHandle,
    pub(crate) prev: OrderHandle,
}

impl Order {
    fn empty() -> Self {
        Self {
            id: 0,
            price: 0,
            qty: 0,
            filled: 0,
            seq: 0,
            side: Side::Bid,
            order_type: OrderType::Limit,
            status: OrderStatus::Inactive,
            retire_epoch: 0,
            next: NULL_HANDLE,
            prev: NULL_HANDLE,
        }
    }

    /// Unfilled quantity.
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.qty - self.filled
    }

    /// Zero the slot for reuse.
    pub(crate) fn reset(&mut self) {
        *self = Self::empty();
    }
}

/// Typed object pool of [`Order`] slots.
///
/// Single-writer on the alloc side; the reclaimer frees slots in a slot
/// serialized with the writer (it takes `&mut self`).
pub struct OrderArena {
    slots: Vec<Order>,
    free_head: OrderHandle,
    allocated: u32,
    capacity: u32,
}

impl OrderArena {
    /// Pre-allocate `capacity` slots. Capacity must leave room for the
    /// null sentinel.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity < NULL_HANDLE, "capacity must be below NULL_HANDLE");
        let mut slots = vec![Order::empty(); capacity as usize];
        for i in 0..capacity.saturating_sub(1) {
            slots[i as usize].next = i + 1;
        }
        if capacity > 0 {
            slots[(capacity - 1) as usize].next = NULL_HANDLE;
        }
        Self {
            slots,
            free_head: if capacity > 0 { 0 } else { NULL_HANDLE },
            allocated: 0,
            capacity,
        }
    }

    /// Pop a slot from the free list. Returns `None` when exhausted;
    /// callers treat that as fatal (capacity must exceed arrival rate
    /// times reclamation latency).
    #[inline]
    pub fn alloc(&mut self) -> Option<OrderHandle> {
        if self.free_head == NULL_HANDLE {
            return None;
        }
        let handle = self.free_head;
        self.free_head = self.slots[handle as usize].next;
        self.allocated += 1;

        let slot = &mut self.slots[handle as usize];
        slot.next = NULL_HANDLE;
        slot.prev = NULL_HANDLE;
        Some(handle)
    }

    /// Reset a slot and return it to the free list.
    #[inline]
    pub fn free(&mut self, handle: OrderHandle) {
        debug_assert!(handle < self.capacity, "handle out of bounds");
        debug_assert!(self.allocated > 0, "free on empty arena");
        let slot = &mut self.slots[handle as usize];
        slot.reset();
        slot.next = self.free_head;
        self.free_head = handle;
        self.allocated -= 1;
    }

    #[inline]
    pub fn get(&self, handle: OrderHandle) -> &Order {
        debug_assert!(handle < self.capacity, "handle out of bounds");
        &self.slots[handle as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, handle: OrderHandle) -> &mut Order {
        debug_assert!(handle < self.capacity, "handle out of bounds");
        &mut self.slots[handle as usize]
    }

    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head == NULL_HANDLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_creation() {
        let arena = OrderArena::new(64);
        assert_eq!(arena.capacity(), 64);
        assert_eq!(arena.allocated(), 0);
        assert!(!arena.is_full());
    }

    #[test]
    fn test_alloc_free_reuse() {
        let mut arena = OrderArena::new(3);
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        let c = arena.alloc().unwrap();
        assert!(arena.is_full());
        assert!(arena.alloc().is_none());

        arena.free(b);
        assert_eq!(arena.allocated(), 2);

        // Freed slot is reused first (LIFO free list)
        let d = arena.alloc().unwrap();
        assert_eq!(d, b);

        arena.free(a);
        arena.free(c);
        arena.free(d);
        assert_eq!(arena.allocated(), 0);
    }

    #[test]
    fn test_free_resets_slot() {
        let mut arena = OrderArena::new(4);
        let h = arena.alloc().unwrap();
        {
            let o = arena.get_mut(h);
            o.id = 7;
            o.seq = 7;
            o.price = 100;
            o.qty = 5;
            o.filled = 5;
            o.status = OrderStatus::Inactive;
            o.retire_epoch = 3;
        }
        arena.free(h);
        let h2 = arena.alloc().unwrap();
        assert_eq!(h2, h);
        let o = arena.get(h2);
        assert_eq!(o.id, 0);
        assert_eq!(o.qty, 0);
        assert_eq!(o.filled, 0);
        assert_eq!(o.retire_epoch, 0);
        assert_eq!(o.next, NULL_HANDLE);
        assert_eq!(o.prev, NULL_HANDLE);
    }

    #[test]
    fn test_remaining() {
        let mut arena = OrderArena::new(2);
        let h = arena.alloc().unwrap();
        let o = arena.get_mut(h);
        o.qty = 10;
        o.filled = 4;
        assert_eq!(o.remaining(), 6);
    }

    #[test]
    fn test_zero_capacity() {
        let mut arena = OrderArena::new(0);
        assert!(arena.alloc().is_none());
    }
}
