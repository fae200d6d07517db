//! Two-sided price-time-priority book.

pub mod order_book;
pub mod price_level;
pub mod tree;

pub use order_book::{BookError, OrderBook, PlaceOutcome, RejectReason};
pub use price_level::PriceLevel;
pub use tree::PriceTree;
