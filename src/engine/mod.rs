//! Matching Core
//!
//! Per-pair order book, price-time priority matching and the single-writer
//! discipline that serializes every mutation of a pair's book, orders and
//! trade log.

pub mod book;
pub mod matching;
pub mod writer;

pub use book::{BookDelta, BookLevel, BookSnapshot, OrderBook, RestingOrder};
pub use matching::{MatchResult, MatchingEngine};
pub use writer::{PairCommand, PairWriter};
