//! Order book price-level storage shared by every exchange family's
//! merger. The sequencing rules that decide *when* a patch is safe to
//! apply (last-update-id continuity, seqNum/version gaps, checksums) are
//! family-specific and live in `exchange::*`; this module only owns the
//! sorted price levels themselves and the primitive that mutates them.

pub mod merge;

use derive_more::Display;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::marker::PhantomData;

/// A single `(price, amount)` row of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub price: Decimal,
    pub amount: Decimal,
}

impl Level {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }
}

impl From<(Decimal, Decimal)> for Level {
    fn from((price, amount): (Decimal, Decimal)) -> Self {
        Self { price, amount }
    }
}

/// Zero-sized tag distinguishing which side of the book an
/// [`OrderBookSide`] is, and therefore which price ordering it keeps.
#[derive(Debug, Clone, Copy, Display)]
pub struct Bids;

#[derive(Debug, Clone, Copy, Display)]
pub struct Asks;

/// The price ordering a side of the book is kept sorted by: descending
/// for bids (best bid first), ascending for asks (best ask first).
pub trait SideOrder {
    fn cmp_price(a: Decimal, b: Decimal) -> Ordering;
}

impl SideOrder for Bids {
    fn cmp_price(a: Decimal, b: Decimal) -> Ordering {
        b.cmp(&a)
    }
}

impl SideOrder for Asks {
    fn cmp_price(a: Decimal, b: Decimal) -> Ordering {
        a.cmp(&b)
    }
}

/// One side of an order book, kept sorted by [`SideOrder::cmp_price`] at
/// all times.
#[derive(Debug, Clone)]
pub struct OrderBookSide<S> {
    levels: Vec<Level>,
    _side: PhantomData<S>,
}

impl<S: SideOrder> OrderBookSide<S> {
    pub fn new(mut levels: Vec<Level>) -> Self {
        levels.sort_by(|a, b| S::cmp_price(a.price, b.price));
        Self {
            levels,
            _side: PhantomData,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn best(&self) -> Option<Level> {
        self.levels.first().copied()
    }

    /// Apply a single `(price, amount)` row: replace the level at that
    /// price, delete it if `amount` is zero, or insert a new level keeping
    /// sort order. A zero-amount row for a price not currently in the book
    /// is a silent no-op - the exchange telling us to remove something we
    /// never had.
    pub fn upsert(&mut self, level: Level) {
        match self
            .levels
            .binary_search_by(|existing| S::cmp_price(existing.price, level.price))
        {
            Ok(index) => {
                if level.amount.is_zero() {
                    self.levels.remove(index);
                } else {
                    self.levels[index].amount = level.amount;
                }
            }
            Err(index) => {
                if !level.amount.is_zero() {
                    self.levels.insert(index, level);
                }
            }
        }
    }

    pub fn upsert_many(&mut self, patch: impl IntoIterator<Item = Level>) {
        for level in patch {
            self.upsert(level);
        }
    }
}

/// An order book's price levels: strictly-sorted bids and asks with no
/// zero-size rows. Sequencing metadata (last-update-id, seqNum, version,
/// checksum...) lives alongside this in each exchange family's snapshot
/// type, not here.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub bids: OrderBookSide<Bids>,
    pub asks: OrderBookSide<Asks>,
}

impl OrderBook {
    pub fn new(bids: Vec<Level>, asks: Vec<Level>) -> Self {
        Self {
            bids: OrderBookSide::new(bids),
            asks: OrderBookSide::new(asks),
        }
    }

    pub fn upsert_bids(&mut self, patch: impl IntoIterator<Item = Level>) {
        self.bids.upsert_many(patch);
    }

    pub fn upsert_asks(&mut self, patch: impl IntoIterator<Item = Level>) {
        self.asks.upsert_many(patch);
    }

    /// The top `depth` levels of each side, best price first.
    pub fn top(&self, depth: usize) -> (&[Level], &[Level]) {
        let bids_len = self.bids.levels().len().min(depth);
        let asks_len = self.asks.levels().len().min(depth);
        (&self.bids.levels()[..bids_len], &self.asks.levels()[..asks_len])
    }
}
