//! Book Index - one side of one instrument's order book.
//!
//! Price levels live in a `BTreeMap` keyed by price; each level is an
//! arena-linked FIFO of order ids. The index only knows ids and prices;
//! the orders themselves live in the matching engine's registry.
//!
//! Scanning is driven by an explicit [`Cursor`] returned from
//! [`BookIndex::match_head`] and handed back to [`BookIndex::match_next`].
//! A cursor is only meaningful within the matching pass that produced it.

use std::collections::BTreeMap;
use std::ops::Bound;

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::arena::{Arena, ArenaIndex};
use crate::order::Side;
use crate::price_level::PriceLevel;

/// Resume point for a match scan.
///
/// Records the level of the last candidate handed out and the queue entry
/// that followed it at that moment, so the candidate itself may be removed
/// before the scan continues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    price: Decimal,
    next: ArenaIndex,
}

impl Cursor {
    /// Price level the last candidate was taken from.
    pub fn price(&self) -> Decimal {
        self.price
    }
}

/// Price-ordered FIFO index of the resting orders on one side of a book.
///
/// Buy books iterate highest price first, sell books lowest price first.
pub struct BookIndex {
    /// Side of the orders resting here
    side: Side,
    /// Queue nodes for every resting order
    arena: Arena,
    /// Non-empty price levels keyed by price
    levels: BTreeMap<Decimal, PriceLevel>,
    /// OrderId -> node, for O(1) removal
    positions: FxHashMap<String, ArenaIndex>,
}

impl BookIndex {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            arena: Arena::new(),
            levels: BTreeMap::new(),
            positions: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Append `order_id` to the back of the queue at `price`.
    ///
    /// Returns `false` without touching the index if the id already rests here.
    ///
    /// # Complexity
    /// O(log L) where L is the number of distinct price levels
    pub fn insert(&mut self, price: Decimal, order_id: &str) -> bool {
        if self.positions.contains_key(order_id) {
            return false;
        }

        let index = self.arena.alloc(order_id.to_owned(), price);
        self.levels
            .entry(price)
            .or_insert_with(PriceLevel::new)
            .push_back(&mut self.arena, index);
        self.positions.insert(order_id.to_owned(), index);
        true
    }

    /// Remove `order_id` resting at `price`.
    ///
    /// Drops the level when its queue empties. Returns whether the order was found.
    ///
    /// # Complexity
    /// O(log L)
    pub fn remove(&mut self, price: Decimal, order_id: &str) -> bool {
        let index = match self.positions.get(order_id) {
            Some(&index) if self.arena.get(index).price == price => index,
            _ => return false,
        };

        let Some(level) = self.levels.get_mut(&price) else {
            return false;
        };

        if level.remove(&mut self.arena, index) {
            self.levels.remove(&price);
        }
        self.positions.remove(order_id);
        self.arena.free(index);
        true
    }

    // ========================================================================
    // Match Scanning
    // ========================================================================

    /// First eligible candidate for an incoming order limited at `price`.
    ///
    /// A level is eligible when its price equals `price` or, unless `exact`,
    /// is strictly better for the incoming order (below it on a sell book,
    /// above it on a buy book).
    pub fn match_head(&self, price: Decimal, exact: bool) -> Option<(String, Cursor)> {
        self.first_eligible(self.ordered_levels(), price, exact)
    }

    /// Next candidate after `cursor`.
    ///
    /// Continues within the cursor's level while entries remain, then moves
    /// level by level. If the remembered entry has been removed since, the
    /// scan resumes at the next surviving level.
    pub fn match_next(&self, cursor: Cursor, price: Decimal, exact: bool) -> Option<(String, Cursor)> {
        if let Some(node) = self.arena.get_live(cursor.next) {
            let registered = self.positions.get(&node.order_id) == Some(&cursor.next);
            if registered && node.price == cursor.price {
                let next = Cursor {
                    price: node.price,
                    next: node.next,
                };
                return Some((node.order_id.clone(), next));
            }
        }

        self.first_eligible(self.levels_after(cursor.price), price, exact)
    }

    fn first_eligible<'a, I>(&self, levels: I, price: Decimal, exact: bool) -> Option<(String, Cursor)>
    where
        I: Iterator<Item = (&'a Decimal, &'a PriceLevel)>,
    {
        for (&level_price, level) in levels {
            if self.is_worse(level_price, price) {
                return None;
            }
            if exact && level_price != price {
                continue;
            }
            debug_assert!(!level.is_empty(), "empty price level left in book");
            let head = self.arena.get(level.head);
            return Some((
                head.order_id.clone(),
                Cursor {
                    price: level_price,
                    next: head.next,
                },
            ));
        }
        None
    }

    /// Whether a resting level at `level` is worse than the incoming limit.
    #[inline]
    fn is_worse(&self, level: Decimal, limit: Decimal) -> bool {
        match self.side {
            Side::Sell => level > limit,
            Side::Buy => level < limit,
        }
    }

    fn ordered_levels(&self) -> Box<dyn Iterator<Item = (&Decimal, &PriceLevel)> + '_> {
        match self.side {
            Side::Buy => Box::new(self.levels.iter().rev()),
            Side::Sell => Box::new(self.levels.iter()),
        }
    }

    fn levels_after(&self, price: Decimal) -> Box<dyn Iterator<Item = (&Decimal, &PriceLevel)> + '_> {
        match self.side {
            Side::Buy => Box::new(self.levels.range(..price).rev()),
            Side::Sell => Box::new(self.levels.range((Bound::Excluded(price), Bound::Unbounded))),
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of resting orders.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Number of distinct price levels.
    #[inline]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.positions.contains_key(order_id)
    }

    /// Queue node slots ever allocated. Freed slots are reused before this grows.
    #[inline]
    pub fn node_capacity(&self) -> u32 {
        self.arena.capacity()
    }

    /// Best resting price, if any.
    pub fn best_price(&self) -> Option<Decimal> {
        self.ordered_levels().next().map(|(&price, _)| price)
    }

    /// All resting ids, best price first and FIFO within a price.
    pub fn ordered_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.ordered_levels().flat_map(move |(_, level)| {
            level
                .iter(&self.arena)
                .map(move |index| self.arena.get(index).order_id.as_str())
        })
    }

    /// Levels with their queued ids, in priority order.
    pub fn levels(&self) -> Vec<(Decimal, Vec<String>)> {
        self.ordered_levels()
            .map(|(&price, level)| {
                let ids = level
                    .iter(&self.arena)
                    .map(|index| self.arena.get(index).order_id.clone())
                    .collect();
                (price, ids)
            })
            .collect()
    }
}

impl std::fmt::Debug for BookIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookIndex")
            .field("side", &self.side)
            .field("orders", &self.positions.len())
            .field("levels", &self.levels.len())
            .finish()
    }
}
