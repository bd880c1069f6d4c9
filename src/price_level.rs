//! Price Level - A FIFO queue of order ids at a single price point.
//!
//! Implements a doubly-linked list using arena indices for O(1)
//! insertion and removal from any position.

use crate::arena::{Arena, ArenaIndex, NULL_INDEX};

/// A queue of orders at a specific price level.
///
/// Orders are matched in FIFO order (price-time priority).
/// The doubly-linked structure enables O(1) cancel from any position.
#[derive(Clone, Copy, Debug)]
pub struct PriceLevel {
    /// Index of the oldest order (highest priority, first to match)
    pub head: ArenaIndex,
    /// Index of the newest order (last to match)
    pub tail: ArenaIndex,
    /// Number of orders at this level
    pub count: u32,
}

impl PriceLevel {
    /// Create a new empty price level
    #[inline]
    pub const fn new() -> Self {
        Self {
            head: NULL_INDEX,
            tail: NULL_INDEX,
            count: 0,
        }
    }

    /// Returns true if there are no orders at this level
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append an order to the tail of the queue (newest order).
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn push_back(&mut self, arena: &mut Arena, index: ArenaIndex) {
        if self.tail == NULL_INDEX {
            debug_assert!(self.head == NULL_INDEX);
            self.head = index;
            self.tail = index;
            let node = arena.get_mut(index);
            node.prev = NULL_INDEX;
            node.next = NULL_INDEX;
        } else {
            arena.get_mut(self.tail).next = index;
            let node = arena.get_mut(index);
            node.prev = self.tail;
            node.next = NULL_INDEX;
            self.tail = index;
        }

        self.count += 1;
    }

    /// Unlink an order from anywhere in the queue.
    ///
    /// # Returns
    /// `true` if the level is now empty. The node is NOT freed from the
    /// arena; the caller does that.
    ///
    /// # Complexity
    /// O(1)
    pub fn remove(&mut self, arena: &mut Arena, index: ArenaIndex) -> bool {
        let node = arena.get(index);
        let prev_idx = node.prev;
        let next_idx = node.next;

        if prev_idx == NULL_INDEX {
            debug_assert!(self.head == index);
            self.head = next_idx;
        } else {
            arena.get_mut(prev_idx).next = next_idx;
        }

        if next_idx == NULL_INDEX {
            debug_assert!(self.tail == index);
            self.tail = prev_idx;
        } else {
            arena.get_mut(next_idx).prev = prev_idx;
        }

        self.count -= 1;

        let node = arena.get_mut(index);
        node.prev = NULL_INDEX;
        node.next = NULL_INDEX;

        self.count == 0
    }

    /// Iterate the queue's arena indices, oldest first.
    pub fn iter<'a>(&self, arena: &'a Arena) -> LevelIter<'a> {
        LevelIter {
            arena,
            cursor: self.head,
        }
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks a price level's linked queue front to back.
pub struct LevelIter<'a> {
    arena: &'a Arena,
    cursor: ArenaIndex,
}

impl<'a> Iterator for LevelIter<'a> {
    type Item = ArenaIndex;

    fn next(&mut self) -> Option<ArenaIndex> {
        if self.cursor == NULL_INDEX {
            return None;
        }
        let current = self.cursor;
        self.cursor = self.arena.get(current).next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn setup(arena: &mut Arena, level: &mut PriceLevel, count: u32) -> Vec<ArenaIndex> {
        (0..count)
            .map(|i| {
                let idx = arena.alloc(format!("o{i}"), Decimal::new(1000, 2));
                level.push_back(arena, idx);
                idx
            })
            .collect()
    }

    fn ids(arena: &Arena, level: &PriceLevel) -> Vec<String> {
        level
            .iter(arena)
            .map(|idx| arena.get(idx).order_id.clone())
            .collect()
    }

    #[test]
    fn test_empty_level() {
        let level = PriceLevel::new();
        assert!(level.is_empty());
        assert_eq!(level.head, NULL_INDEX);
        assert_eq!(level.tail, NULL_INDEX);
    }

    #[test]
    fn test_push_multiple_fifo() {
        let mut arena = Arena::new();
        let mut level = PriceLevel::new();
        let indices = setup(&mut arena, &mut level, 3);

        assert_eq!(level.count, 3);
        assert_eq!(level.head, indices[0]);
        assert_eq!(level.tail, indices[2]);
        assert_eq!(arena.get(indices[0]).next, indices[1]);
        assert_eq!(arena.get(indices[2]).prev, indices[1]);
        assert_eq!(ids(&arena, &level), vec!["o0", "o1", "o2"]);
    }

    #[test]
    fn test_remove_only_node() {
        let mut arena = Arena::new();
        let mut level = PriceLevel::new();
        let indices = setup(&mut arena, &mut level, 1);

        assert!(level.remove(&mut arena, indices[0]));
        assert!(level.is_empty());
        assert_eq!(level.head, NULL_INDEX);
        assert_eq!(level.tail, NULL_INDEX);
    }

    #[test]
    fn test_remove_head() {
        let mut arena = Arena::new();
        let mut level = PriceLevel::new();
        let indices = setup(&mut arena, &mut level, 3);

        assert!(!level.remove(&mut arena, indices[0]));
        assert_eq!(level.head, indices[1]);
        assert_eq!(arena.get(indices[1]).prev, NULL_INDEX);
        assert_eq!(ids(&arena, &level), vec!["o1", "o2"]);
    }

    #[test]
    fn test_remove_tail() {
        let mut arena = Arena::new();
        let mut level = PriceLevel::new();
        let indices = setup(&mut arena, &mut level, 3);

        assert!(!level.remove(&mut arena, indices[2]));
        assert_eq!(level.tail, indices[1]);
        assert_eq!(arena.get(indices[1]).next, NULL_INDEX);
    }

    #[test]
    fn test_remove_middle() {
        let mut arena = Arena::new();
        let mut level = PriceLevel::new();
        let indices = setup(&mut arena, &mut level, 3);

        assert!(!level.remove(&mut arena, indices[1]));
        assert_eq!(level.count, 2);
        assert_eq!(ids(&arena, &level), vec!["o0", "o2"]);
    }
}
