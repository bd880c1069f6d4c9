//! Arena - slab of queue nodes addressed by stable `u32` indices.
//!
//! Price-level FIFO queues link their entries through this arena instead
//! of holding references to each other. Freed slots go on a free list and
//! are reused before the backing vector grows.

use std::fmt;

use rust_decimal::Decimal;

/// Sentinel value representing a null/invalid index (like nullptr)
pub const NULL_INDEX: u32 = u32::MAX;

/// Type alias for arena indices - our "compressed pointers"
pub type ArenaIndex = u32;

/// One resting order's place in a price-level queue.
#[derive(Clone, Debug)]
pub struct QueueNode {
    /// Order identifier (unique within the book side)
    pub order_id: String,

    /// Price of the level this node belongs to
    pub price: Decimal,

    // === Linkage (FIFO queue pointers within a PriceLevel) ===

    /// Index of next (younger) order at same price level
    pub next: ArenaIndex,

    /// Index of previous (older) order, enables O(1) removal
    pub prev: ArenaIndex,

    /// False while the slot sits on the free list
    pub live: bool,
}

impl QueueNode {
    /// Create a new, unlinked node
    #[inline]
    pub fn new(order_id: String, price: Decimal) -> Self {
        Self {
            order_id,
            price,
            next: NULL_INDEX,
            prev: NULL_INDEX,
            live: true,
        }
    }

    /// Create an empty node (for the free list)
    #[inline]
    pub fn empty() -> Self {
        Self {
            order_id: String::new(),
            price: Decimal::ZERO,
            next: NULL_INDEX,
            prev: NULL_INDEX,
            live: false,
        }
    }

    /// Reset the node for reuse (when returning to free list)
    #[inline]
    pub fn reset(&mut self) {
        self.order_id.clear();
        self.price = Decimal::ZERO;
        self.next = NULL_INDEX;
        self.prev = NULL_INDEX;
        self.live = false;
    }
}

/// Growable node pool with O(1) allocation and deallocation.
///
/// Uses a free list threaded through the `next` field of unused nodes.
pub struct Arena {
    /// Contiguous block of nodes
    nodes: Vec<QueueNode>,

    /// Head of the free list (index of first available node)
    free_head: ArenaIndex,

    /// Number of currently allocated nodes
    allocated_count: u32,
}

impl Arena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an arena with `capacity` pre-allocated, free nodes.
    ///
    /// # Panics
    /// Panics if capacity reaches `NULL_INDEX` (reserved as the null link)
    pub fn with_capacity(capacity: u32) -> Self {
        assert!(capacity < NULL_INDEX, "Capacity must be less than NULL_INDEX");

        let mut nodes = vec![QueueNode::empty(); capacity as usize];

        // Thread the free list through all nodes
        for i in 1..capacity {
            nodes[(i - 1) as usize].next = i;
        }

        Self {
            nodes,
            free_head: if capacity > 0 { 0 } else { NULL_INDEX },
            allocated_count: 0,
        }
    }

    /// Allocate a node holding `order_id` at `price`.
    ///
    /// Pops the free list when possible, otherwise grows the pool.
    ///
    /// # Complexity
    /// O(1) amortized
    pub fn alloc(&mut self, order_id: String, price: Decimal) -> ArenaIndex {
        let index = if self.free_head == NULL_INDEX {
            let index = self.nodes.len() as ArenaIndex;
            assert!(index < NULL_INDEX, "Arena exhausted the index space");
            self.nodes.push(QueueNode::empty());
            index
        } else {
            let index = self.free_head;
            self.free_head = self.nodes[index as usize].next;
            index
        };

        self.nodes[index as usize] = QueueNode::new(order_id, price);
        self.allocated_count += 1;
        index
    }

    /// Free a node back to the arena.
    ///
    /// The caller must have unlinked it from its price level first.
    ///
    /// # Complexity
    /// O(1) - pushes to head of free list
    #[inline]
    pub fn free(&mut self, index: ArenaIndex) {
        debug_assert!((index as usize) < self.nodes.len(), "Index out of bounds");
        debug_assert!(self.nodes[index as usize].live, "Double free detected");

        let node = &mut self.nodes[index as usize];
        node.reset();
        node.next = self.free_head;
        self.free_head = index;
        self.allocated_count -= 1;
    }

    /// Get an immutable reference to a node.
    #[inline]
    pub fn get(&self, index: ArenaIndex) -> &QueueNode {
        &self.nodes[index as usize]
    }

    /// Get a mutable reference to a node.
    #[inline]
    pub fn get_mut(&mut self, index: ArenaIndex) -> &mut QueueNode {
        &mut self.nodes[index as usize]
    }

    /// Look up a node only if the index points at a live slot.
    #[inline]
    pub fn get_live(&self, index: ArenaIndex) -> Option<&QueueNode> {
        self.nodes.get(index as usize).filter(|node| node.live)
    }

    /// Returns the number of currently allocated nodes.
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated_count
    }

    /// Returns the number of slots (live or free) in the pool.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Returns true if the arena is empty (no allocated nodes).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocated_count == 0
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.nodes.len())
            .field("allocated", &self.allocated_count)
            .field("free_head", &self.free_head)
            .finish()
    }
}
