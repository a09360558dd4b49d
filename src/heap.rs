//! Addressable query heap for the CH searches.
//!
//! A binary heap of `(key, node)` pairs ordered by key, plus dense per-node
//! arrays for membership, current key and parent. Membership is tracked by
//! an epoch counter so `clear` touches only nodes inserted this round
//! instead of zeroing `|V|` slots. Decrease-key pushes a fresh heap entry;
//! stale entries are dropped lazily at pop.
//!
//! Keys may be negative: the matrix forward sweep seeds sources with the
//! negated weight-plus-offset of the phantom segment.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::graph::{NodeId, Weight, INVALID_NODE};

pub struct QueryHeap {
    heap: BinaryHeap<Reverse<(Weight, NodeId)>>,
    epoch: u32,
    inserted_epoch: Vec<u32>,
    keys: Vec<Weight>,
    parents: Vec<NodeId>,
    settled: Vec<bool>,
    touched: Vec<NodeId>,
}

impl QueryHeap {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            epoch: 1,
            inserted_epoch: vec![0; num_nodes],
            keys: vec![0; num_nodes],
            parents: vec![INVALID_NODE; num_nodes],
            settled: vec![false; num_nodes],
            touched: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inserted_epoch.len()
    }

    /// O(touched): bumps the epoch and resets only logged nodes.
    pub fn clear(&mut self) {
        self.heap.clear();
        for &node in &self.touched {
            self.settled[node as usize] = false;
        }
        self.touched.clear();
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.inserted_epoch.fill(0);
            self.epoch = 1;
        }
    }

    #[inline]
    pub fn was_inserted(&self, node: NodeId) -> bool {
        self.inserted_epoch[node as usize] == self.epoch
    }

    #[inline]
    pub fn key(&self, node: NodeId) -> Weight {
        debug_assert!(self.was_inserted(node));
        self.keys[node as usize]
    }

    #[inline]
    pub fn parent(&self, node: NodeId) -> NodeId {
        debug_assert!(self.was_inserted(node));
        self.parents[node as usize]
    }

    #[inline]
    pub fn was_settled(&self, node: NodeId) -> bool {
        self.was_inserted(node) && self.settled[node as usize]
    }

    pub fn insert(&mut self, node: NodeId, key: Weight, parent: NodeId) {
        debug_assert!(!self.was_inserted(node));
        let idx = node as usize;
        self.inserted_epoch[idx] = self.epoch;
        self.keys[idx] = key;
        self.parents[idx] = parent;
        self.settled[idx] = false;
        self.touched.push(node);
        self.heap.push(Reverse((key, node)));
    }

    pub fn decrease_key(&mut self, node: NodeId, key: Weight, parent: NodeId) {
        debug_assert!(self.was_inserted(node));
        debug_assert!(key <= self.keys[node as usize]);
        let idx = node as usize;
        self.keys[idx] = key;
        self.parents[idx] = parent;
        self.heap.push(Reverse((key, node)));
    }

    /// Pop the minimum-key node, skipping stale entries. Marks it settled.
    pub fn delete_min(&mut self) -> Option<NodeId> {
        while let Some(Reverse((key, node))) = self.heap.pop() {
            let idx = node as usize;
            if key > self.keys[idx] || self.settled[idx] {
                continue;
            }
            self.settled[idx] = true;
            return Some(node);
        }
        None
    }

    /// Key of the current minimum without popping, skipping stale entries.
    pub fn min_key(&mut self) -> Option<Weight> {
        while let Some(&Reverse((key, node))) = self.heap.peek() {
            let idx = node as usize;
            if key > self.keys[idx] || self.settled[idx] {
                self.heap.pop();
                continue;
            }
            return Some(key);
        }
        None
    }

    pub fn is_empty(&mut self) -> bool {
        self.min_key().is_none()
    }
}

/// Forward/backward heap pair reused across the requests of one worker.
pub struct SearchHeaps {
    pub forward: QueryHeap,
    pub backward: QueryHeap,
}

impl SearchHeaps {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            forward: QueryHeap::new(num_nodes),
            backward: QueryHeap::new(num_nodes),
        }
    }
}

thread_local! {
    static SCRATCH: std::cell::RefCell<Option<SearchHeaps>> = const { std::cell::RefCell::new(None) };
}

/// Run `f` with this worker's scratch heaps, (re)allocating when the
/// snapshot's node count changed. Heaps are cleared before `f` runs.
pub fn with_search_heaps<R>(num_nodes: usize, f: impl FnOnce(&mut SearchHeaps) -> R) -> R {
    SCRATCH.with(|cell| {
        let mut slot = cell.borrow_mut();
        let needs_init = slot
            .as_ref()
            .map(|h| h.forward.capacity() != num_nodes)
            .unwrap_or(true);
        if needs_init {
            *slot = Some(SearchHeaps::new(num_nodes));
        }
        let heaps = slot.as_mut().unwrap();
        heaps.forward.clear();
        heaps.backward.clear();
        f(heaps)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_key_order() {
        let mut heap = QueryHeap::new(8);
        heap.insert(3, 30, INVALID_NODE);
        heap.insert(1, 10, INVALID_NODE);
        heap.insert(2, 20, INVALID_NODE);
        assert_eq!(heap.delete_min(), Some(1));
        assert_eq!(heap.delete_min(), Some(2));
        assert_eq!(heap.delete_min(), Some(3));
        assert_eq!(heap.delete_min(), None);
    }

    #[test]
    fn decrease_key_reorders_and_updates_parent() {
        let mut heap = QueryHeap::new(4);
        heap.insert(0, 5, INVALID_NODE);
        heap.insert(1, 50, 0);
        heap.decrease_key(1, 2, 3);
        assert_eq!(heap.delete_min(), Some(1));
        assert_eq!(heap.key(1), 2);
        assert_eq!(heap.parent(1), 3);
        assert_eq!(heap.delete_min(), Some(0));
    }

    #[test]
    fn negative_keys_sort_before_zero() {
        let mut heap = QueryHeap::new(4);
        heap.insert(0, 0, INVALID_NODE);
        heap.insert(1, -25, INVALID_NODE);
        assert_eq!(heap.min_key(), Some(-25));
        assert_eq!(heap.delete_min(), Some(1));
    }

    #[test]
    fn clear_resets_membership_cheaply() {
        let mut heap = QueryHeap::new(4);
        heap.insert(2, 9, INVALID_NODE);
        assert!(heap.was_inserted(2));
        heap.clear();
        assert!(!heap.was_inserted(2));
        assert_eq!(heap.delete_min(), None);
        // reusable after clear
        heap.insert(2, 1, INVALID_NODE);
        assert_eq!(heap.delete_min(), Some(2));
    }
}
