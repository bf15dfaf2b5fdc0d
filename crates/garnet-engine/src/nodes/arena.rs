//! Node arena
//!
//! Nodes live in slots addressed by `NodeId`. A slot holds the current node
//! behind an `Arc` plus a version counter. Executing threads take a snapshot
//! (`load`) and keep running on it; a rewrite swaps the slot only if its
//! version is still the one the rewriting thread observed, so of two racing
//! rewrites exactly one lands and the slot never holds a torn node.

use super::node::Node;
use parking_lot::RwLock;
use std::sync::Arc;

/// Index of a node in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Slot index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

struct Slot {
    node: Arc<Node>,
    version: u64,
}

/// Versioned node slots; rewrites swap whole nodes
#[derive(Default)]
pub struct NodeArena {
    slots: Vec<RwLock<Slot>>,
}

impl NodeArena {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(RwLock::new(Slot {
            node: Arc::new(node),
            version: 0,
        }));
        id
    }

    /// Current node and its version
    pub fn load(&self, id: NodeId) -> (Arc<Node>, u64) {
        let slot = self.slots[id.index()].read();
        (slot.node.clone(), slot.version)
    }

    /// Current node
    pub fn get(&self, id: NodeId) -> Arc<Node> {
        self.slots[id.index()].read().node.clone()
    }

    /// Number of rewrites the slot has seen
    pub fn version(&self, id: NodeId) -> u64 {
        self.slots[id.index()].read().version
    }

    /// Install `node` if the slot is still at `expected`; false if another
    /// rewrite got there first
    pub fn replace(&self, id: NodeId, expected: u64, node: Node) -> bool {
        let mut slot = self.slots[id.index()].write();
        if slot.version != expected {
            return false;
        }
        slot.node = Arc::new(node);
        slot.version += 1;
        true
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the arena has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
