//! Path segments stored in a shared arena.
//!
//! A traversal grows one tree per root. Every segment is an arena slot holding a
//! node, the relationship used to reach it and the index of its parent slot, so
//! segments are cheap handles and parent links never form reference cycles.
//! Slots are append-only and the arena is shared by the traversal workers.

use std::sync::Arc;

use parking_lot::RwLock;

use super::model::{Node, Relationship};
use crate::types::{EdgeId, NodeId};

struct Slot<N, E> {
    node: N,
    edge: Option<E>,
    parent: Option<u32>,
    depth: u32,
}

struct Arena<N, E> {
    slots: RwLock<Vec<Slot<N, E>>>,
}

/// Handle to one segment of a traversal tree.
pub struct Segment<N, E> {
    arena: Arc<Arena<N, E>>,
    index: u32,
}

/// Segment over raw identifiers, used by the ID traversal engine.
pub type IdSegment = Segment<NodeId, EdgeId>;

/// Segment over hydrated entities, used by pattern traversal.
pub type PathSegment = Segment<Node, Relationship>;

impl<N, E> Clone for Segment<N, E> {
    fn clone(&self) -> Self {
        Self {
            arena: Arc::clone(&self.arena),
            index: self.index,
        }
    }
}

impl<N: Clone, E: Clone> Segment<N, E> {
    /// Starts a new tree rooted at `node`.
    pub fn root(node: N) -> Self {
        let arena = Arc::new(Arena {
            slots: RwLock::new(vec![Slot {
                node,
                edge: None,
                parent: None,
                depth: 0,
            }]),
        });
        Self { arena, index: 0 }
    }

    fn at(&self, index: u32) -> Self {
        Self {
            arena: Arc::clone(&self.arena),
            index,
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Slot<N, E>) -> R) -> R {
        let slots = self.arena.slots.read();
        f(&slots[self.index as usize])
    }

    /// Appends a child segment reached from this one through `edge`.
    pub fn descend(&self, node: N, edge: E) -> Self {
        let mut slots = self.arena.slots.write();
        let depth = slots[self.index as usize].depth + 1;
        let index = slots.len() as u32;
        slots.push(Slot {
            node,
            edge: Some(edge),
            parent: Some(self.index),
            depth,
        });
        self.at(index)
    }

    /// Node held by this segment.
    pub fn node(&self) -> N {
        self.read(|slot| slot.node.clone())
    }

    /// Relationship that led to this segment; `None` at the root.
    pub fn edge(&self) -> Option<E> {
        self.read(|slot| slot.edge.clone())
    }

    /// Parent segment; `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        self.read(|slot| slot.parent).map(|index| self.at(index))
    }

    /// Number of relationships between this segment and the root.
    pub fn depth(&self) -> u32 {
        self.read(|slot| slot.depth)
    }

    /// Returns true for the root segment.
    pub fn is_root(&self) -> bool {
        self.index == 0
    }

    /// Node at the root of the tree.
    pub fn root_node(&self) -> N {
        self.at(0).node()
    }

    /// Visits this segment and each ancestor up to the root until `visit` returns false.
    pub fn walk_reverse(&self, mut visit: impl FnMut(&N, Option<&E>) -> bool) {
        let slots = self.arena.slots.read();
        let mut cursor = Some(self.index);
        while let Some(index) = cursor {
            let slot = &slots[index as usize];
            if !visit(&slot.node, slot.edge.as_ref()) {
                return;
            }
            cursor = slot.parent;
        }
    }

    /// Closest-to-root segment on the chain from this segment to the root whose
    /// node satisfies `predicate`.
    pub fn search(&self, mut predicate: impl FnMut(&N) -> bool) -> Option<Self> {
        let mut found = None;
        {
            let slots = self.arena.slots.read();
            let mut cursor = Some(self.index);
            while let Some(index) = cursor {
                let slot = &slots[index as usize];
                if predicate(&slot.node) {
                    found = Some(index);
                }
                cursor = slot.parent;
            }
        }
        found.map(|index| self.at(index))
    }

    /// Nodes and relationships from the root to this segment.
    pub fn path(&self) -> (Vec<N>, Vec<E>) {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        self.walk_reverse(|node, edge| {
            nodes.push(node.clone());
            if let Some(edge) = edge {
                edges.push(edge.clone());
            }
            true
        });
        nodes.reverse();
        edges.reverse();
        (nodes, edges)
    }
}

impl IdSegment {
    /// Identifiers on the chain from this segment to the root, terminal first.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.depth() as usize + 1);
        self.walk_reverse(|node, _| {
            ids.push(*node);
            true
        });
        ids
    }
}

impl std::fmt::Debug for IdSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdSegment")
            .field("node", &self.node())
            .field("depth", &self.depth())
            .finish()
    }
}
