//! Per-container reachability bookkeeping with shortcut compression.
//!
//! Traversals report finished paths with [`IdAggregator::add_path`]: every node
//! on the chain becomes a member of each of its ancestors. When a traversal hits
//! a node some other traversal already owns, it records a shortcut with
//! [`IdAggregator::add_shortcut`] instead of walking it again; the shortcut is
//! expanded lazily when [`PathAggregator::cardinality`] is asked for an
//! ancestor. Resolved sets are memoized until the next mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::graph::IdSegment;
use crate::primitives::bitmap::ReachabilitySet;
use crate::types::NodeId;

/// Read side of a resolved membership map.
pub trait PathAggregator: Send + Sync {
    /// Complete transitive membership of `id`, excluding `id` itself.
    ///
    /// Unknown identifiers resolve to an empty set.
    fn cardinality(&self, id: u64) -> ReachabilitySet;

    /// Members of `id` as node identifiers.
    fn members_of(&self, id: NodeId) -> Vec<NodeId> {
        self.cardinality(id.get()).iter().map(NodeId).collect()
    }
}

#[derive(Default)]
struct Entry {
    members: ReachabilitySet,
    shortcuts: ReachabilitySet,
    resolved: Option<(u64, ReachabilitySet)>,
}

type SharedEntry = Arc<Mutex<Entry>>;

/// Thread-safe path aggregator over raw identifiers.
///
/// Writers may call `add_path`/`add_shortcut` concurrently. Readers only lock
/// the entries they touch while resolving.
#[derive(Default)]
pub struct IdAggregator {
    entries: RwLock<FxHashMap<u64, SharedEntry>>,
    generation: AtomicU64,
}

impl IdAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, id: u64) -> Option<SharedEntry> {
        self.entries.read().get(&id).cloned()
    }

    fn entry(&self, id: u64) -> SharedEntry {
        if let Some(entry) = self.get(id) {
            return entry;
        }
        Arc::clone(self.entries.write().entry(id).or_default())
    }

    fn touch(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Records the chain ending at `terminal`: each node becomes a member of
    /// every node between it and the root.
    pub fn add_path(&self, terminal: &IdSegment) {
        let mut below = ReachabilitySet::new();
        terminal.walk_reverse(|node, _| {
            let id = node.get();
            if !below.is_empty() {
                self.entry(id).lock().members.or(&below);
            }
            below.add(id);
            true
        });
        self.touch();
    }

    /// Records that every ancestor of `terminal` contains the terminal node and
    /// its whole membership.
    pub fn add_shortcut(&self, terminal: &IdSegment) {
        let target = terminal.node().get();
        let mut first = true;
        terminal.walk_reverse(|node, _| {
            if first {
                first = false;
            } else if node.get() != target {
                self.entry(node.get()).lock().shortcuts.add(target);
            }
            true
        });
        self.touch();
    }

    /// Adds `members` to `id` directly.
    pub fn add_members(&self, id: u64, members: &ReachabilitySet) {
        self.entry(id).lock().members.or(members);
        self.touch();
    }

    /// Number of identifiers with recorded membership.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Identifiers with recorded membership, ascending.
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.entries.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl PathAggregator for IdAggregator {
    fn cardinality(&self, id: u64) -> ReachabilitySet {
        let generation = self.generation.load(Ordering::Acquire);
        let Some(root) = self.get(id) else {
            return ReachabilitySet::new();
        };

        let mut result = ReachabilitySet::new();
        let mut pending: Vec<u64> = Vec::new();
        {
            let entry = root.lock();
            if let Some((resolved_at, set)) = &entry.resolved {
                if *resolved_at == generation {
                    return set.clone();
                }
            }
            result.or(&entry.members);
            pending.extend(entry.shortcuts.iter());
        }

        let mut expanded = ReachabilitySet::new();
        expanded.add(id);
        while let Some(next) = pending.pop() {
            if !expanded.checked_add(next) {
                continue;
            }
            result.add(next);
            let Some(shared) = self.get(next) else {
                continue;
            };
            let entry = shared.lock();
            match &entry.resolved {
                Some((resolved_at, set)) if *resolved_at == generation => result.or(set),
                _ => {
                    result.or(&entry.members);
                    pending.extend(entry.shortcuts.iter());
                }
            }
        }
        result.remove(id);

        root.lock().resolved = Some((generation, result.clone()));
        result
    }
}
