//! Step-wise pattern matching over hydrated paths.
//!
//! A [`Pattern`] is an ordered list of steps. Each step follows relationships in
//! one direction that match its criteria, between `min` and `max` times
//! (`max == 0` is unbounded, `min == 0` makes the step optional). Paths never
//! revisit a node. Every path that completes all steps is reported as a terminal
//! [`PathSegment`].

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::graph::query::Criteria;
use crate::graph::{Direction, GraphStore, GraphStoreExt, Node, PathSegment, Relationship, Transaction, TransactionExt};
use crate::traversal::segment_criteria;
use crate::types::{EdgeId, NodeId, PenumbraError, Result};

#[derive(Clone, Debug)]
struct Step {
    direction: Direction,
    criteria: Criteria,
    min: u32,
    max: u32,
}

/// Ordered traversal pattern.
#[derive(Clone, Debug, Default)]
pub struct Pattern {
    steps: Vec<Step>,
}

impl Pattern {
    /// Creates an empty pattern, which matches only its root.
    pub fn new() -> Self {
        Self::default()
    }

    fn step(mut self, direction: Direction, min: u32, max: u32, criteria: Criteria) -> Self {
        self.steps.push(Step {
            direction,
            criteria,
            min,
            max,
        });
        self
    }

    /// Follows exactly one outbound relationship matching `criteria`.
    pub fn outbound(self, criteria: Criteria) -> Self {
        self.step(Direction::Outbound, 1, 1, criteria)
    }

    /// Follows exactly one inbound relationship matching `criteria`.
    pub fn inbound(self, criteria: Criteria) -> Self {
        self.step(Direction::Inbound, 1, 1, criteria)
    }

    /// Follows between `min` and `max` outbound relationships matching `criteria`.
    pub fn outbound_with_depth(self, min: u32, max: u32, criteria: Criteria) -> Self {
        self.step(Direction::Outbound, min, max, criteria)
    }

    /// Follows between `min` and `max` inbound relationships matching `criteria`.
    pub fn inbound_with_depth(self, min: u32, max: u32, criteria: Criteria) -> Self {
        self.step(Direction::Inbound, min, max, criteria)
    }

    /// Runs the pattern from `root` inside one read transaction.
    pub fn run(
        &self,
        ctx: &CancellationToken,
        db: &dyn GraphStore,
        root: &Node,
        on_terminal: impl FnMut(&PathSegment) -> Result<()>,
    ) -> Result<()> {
        db.read(ctx, |tx| self.run_in(ctx, tx, root, on_terminal))
    }

    /// Runs the pattern from `root` inside an existing transaction.
    pub fn run_in(
        &self,
        ctx: &CancellationToken,
        tx: &dyn Transaction,
        root: &Node,
        mut on_terminal: impl FnMut(&PathSegment) -> Result<()>,
    ) -> Result<()> {
        let mut queue = VecDeque::new();
        queue.push_back((PathSegment::root(root.clone()), 0usize, 0u32));
        let mut terminals = 0u64;

        while let Some((segment, index, hops)) = queue.pop_front() {
            if ctx.is_cancelled() {
                return Err(PenumbraError::Cancelled);
            }
            let Some(step) = self.steps.get(index) else {
                terminals += 1;
                on_terminal(&segment)?;
                continue;
            };
            if hops >= step.min {
                queue.push_back((segment.clone(), index + 1, 0));
            }
            if step.max != 0 && hops >= step.max {
                continue;
            }
            let current = segment.node().id;
            let criteria = segment_criteria(current, step.direction, std::slice::from_ref(&step.criteria));
            for rel in tx.relationships().filter(criteria).fetch()? {
                let next = step.direction.next_node(&rel.triple());
                if on_chain(&segment, next) {
                    continue;
                }
                let node = tx.node(next)?;
                queue.push_back((segment.descend(node, rel), index, hops + 1));
            }
        }
        trace!(root = root.id.get(), terminals, "traversal.pattern.complete");
        Ok(())
    }

    /// Collects every completed path from `root`.
    pub fn collect(&self, ctx: &CancellationToken, db: &dyn GraphStore, root: &Node) -> Result<PathSet> {
        let mut paths = PathSet::new();
        self.run(ctx, db, root, |segment| {
            paths.add(Path::from(segment));
            Ok(())
        })?;
        Ok(paths)
    }
}

fn on_chain(segment: &PathSegment, id: NodeId) -> bool {
    let mut found = false;
    segment.walk_reverse(|node, _| {
        found = node.id == id;
        !found
    });
    found
}

/// Nodes and relationships of one path, root first.
#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    /// Nodes from root to terminal.
    pub nodes: Vec<Node>,
    /// Relationships between consecutive nodes.
    pub edges: Vec<Relationship>,
}

impl Path {
    /// First node of the path.
    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Last node of the path.
    pub fn terminal(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// Returns true when the path passes through `id`.
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|node| node.id == id)
    }

    /// The same path walked from terminal to root.
    pub fn reversed(mut self) -> Self {
        self.nodes.reverse();
        self.edges.reverse();
        self
    }

    fn key(&self) -> (NodeId, Vec<EdgeId>) {
        (
            self.nodes.first().map(|node| node.id).unwrap_or_default(),
            self.edges.iter().map(|edge| edge.id).collect(),
        )
    }
}

impl From<&PathSegment> for Path {
    fn from(segment: &PathSegment) -> Self {
        let (nodes, edges) = segment.path();
        Path { nodes, edges }
    }
}

/// De-duplicated collection of paths.
#[derive(Clone, Debug, Default)]
pub struct PathSet {
    paths: Vec<Path>,
    seen: FxHashSet<(NodeId, Vec<EdgeId>)>,
}

impl PathSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `path` unless an identical path is already present.
    pub fn add(&mut self, path: Path) {
        if self.seen.insert(path.key()) {
            self.paths.push(path);
        }
    }

    /// Adds every path of `other`.
    pub fn add_all(&mut self, other: PathSet) {
        for path in other.paths {
            self.add(path);
        }
    }

    /// Number of distinct paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns true when the set holds no path.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterates the paths in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter()
    }

    /// Distinct nodes across all paths, ordered by identifier.
    pub fn all_nodes(&self) -> Vec<Node> {
        let mut seen = FxHashSet::default();
        let mut nodes: Vec<Node> = self
            .paths
            .iter()
            .flat_map(|path| path.nodes.iter())
            .filter(|node| seen.insert(node.id))
            .cloned()
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes
    }
}

impl Extend<Path> for PathSet {
    fn extend<I: IntoIterator<Item = Path>>(&mut self, paths: I) {
        for path in paths {
            self.add(path);
        }
    }
}
