//! In-memory [`GraphStore`] with snapshot isolation.
//!
//! Committed state lives behind an `Arc`. Readers clone the `Arc` and never block
//! writers; a writer copies the state, mutates its copy and publishes it on
//! success. Writers are serialized by a dedicated lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::query::{Criteria, Scope, Target};
use super::{
    GraphStore, Node, NodeSink, Properties, Relationship, RelationshipSink, Transaction,
    WriteTransaction,
};
use crate::types::{EdgeId, Kind, Kinds, NodeId, PenumbraError, Result};

#[derive(Clone, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, Node>,
    relationships: BTreeMap<EdgeId, Relationship>,
    outbound: FxHashMap<NodeId, Vec<EdgeId>>,
    inbound: FxHashMap<NodeId, Vec<EdgeId>>,
    next_node: u64,
    next_edge: u64,
}

fn check(ctx: &CancellationToken) -> Result<()> {
    if ctx.is_cancelled() {
        Err(PenumbraError::Cancelled)
    } else {
        Ok(())
    }
}

impl GraphState {
    fn node(&self, id: NodeId) -> Result<Node> {
        self.nodes.get(&id).cloned().ok_or(PenumbraError::NotFound("node"))
    }

    fn scan_nodes(
        &self,
        ctx: &CancellationToken,
        criteria: &Criteria,
        limit: Option<usize>,
        sink: &mut NodeSink<'_>,
    ) -> Result<()> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut emitted = 0usize;
        let candidates: Box<dyn Iterator<Item = &Node>> = match criteria.pinned_id(Target::Node) {
            Some(id) => Box::new(self.nodes.get(&NodeId(id)).into_iter()),
            None => Box::new(self.nodes.values()),
        };
        for node in candidates {
            if emitted >= limit {
                break;
            }
            check(ctx)?;
            if criteria.matches(&Scope::node(node)) {
                emitted += 1;
                if !sink(node)? {
                    break;
                }
            }
        }
        Ok(())
    }

    fn candidate_edges(&self, criteria: &Criteria) -> Vec<EdgeId> {
        if let Some(id) = criteria.pinned_id(Target::Relationship) {
            return vec![EdgeId(id)];
        }
        if let Some(start) = criteria.pinned_id(Target::Start) {
            return self.outbound.get(&NodeId(start)).cloned().unwrap_or_default();
        }
        if let Some(end) = criteria.pinned_id(Target::End) {
            return self.inbound.get(&NodeId(end)).cloned().unwrap_or_default();
        }
        self.relationships.keys().copied().collect()
    }

    fn scan_relationships(
        &self,
        ctx: &CancellationToken,
        criteria: &Criteria,
        limit: Option<usize>,
        sink: &mut RelationshipSink<'_>,
    ) -> Result<()> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut emitted = 0usize;
        for id in self.candidate_edges(criteria) {
            if emitted >= limit {
                break;
            }
            check(ctx)?;
            let Some(rel) = self.relationships.get(&id) else {
                continue;
            };
            let (Some(start), Some(end)) = (self.nodes.get(&rel.start), self.nodes.get(&rel.end)) else {
                return Err(PenumbraError::Invariant("relationship endpoint missing"));
            };
            if criteria.matches(&Scope::relationship(start, rel, end)) {
                emitted += 1;
                if !sink(rel)? {
                    break;
                }
            }
        }
        Ok(())
    }
}

struct MemoryReadTx<'a> {
    state: Arc<GraphState>,
    ctx: &'a CancellationToken,
}

impl Transaction for MemoryReadTx<'_> {
    fn node(&self, id: NodeId) -> Result<Node> {
        check(self.ctx)?;
        self.state.node(id)
    }

    fn scan_nodes(&self, criteria: &Criteria, limit: Option<usize>, sink: &mut NodeSink<'_>) -> Result<()> {
        self.state.scan_nodes(self.ctx, criteria, limit, sink)
    }

    fn scan_relationships(
        &self,
        criteria: &Criteria,
        limit: Option<usize>,
        sink: &mut RelationshipSink<'_>,
    ) -> Result<()> {
        self.state.scan_relationships(self.ctx, criteria, limit, sink)
    }
}

struct MemoryWriteTx<'a> {
    state: GraphState,
    ctx: &'a CancellationToken,
}

impl Transaction for MemoryWriteTx<'_> {
    fn node(&self, id: NodeId) -> Result<Node> {
        check(self.ctx)?;
        self.state.node(id)
    }

    fn scan_nodes(&self, criteria: &Criteria, limit: Option<usize>, sink: &mut NodeSink<'_>) -> Result<()> {
        self.state.scan_nodes(self.ctx, criteria, limit, sink)
    }

    fn scan_relationships(
        &self,
        criteria: &Criteria,
        limit: Option<usize>,
        sink: &mut RelationshipSink<'_>,
    ) -> Result<()> {
        self.state.scan_relationships(self.ctx, criteria, limit, sink)
    }
}

impl WriteTransaction for MemoryWriteTx<'_> {
    fn create_node(&mut self, kinds: Kinds, properties: Properties) -> Result<Node> {
        check(self.ctx)?;
        self.state.next_node += 1;
        let node = Node::new(NodeId(self.state.next_node), kinds, properties);
        self.state.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    fn update_node(&mut self, node: &Node) -> Result<()> {
        check(self.ctx)?;
        let slot = self
            .state
            .nodes
            .get_mut(&node.id)
            .ok_or(PenumbraError::NotFound("node"))?;
        *slot = node.clone();
        Ok(())
    }

    fn create_relationship_by_ids(
        &mut self,
        start: NodeId,
        end: NodeId,
        kind: Kind,
        properties: Properties,
    ) -> Result<Relationship> {
        check(self.ctx)?;
        if !self.state.nodes.contains_key(&start) || !self.state.nodes.contains_key(&end) {
            return Err(PenumbraError::NotFound("relationship endpoint"));
        }
        self.state.next_edge += 1;
        let rel = Relationship {
            id: EdgeId(self.state.next_edge),
            start,
            end,
            kind,
            properties,
        };
        self.state.outbound.entry(start).or_default().push(rel.id);
        self.state.inbound.entry(end).or_default().push(rel.id);
        self.state.relationships.insert(rel.id, rel.clone());
        Ok(rel)
    }

    fn update_relationship(&mut self, relationship: &Relationship) -> Result<()> {
        check(self.ctx)?;
        let slot = self
            .state
            .relationships
            .get_mut(&relationship.id)
            .ok_or(PenumbraError::NotFound("relationship"))?;
        slot.properties = relationship.properties.clone();
        Ok(())
    }

    fn delete_relationship(&mut self, id: EdgeId) -> Result<()> {
        check(self.ctx)?;
        let rel = self
            .state
            .relationships
            .remove(&id)
            .ok_or(PenumbraError::NotFound("relationship"))?;
        if let Some(edges) = self.state.outbound.get_mut(&rel.start) {
            edges.retain(|edge| *edge != id);
        }
        if let Some(edges) = self.state.inbound.get_mut(&rel.end) {
            edges.retain(|edge| *edge != id);
        }
        Ok(())
    }
}

/// Counters describing a [`MemoryGraph`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MemoryGraphStats {
    /// Committed nodes.
    pub nodes: usize,
    /// Committed relationships.
    pub relationships: usize,
    /// Successful write transactions.
    pub commits: u64,
}

/// In-memory transactional graph.
#[derive(Default)]
pub struct MemoryGraph {
    committed: RwLock<Arc<GraphState>>,
    writer: Mutex<()>,
    commits: AtomicU64,
}

impl MemoryGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counters.
    pub fn stats(&self) -> MemoryGraphStats {
        let state = self.committed.read().clone();
        MemoryGraphStats {
            nodes: state.nodes.len(),
            relationships: state.relationships.len(),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

impl GraphStore for MemoryGraph {
    fn read_transaction(
        &self,
        ctx: &CancellationToken,
        f: &mut dyn FnMut(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        check(ctx)?;
        let tx = MemoryReadTx {
            state: self.committed.read().clone(),
            ctx,
        };
        f(&tx)
    }

    fn write_transaction(
        &self,
        ctx: &CancellationToken,
        f: &mut dyn FnMut(&mut dyn WriteTransaction) -> Result<()>,
    ) -> Result<()> {
        check(ctx)?;
        let _writer = self.writer.lock();
        let base = self.committed.read().clone();
        let mut tx = MemoryWriteTx {
            state: (*base).clone(),
            ctx,
        };
        f(&mut tx)?;
        check(ctx)?;
        let created = tx.state.next_edge - base.next_edge;
        let deleted = (base.relationships.len() as u64 + created).saturating_sub(tx.state.relationships.len() as u64);
        *self.committed.write() = Arc::new(tx.state);
        let commit = self.commits.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(commit, created_relationships = created, deleted_relationships = deleted, "graph.memory.commit");
        Ok(())
    }
}
