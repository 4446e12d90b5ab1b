//! Graph store port consumed by the analysis engine.
//!
//! The engine never talks to a concrete database. It runs closures inside read or
//! write transactions handed out by a [`GraphStore`] and composes [`Criteria`]
//! through the query builders on [`TransactionExt`]. [`MemoryGraph`] is the
//! in-process implementation used by tests, benches and embedders.

pub mod memory;
pub mod model;
pub mod ops;
pub mod query;
pub mod segment;

use tokio_util::sync::CancellationToken;

use crate::types::{EdgeId, Kind, Kinds, NodeId, PenumbraError, Result};

pub use memory::MemoryGraph;
pub use model::{Direction, Node, Properties, Relationship, RelationshipTriple};
pub use query::{Criteria, Target};
pub use segment::{IdSegment, PathSegment, Segment};

/// Callback receiving hydrated nodes; returning `false` stops the scan.
pub type NodeSink<'a> = dyn FnMut(&Node) -> Result<bool> + 'a;
/// Callback receiving hydrated relationships; returning `false` stops the scan.
pub type RelationshipSink<'a> = dyn FnMut(&Relationship) -> Result<bool> + 'a;

/// Read-only view over one consistent graph snapshot.
pub trait Transaction {
    /// Loads node `id`, failing with a not-found error when it does not exist.
    fn node(&self, id: NodeId) -> Result<Node>;

    /// Streams nodes matching `criteria` into `sink`.
    fn scan_nodes(&self, criteria: &Criteria, limit: Option<usize>, sink: &mut NodeSink<'_>) -> Result<()>;

    /// Streams relationships matching `criteria` into `sink`.
    fn scan_relationships(
        &self,
        criteria: &Criteria,
        limit: Option<usize>,
        sink: &mut RelationshipSink<'_>,
    ) -> Result<()>;
}

/// Transaction that may also mutate the graph.
pub trait WriteTransaction: Transaction {
    /// Creates a node and returns it with its assigned identifier.
    fn create_node(&mut self, kinds: Kinds, properties: Properties) -> Result<Node>;

    /// Replaces the kinds and properties of an existing node.
    fn update_node(&mut self, node: &Node) -> Result<()>;

    /// Creates a relationship between two existing nodes.
    fn create_relationship_by_ids(
        &mut self,
        start: NodeId,
        end: NodeId,
        kind: Kind,
        properties: Properties,
    ) -> Result<Relationship>;

    /// Replaces the properties of an existing relationship.
    fn update_relationship(&mut self, relationship: &Relationship) -> Result<()>;

    /// Removes relationship `id`, failing with a not-found error when it does not exist.
    fn delete_relationship(&mut self, id: EdgeId) -> Result<()>;
}

/// Transactional graph database.
///
/// Read transactions observe an isolated snapshot. A write transaction is applied
/// atomically when its closure returns `Ok` and discarded otherwise.
pub trait GraphStore: Send + Sync {
    /// Runs `f` inside a read-only transaction.
    fn read_transaction(
        &self,
        ctx: &CancellationToken,
        f: &mut dyn FnMut(&dyn Transaction) -> Result<()>,
    ) -> Result<()>;

    /// Runs `f` inside a write transaction.
    fn write_transaction(
        &self,
        ctx: &CancellationToken,
        f: &mut dyn FnMut(&mut dyn WriteTransaction) -> Result<()>,
    ) -> Result<()>;
}

/// Value-returning wrappers over [`GraphStore`].
pub trait GraphStoreExt: GraphStore {
    /// Runs `f` in a read transaction and returns its value.
    fn read<T>(&self, ctx: &CancellationToken, f: impl FnOnce(&dyn Transaction) -> Result<T>) -> Result<T> {
        let mut f = Some(f);
        let mut out = None;
        self.read_transaction(ctx, &mut |tx| {
            let f = f
                .take()
                .ok_or(PenumbraError::Invariant("read transaction body invoked twice"))?;
            out = Some(f(tx)?);
            Ok(())
        })?;
        out.ok_or(PenumbraError::Invariant("read transaction body never ran"))
    }

    /// Runs `f` in a write transaction and returns its value.
    fn write<T>(
        &self,
        ctx: &CancellationToken,
        f: impl FnOnce(&mut dyn WriteTransaction) -> Result<T>,
    ) -> Result<T> {
        let mut f = Some(f);
        let mut out = None;
        self.write_transaction(ctx, &mut |tx| {
            let f = f
                .take()
                .ok_or(PenumbraError::Invariant("write transaction body invoked twice"))?;
            out = Some(f(tx)?);
            Ok(())
        })?;
        out.ok_or(PenumbraError::Invariant("write transaction body never ran"))
    }
}

impl<G: GraphStore + ?Sized> GraphStoreExt for G {}

/// Query builders available on every transaction.
pub trait TransactionExt: Transaction {
    /// Starts a node query.
    fn nodes(&self) -> NodeQuery<'_, Self> {
        NodeQuery {
            tx: self,
            criteria: Criteria::all(),
            limit: None,
        }
    }

    /// Starts a relationship query.
    fn relationships(&self) -> RelationshipQuery<'_, Self> {
        RelationshipQuery {
            tx: self,
            criteria: Criteria::all(),
            limit: None,
        }
    }
}

impl<T: Transaction + ?Sized> TransactionExt for T {}

/// Node query under construction.
pub struct NodeQuery<'t, T: ?Sized> {
    tx: &'t T,
    criteria: Criteria,
    limit: Option<usize>,
}

impl<T: Transaction + ?Sized> NodeQuery<'_, T> {
    /// ANDs `criteria` into the query.
    pub fn filter(mut self, criteria: Criteria) -> Self {
        self.criteria = self.criteria.and(criteria);
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Streams matching nodes; `visit` returns `false` to stop.
    pub fn each(&self, mut visit: impl FnMut(&Node) -> Result<bool>) -> Result<()> {
        self.tx.scan_nodes(&self.criteria, self.limit, &mut visit)
    }

    /// Hydrated matches.
    pub fn fetch(&self) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        self.each(|node| {
            out.push(node.clone());
            Ok(true)
        })?;
        Ok(out)
    }

    /// Identifiers of matches.
    pub fn fetch_ids(&self) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        self.each(|node| {
            out.push(node.id);
            Ok(true)
        })?;
        Ok(out)
    }

    /// Identifiers and kinds of matches.
    pub fn fetch_kinds(&self) -> Result<Vec<(NodeId, Kinds)>> {
        let mut out = Vec::new();
        self.each(|node| {
            out.push((node.id, node.kinds.clone()));
            Ok(true)
        })?;
        Ok(out)
    }

    /// First match, or a not-found error.
    pub fn first(&self) -> Result<Node> {
        let mut found = None;
        self.tx.scan_nodes(&self.criteria, Some(1), &mut |node| {
            found = Some(node.clone());
            Ok(false)
        })?;
        found.ok_or(PenumbraError::NotFound("node"))
    }

    /// Number of matches.
    pub fn count(&self) -> Result<u64> {
        let mut count = 0u64;
        self.each(|_| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }
}

/// Relationship query under construction.
pub struct RelationshipQuery<'t, T: ?Sized> {
    tx: &'t T,
    criteria: Criteria,
    limit: Option<usize>,
}

impl<T: Transaction + ?Sized> RelationshipQuery<'_, T> {
    /// ANDs `criteria` into the query.
    pub fn filter(mut self, criteria: Criteria) -> Self {
        self.criteria = self.criteria.and(criteria);
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Streams matching relationships; `visit` returns `false` to stop.
    pub fn each(&self, mut visit: impl FnMut(&Relationship) -> Result<bool>) -> Result<()> {
        self.tx.scan_relationships(&self.criteria, self.limit, &mut visit)
    }

    /// Hydrated matches.
    pub fn fetch(&self) -> Result<Vec<Relationship>> {
        let mut out = Vec::new();
        self.each(|rel| {
            out.push(rel.clone());
            Ok(true)
        })?;
        Ok(out)
    }

    /// Identifiers of matches.
    pub fn fetch_ids(&self) -> Result<Vec<EdgeId>> {
        let mut out = Vec::new();
        self.each(|rel| {
            out.push(rel.id);
            Ok(true)
        })?;
        Ok(out)
    }

    /// `{id, start, end}` triples of matches.
    pub fn fetch_triples(&self) -> Result<Vec<RelationshipTriple>> {
        let mut out = Vec::new();
        self.each(|rel| {
            out.push(rel.triple());
            Ok(true)
        })?;
        Ok(out)
    }

    /// Identifiers and kinds of matches.
    pub fn fetch_kinds(&self) -> Result<Vec<(EdgeId, Kind)>> {
        let mut out = Vec::new();
        self.each(|rel| {
            out.push((rel.id, rel.kind.clone()));
            Ok(true)
        })?;
        Ok(out)
    }

    /// First match, or a not-found error.
    pub fn first(&self) -> Result<Relationship> {
        let mut found = None;
        self.tx.scan_relationships(&self.criteria, Some(1), &mut |rel| {
            found = Some(rel.clone());
            Ok(false)
        })?;
        found.ok_or(PenumbraError::NotFound("relationship"))
    }

    /// Number of matches.
    pub fn count(&self) -> Result<u64> {
        let mut count = 0u64;
        self.each(|_| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }
}
