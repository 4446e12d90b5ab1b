//! Free-standing fetch helpers shared by derivers.

use rustc_hash::FxHashSet;

use super::{Criteria, Node, Relationship, Target, Transaction, TransactionExt};
use crate::graph::query;
use crate::primitives::bitmap::ReachabilitySet;
use crate::types::{Kind, NodeId, Result};

/// Nodes matching `criteria`.
pub fn fetch_nodes(tx: &dyn Transaction, criteria: Criteria) -> Result<Vec<Node>> {
    tx.nodes().filter(criteria).fetch()
}

/// Identifiers of nodes matching `criteria`.
pub fn fetch_node_ids(tx: &dyn Transaction, criteria: Criteria) -> Result<Vec<NodeId>> {
    tx.nodes().filter(criteria).fetch_ids()
}

/// Identifiers of nodes matching `criteria`, as a reachability set.
pub fn fetch_node_set(tx: &dyn Transaction, criteria: Criteria) -> Result<ReachabilitySet> {
    let mut set = ReachabilitySet::new();
    tx.nodes().filter(criteria).each(|node| {
        set.add(node.id.get());
        Ok(true)
    })?;
    Ok(set)
}

/// Node `id`.
pub fn fetch_node(tx: &dyn Transaction, id: NodeId) -> Result<Node> {
    tx.node(id)
}

fn fetch_endpoint_nodes(tx: &dyn Transaction, criteria: Criteria, target: Target) -> Result<Vec<Node>> {
    let mut seen = FxHashSet::default();
    let mut ids = Vec::new();
    tx.relationships().filter(criteria).each(|rel| {
        let id = if target == Target::Start { rel.start } else { rel.end };
        if seen.insert(id) {
            ids.push(id);
        }
        Ok(true)
    })?;
    ids.into_iter().map(|id| tx.node(id)).collect()
}

/// Distinct start nodes of relationships matching `criteria`, in discovery order.
pub fn fetch_start_nodes(tx: &dyn Transaction, criteria: Criteria) -> Result<Vec<Node>> {
    fetch_endpoint_nodes(tx, criteria, Target::Start)
}

/// Distinct end nodes of relationships matching `criteria`, in discovery order.
pub fn fetch_end_nodes(tx: &dyn Transaction, criteria: Criteria) -> Result<Vec<Node>> {
    fetch_endpoint_nodes(tx, criteria, Target::End)
}

/// Start and end nodes of `relationship`.
pub fn fetch_relationship_nodes(tx: &dyn Transaction, relationship: &Relationship) -> Result<(Node, Node)> {
    Ok((tx.node(relationship.start)?, tx.node(relationship.end)?))
}

/// Start nodes of `kinds` relationships pointing at `target`.
///
/// This is the "first-degree holders of a right on an object" query most
/// derivers start from.
pub fn fetch_first_degree(
    tx: &dyn Transaction,
    target: NodeId,
    kinds: &[Kind],
) -> Result<Vec<Node>> {
    fetch_start_nodes(
        tx,
        query::and([
            query::id_equals(Target::End, target),
            query::kind_in(Target::Relationship, kinds),
        ]),
    )
}

/// End nodes of `kinds` relationships leaving `source`.
pub fn fetch_outbound(
    tx: &dyn Transaction,
    source: NodeId,
    kinds: &[Kind],
) -> Result<Vec<Node>> {
    fetch_end_nodes(
        tx,
        query::and([
            query::id_equals(Target::Start, source),
            query::kind_in(Target::Relationship, kinds),
        ]),
    )
}
