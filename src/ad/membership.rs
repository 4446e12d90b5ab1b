//! Group membership resolution.
//!
//! Every group is the root of one inbound traversal over membership edges. A
//! visited set shared by the whole run guarantees no group is expanded twice:
//! when a traversal reaches a node another traversal already owns, it records a
//! shortcut to that node instead of walking its members again.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use super::schema::{node, prop, rel};
use super::wellknown;
use crate::analysis::{measure, AnalysisConfig, IdAggregator, MAXIMUM_DATABASE_PARALLEL_WORKERS};
use crate::graph::query::{self, Criteria, Target};
use crate::graph::{Direction, GraphStore, GraphStoreExt, TransactionExt};
use crate::primitives::bitmap::{ReachabilitySet, SharedReachabilitySet};
use crate::traversal::{segment_criteria, IdTraversal};
use crate::types::{Kind, NodeId, Result};

/// Resolves the transitive membership of every group and local group.
///
/// `extra` further restricts which membership edges are followed.
pub fn resolve_all_group_memberships(
    ctx: &CancellationToken,
    db: &dyn GraphStore,
    config: &AnalysisConfig,
    extra: &[Criteria],
) -> Result<Arc<IdAggregator>> {
    let _measure = measure(Level::INFO, "resolve_all_group_memberships");

    let mut criteria = vec![query::kind_in(Target::Relationship, &rel::MEMBERSHIP)];
    criteria.extend(extra.iter().cloned());

    let groups = db.read(ctx, |tx| {
        tx.nodes()
            .filter(query::kind_in(Target::Node, &[node::GROUP, node::LOCAL_GROUP]))
            .fetch_ids()
    })?;
    info!(groups = groups.len(), "ad.membership.resolving");

    let visited = SharedReachabilitySet::new();
    let memberships = Arc::new(IdAggregator::new());
    let traversal = IdTraversal::new(db, config.traversal_workers)?;

    for group in groups {
        if !visited.checked_add(group.get()) {
            continue;
        }
        traversal.breadth_first(ctx, group, |tx, segment| {
            let triples = tx
                .relationships()
                .filter(segment_criteria(segment.node(), Direction::Inbound, &criteria))
                .fetch_triples()?;

            let mut next = Vec::with_capacity(triples.len());
            for triple in &triples {
                let member = segment.descend(triple.start, triple.id);
                if visited.checked_add(triple.start.get()) {
                    next.push(member);
                } else {
                    memberships.add_shortcut(&member);
                }
            }
            if next.is_empty() {
                memberships.add_path(segment);
            }
            Ok(next)
        })?;
    }

    info!(resolved = memberships.len(), "ad.membership.resolved");
    Ok(memberships)
}

/// Membership variant used for remote desktop rights: edges touching the
/// Administrators group are not followed.
pub fn expand_all_rdp_local_groups(
    ctx: &CancellationToken,
    db: &dyn GraphStore,
    config: &AnalysisConfig,
) -> Result<Arc<IdAggregator>> {
    info!("ad.membership.expanding_rdp_local_groups");
    let exclude_administrators = query::not(query::or([
        query::ends_with(Target::Start, prop::OBJECT_ID, wellknown::ADMINISTRATORS_SUFFIX),
        query::ends_with(Target::End, prop::OBJECT_ID, wellknown::ADMINISTRATORS_SUFFIX),
    ]));
    resolve_all_group_memberships(ctx, db, config, &[exclude_administrators])
}

/// Every node reachable from `root` in `direction` through relationships
/// matching `criteria`. The root itself is not included.
pub fn fetch_path_members(
    ctx: &CancellationToken,
    db: &dyn GraphStore,
    root: NodeId,
    direction: Direction,
    criteria: &[Criteria],
) -> Result<ReachabilitySet> {
    let visited = SharedReachabilitySet::new();
    visited.add(root.get());

    IdTraversal::new(db, MAXIMUM_DATABASE_PARALLEL_WORKERS)?.breadth_first(ctx, root, |tx, segment| {
        let triples = tx
            .relationships()
            .filter(segment_criteria(segment.node(), direction, criteria))
            .fetch_triples()?;
        Ok(triples
            .iter()
            .filter_map(|triple| {
                let next = direction.next_node(triple);
                visited
                    .checked_add(next.get())
                    .then(|| segment.descend(next, triple.id))
            })
            .collect())
    })?;

    let mut members = visited.snapshot();
    members.remove(root.get());
    Ok(members)
}

/// Buckets `ids` by every kind their nodes carry.
pub fn node_ids_by_kind(
    ctx: &CancellationToken,
    db: &dyn GraphStore,
    ids: &ReachabilitySet,
) -> Result<BTreeMap<Kind, ReachabilitySet>> {
    if ids.is_empty() {
        return Ok(BTreeMap::new());
    }
    db.read(ctx, |tx| {
        let mut buckets: BTreeMap<Kind, ReachabilitySet> = BTreeMap::new();
        for (id, kinds) in tx.nodes().filter(query::id_in(Target::Node, ids.iter())).fetch_kinds()? {
            for kind in kinds.iter() {
                buckets.entry(kind.clone()).or_default().add(id.get());
            }
        }
        Ok(buckets)
    })
}
