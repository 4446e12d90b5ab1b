//! Principals holding every one of several rights.
//!
//! Each input slice lists the first-degree holders of one right. A principal
//! qualifies when it appears, directly or through group membership, in every
//! slice. Authenticated Users and Everyone contain practically every principal,
//! so a slice that reaches either of them cannot restrict the result and is
//! left out of the intersection.

use tracing::{error, warn};

use super::schema::{node, prop};
use super::wellknown;
use crate::analysis::PathAggregator;
use crate::graph::query::{self, Target};
use crate::graph::{Node, Transaction, TransactionExt};
use crate::primitives::bitmap::ReachabilitySet;
use crate::types::Result;

/// Authenticated Users and Everyone groups of every domain.
pub fn fetch_auth_users_and_everyone_groups(tx: &dyn Transaction) -> Result<Vec<Node>> {
    tx.nodes()
        .filter(query::and([
            query::kind(Target::Node, node::GROUP),
            query::or([
                query::ends_with(Target::Node, prop::OBJECT_ID, wellknown::AUTHENTICATED_USERS_SUFFIX),
                query::ends_with(Target::Node, prop::OBJECT_ID, wellknown::EVERYONE_SUFFIX),
            ]),
        ]))
        .fetch()
}

/// Cross product of `slices`, using the sentinel groups found in `tx`.
///
/// A sentinel lookup failure is logged and treated as "no sentinels".
pub fn calculate_cross_product_node_sets(
    tx: &dyn Transaction,
    expansions: &dyn PathAggregator,
    slices: &[&[Node]],
) -> ReachabilitySet {
    let sentinels = match fetch_auth_users_and_everyone_groups(tx) {
        Ok(groups) => groups.iter().map(|group| group.id.get()).collect(),
        Err(err) => {
            error!(error = %err, "ad.cross_product.sentinel_lookup_failed");
            ReachabilitySet::new()
        }
    };
    cross_product(expansions, &sentinels, slices)
}

fn is_group(node: &Node) -> bool {
    node.kinds.contains_one_of(&[node::GROUP, node::LOCAL_GROUP])
}

/// Cross product of `slices` given the identifiers of the sentinel groups.
pub fn cross_product(
    expansions: &dyn PathAggregator,
    sentinels: &ReachabilitySet,
    slices: &[&[Node]],
) -> ReachabilitySet {
    if slices.len() < 2 {
        warn!(slices = slices.len(), "ad.cross_product.needs_two_sets");
        return ReachabilitySet::new();
    }

    let mut first_degree_sets = Vec::with_capacity(slices.len());
    let mut unrolled_sets = Vec::with_capacity(slices.len());
    for slice in slices {
        let mut first_degree = ReachabilitySet::new();
        let mut unrolled = ReachabilitySet::new();
        for entity in slice.iter() {
            let id = entity.id.get();
            first_degree.add(id);
            unrolled.add(id);
            if is_group(entity) {
                unrolled.or(&expansions.cardinality(id));
            }
        }
        let reaches_sentinel = sentinels.iter().any(|sentinel| unrolled.contains(sentinel));
        if !reaches_sentinel {
            first_degree_sets.push(first_degree);
            unrolled_sets.push(unrolled);
        }
    }

    match first_degree_sets.len() {
        0 => {
            return slices
                .iter()
                .flat_map(|slice| slice.iter().map(|entity| entity.id.get()))
                .collect();
        }
        1 => return first_degree_sets.swap_remove(0),
        _ => {}
    }

    // Principals present in every restrictive slice other than the first.
    let mut check_set = unrolled_sets[1].clone();
    for unrolled in &unrolled_sets[2..] {
        check_set.and(unrolled);
    }

    let mut result = ReachabilitySet::new();
    let mut remainder = ReachabilitySet::new();
    first_degree_sets[0].each(|id| {
        if check_set.contains(id) {
            result.add(id);
        } else {
            remainder.or(&expansions.cardinality(id));
        }
        true
    });

    // Groups in the remainder, smallest first. Taking a group folds away its
    // members so larger enclosing groups are never expanded twice.
    let mut groups: Vec<(u64, u64)> = remainder
        .iter()
        .filter_map(|id| {
            let members = expansions.cardinality(id).cardinality();
            (members > 0).then_some((members, id))
        })
        .collect();
    groups.sort_unstable();

    for (_, group) in groups {
        if !remainder.contains(group) {
            continue;
        }
        remainder.remove(group);
        if check_set.contains(group) {
            result.add(group);
            remainder.xor(&expansions.cardinality(group));
        }
    }

    remainder.each(|id| {
        if check_set.contains(id) {
            result.add(id);
        }
        true
    });
    result
}
