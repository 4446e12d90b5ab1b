#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::collections::{BTreeSet, VecDeque};

use common::{add_node, link};
use penumbra::ad::membership::resolve_all_group_memberships;
use penumbra::ad::schema::{node, rel};
use penumbra::graph::{GraphStoreExt, MemoryGraph, Properties};
use penumbra::types::{NodeId, Result};
use penumbra::{AnalysisConfig, PathAggregator};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

fn members(aggregator: &dyn PathAggregator, id: NodeId) -> Vec<u64> {
    aggregator.cardinality(id.get()).slice()
}

#[test]
fn cyclic_groups_share_every_member() -> Result<()> {
    let graph = MemoryGraph::new();
    let (user, a, b, c) = graph.write(&CancellationToken::new(), |tx| {
        let user = add_node(tx, node::USER, Properties::new())?;
        let a = add_node(tx, node::GROUP, Properties::new())?;
        let b = add_node(tx, node::GROUP, Properties::new())?;
        let c = add_node(tx, node::GROUP, Properties::new())?;
        link(tx, user, a, rel::MEMBER_OF)?;
        link(tx, a, b, rel::MEMBER_OF)?;
        link(tx, b, c, rel::MEMBER_OF)?;
        link(tx, c, a, rel::MEMBER_OF)?;
        Ok((user, a, b, c))
    })?;

    let resolved = resolve_all_group_memberships(
        &CancellationToken::new(),
        &graph,
        &AnalysisConfig::default(),
        &[],
    )?;
    let sorted = |mut ids: Vec<NodeId>| {
        ids.sort();
        ids.into_iter().map(NodeId::get).collect::<Vec<_>>()
    };
    assert_eq!(members(resolved.as_ref(), a), sorted(vec![user, b, c]));
    assert_eq!(members(resolved.as_ref(), b), sorted(vec![user, a, c]));
    assert_eq!(members(resolved.as_ref(), c), sorted(vec![user, a, b]));
    assert!(members(resolved.as_ref(), user).is_empty());
    Ok(())
}

#[test]
fn shared_subgroups_are_resolved_for_every_parent() -> Result<()> {
    // Two parents share one nested group; whichever traversal reaches it second
    // records a shortcut.
    let graph = MemoryGraph::new();
    let (users, nested, parents) = graph.write(&CancellationToken::new(), |tx| {
        let nested = add_node(tx, node::GROUP, Properties::new())?;
        let mut users = Vec::new();
        for _ in 0..3 {
            let user = add_node(tx, node::USER, Properties::new())?;
            link(tx, user, nested, rel::MEMBER_OF)?;
            users.push(user.get());
        }
        let mut parents = Vec::new();
        for _ in 0..2 {
            let parent = add_node(tx, node::GROUP, Properties::new())?;
            link(tx, nested, parent, rel::MEMBER_OF)?;
            parents.push(parent);
        }
        Ok((users, nested, parents))
    })?;

    let resolved = resolve_all_group_memberships(
        &CancellationToken::new(),
        &graph,
        &AnalysisConfig::single_threaded(),
        &[],
    )?;
    let mut expected = users.clone();
    expected.push(nested.get());
    expected.sort_unstable();
    for parent in parents {
        assert_eq!(members(resolved.as_ref(), parent), expected);
    }
    assert_eq!(members(resolved.as_ref(), nested), users);
    Ok(())
}

/// Inbound reachability computed one root at a time.
fn reachable_members(edges: &[(usize, usize)], root: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(next) = queue.pop_front() {
        for &(from, to) in edges {
            if to == next && from != to && seen.insert(from) {
                queue.push_back(from);
            }
        }
    }
    seen.remove(&root);
    seen
}

fn arb_graph() -> impl Strategy<Value = (Vec<bool>, Vec<(usize, usize)>)> {
    (2usize..14).prop_flat_map(|count| {
        (
            prop::collection::vec(any::<bool>(), count),
            prop::collection::vec((0..count, 0..count), 0..count * 3),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn shortcuts_match_per_root_traversal((is_group, edges) in arb_graph(), workers in 1usize..5) {
        let graph = MemoryGraph::new();
        let ids = graph
            .write(&CancellationToken::new(), |tx| {
                let ids = is_group
                    .iter()
                    .map(|&group| add_node(tx, if group { node::GROUP } else { node::USER }, Properties::new()))
                    .collect::<Result<Vec<_>>>()?;
                for &(from, to) in &edges {
                    link(tx, ids[from], ids[to], rel::MEMBER_OF)?;
                }
                Ok(ids)
            })
            .unwrap();

        let config = AnalysisConfig {
            traversal_workers: workers,
            ..AnalysisConfig::default()
        };
        let resolved = resolve_all_group_memberships(&CancellationToken::new(), &graph, &config, &[]).unwrap();

        for (index, &group) in is_group.iter().enumerate() {
            if !group {
                continue;
            }
            let expected: Vec<u64> = reachable_members(&edges, index)
                .into_iter()
                .map(|member| ids[member].get())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            prop_assert_eq!(members(resolved.as_ref(), ids[index]), expected);
        }
    }
}
