#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use common::{add_node, link};
use penumbra::ad::membership::fetch_path_members;
use penumbra::ad::schema::{node, rel};
use penumbra::graph::query::{self, Target};
use penumbra::graph::{Direction, GraphStoreExt, MemoryGraph, Node, Properties, WriteTransaction};
use penumbra::traversal::{expand_segment, IdTraversal, Pattern};
use penumbra::types::{Kinds, NodeId, PenumbraError, Result};
use tokio_util::sync::CancellationToken;

/// user -> g1 -> g2 -> g3, with g3 AdminTo host and g1 AdminTo host.
struct Chain {
    user: Node,
    groups: Vec<NodeId>,
    host: NodeId,
}

fn chain(graph: &MemoryGraph) -> Result<Chain> {
    graph.write(&CancellationToken::new(), |tx| {
        let user = tx.create_node(Kinds::from([node::USER]), Properties::new())?;
        let mut groups = Vec::new();
        let mut previous = user.id;
        for _ in 0..3 {
            let group = add_node(tx, node::GROUP, Properties::new())?;
            link(tx, previous, group, rel::MEMBER_OF)?;
            groups.push(group);
            previous = group;
        }
        let host = add_node(tx, node::COMPUTER, Properties::new())?;
        link(tx, groups[2], host, rel::ADMIN_TO)?;
        link(tx, groups[0], host, rel::ADMIN_TO)?;
        Ok(Chain { user, groups, host })
    })
}

fn admin_paths(min: u32, max: u32) -> Pattern {
    Pattern::new()
        .outbound_with_depth(min, max, query::kind(Target::Relationship, rel::MEMBER_OF))
        .outbound(query::and([
            query::kind(Target::Relationship, rel::ADMIN_TO),
            query::kind(Target::End, node::COMPUTER),
        ]))
}

#[test]
fn depth_bounds_select_paths() -> Result<()> {
    let graph = MemoryGraph::new();
    let chain = chain(&graph)?;
    let ctx = CancellationToken::new();

    let depths = |pattern: Pattern| -> Result<Vec<usize>> {
        let paths = pattern.collect(&ctx, &graph, &chain.user)?;
        let mut depths: Vec<usize> = paths.iter().map(|path| path.edges.len()).collect();
        depths.sort_unstable();
        Ok(depths)
    };
    assert_eq!(depths(admin_paths(0, 0))?, vec![2, 4]);
    assert_eq!(depths(admin_paths(1, 2))?, vec![2]);
    assert_eq!(depths(admin_paths(3, 3))?, vec![4]);
    assert!(depths(admin_paths(4, 0))?.is_empty());

    let paths = admin_paths(0, 0).collect(&ctx, &graph, &chain.user)?;
    for path in paths.iter() {
        assert_eq!(path.terminal().map(|n| n.id), Some(chain.host));
        assert_eq!(path.nodes.len(), path.edges.len() + 1);
    }
    Ok(())
}

#[test]
fn terminal_search_finds_nearest_to_root() -> Result<()> {
    let graph = MemoryGraph::new();
    let chain = chain(&graph)?;
    let ctx = CancellationToken::new();
    let mut found = Vec::new();
    admin_paths(3, 3).run(&ctx, &graph, &chain.user, |terminal| {
        let group = terminal.search(|hop| hop.has_kind(&node::GROUP));
        found.push(group.map(|segment| segment.node().id));
        Ok(())
    })?;
    assert_eq!(found, vec![Some(chain.groups[0])]);
    Ok(())
}

#[test]
fn callback_errors_stop_the_pattern() -> Result<()> {
    let graph = MemoryGraph::new();
    let chain = chain(&graph)?;
    let mut calls = 0;
    let err = admin_paths(0, 0)
        .run(&CancellationToken::new(), &graph, &chain.user, |_| {
            calls += 1;
            Err(PenumbraError::Query("stop".into()))
        })
        .unwrap_err();
    assert_eq!(calls, 1);
    assert_eq!(err.to_string(), "query failed: stop");
    Ok(())
}

#[test]
fn cancelled_traversal_reports_cancellation() -> Result<()> {
    let graph = MemoryGraph::new();
    let chain = chain(&graph)?;
    let ctx = CancellationToken::new();
    ctx.cancel();
    let err = IdTraversal::new(&graph, 2)?
        .breadth_first(&ctx, chain.groups[2], |tx, segment| {
            expand_segment(tx, segment, Direction::Inbound, &[])
        })
        .unwrap_err();
    assert!(matches!(err, PenumbraError::Cancelled));
    Ok(())
}

#[test]
fn path_members_in_both_directions() -> Result<()> {
    let graph = MemoryGraph::new();
    let chain = chain(&graph)?;
    let ctx = CancellationToken::new();
    let membership = [query::kind(Target::Relationship, rel::MEMBER_OF)];

    let below = fetch_path_members(&ctx, &graph, chain.groups[2], Direction::Inbound, &membership)?;
    assert_eq!(
        below.slice(),
        vec![chain.user.id.get(), chain.groups[0].get(), chain.groups[1].get()]
    );
    let above = fetch_path_members(&ctx, &graph, chain.user.id, Direction::Outbound, &membership)?;
    assert_eq!(above.slice(), chain.groups.iter().map(|id| id.get()).collect::<Vec<_>>());
    Ok(())
}
