#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use common::{add_node, link, named};
use penumbra::ad::cross_product::calculate_cross_product_node_sets;
use penumbra::ad::membership::resolve_all_group_memberships;
use penumbra::ad::schema::{node, rel};
use penumbra::graph::ops::fetch_first_degree;
use penumbra::graph::{GraphStoreExt, MemoryGraph, Properties};
use penumbra::types::{NodeId, Result};
use penumbra::AnalysisConfig;
use tokio_util::sync::CancellationToken;

struct Acl {
    target: NodeId,
    alice: NodeId,
    bob: NodeId,
    operators: NodeId,
    everyone: NodeId,
}

/// `operators` holds GetChanges, `alice` and `bob` are operators. The second
/// right is granted by `grant_second`.
fn acl(graph: &MemoryGraph, grant_second: impl Fn(&Acl) -> Vec<NodeId>) -> Result<Acl> {
    graph.write(&CancellationToken::new(), |tx| {
        let acl = Acl {
            target: add_node(tx, node::DOMAIN, Properties::new())?,
            alice: add_node(tx, node::USER, Properties::new())?,
            bob: add_node(tx, node::USER, Properties::new())?,
            operators: add_node(tx, node::GROUP, Properties::new())?,
            everyone: add_node(tx, node::GROUP, named("EVERYONE@CORP.LOCAL", "CORP.LOCAL-S-1-1-0"))?,
        };
        for member in [acl.alice, acl.bob] {
            link(tx, member, acl.operators, rel::MEMBER_OF)?;
            link(tx, member, acl.everyone, rel::MEMBER_OF)?;
        }
        link(tx, acl.operators, acl.target, rel::GET_CHANGES)?;
        for holder in grant_second(&acl) {
            link(tx, holder, acl.target, rel::GET_CHANGES_ALL)?;
        }
        Ok(acl)
    })
}

fn holders(graph: &MemoryGraph, target: NodeId) -> Result<Vec<u64>> {
    let ctx = CancellationToken::new();
    let expansions = resolve_all_group_memberships(&ctx, graph, &AnalysisConfig::single_threaded(), &[])?;
    graph.read(&ctx, |tx| {
        let first = fetch_first_degree(tx, target, &[rel::GET_CHANGES])?;
        let second = fetch_first_degree(tx, target, &[rel::GET_CHANGES_ALL])?;
        Ok(calculate_cross_product_node_sets(tx, expansions.as_ref(), &[&first, &second]).slice())
    })
}

#[test]
fn direct_holder_inside_group_holder() -> Result<()> {
    let graph = MemoryGraph::new();
    let acl = acl(&graph, |acl| vec![acl.alice])?;
    assert_eq!(holders(&graph, acl.target)?, vec![acl.alice.get()]);
    Ok(())
}

#[test]
fn same_group_on_both_rights() -> Result<()> {
    let graph = MemoryGraph::new();
    let acl = acl(&graph, |acl| vec![acl.operators])?;
    assert_eq!(holders(&graph, acl.target)?, vec![acl.operators.get()]);
    Ok(())
}

#[test]
fn sentinel_slice_does_not_restrict() -> Result<()> {
    // Everyone holds the second right, so only the first slice matters.
    let graph = MemoryGraph::new();
    let acl = acl(&graph, |acl| vec![acl.everyone])?;
    assert_eq!(holders(&graph, acl.target)?, vec![acl.operators.get()]);
    Ok(())
}

#[test]
fn disjoint_holders_yield_nothing() -> Result<()> {
    let graph = MemoryGraph::new();
    let target = graph.write(&CancellationToken::new(), |tx| {
        let target = add_node(tx, node::DOMAIN, Properties::new())?;
        let insider = add_node(tx, node::USER, Properties::new())?;
        let outsider = add_node(tx, node::USER, Properties::new())?;
        link(tx, insider, target, rel::GET_CHANGES)?;
        link(tx, outsider, target, rel::GET_CHANGES_ALL)?;
        Ok(target)
    })?;
    assert!(holders(&graph, target)?.is_empty());
    Ok(())
}
