//! Group Policy applicability.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, Level};

use super::schema::{node, prop, rel};
use crate::analysis::{measure, AnalysisConfig, Operation, OperationReport, Outbox};
use crate::graph::ops::{fetch_first_degree, fetch_outbound};
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, GraphStoreExt, Relationship, Transaction, TransactionExt};
use crate::primitives::bitmap::ReachabilitySet;
use crate::traversal::{Path, PathSet, Pattern};
use crate::types::{Kind, NodeId, Result};

/// Rights that let a principal link a GPO to a domain or OU.
pub const GP_LINK_CONTROL: [Kind; 6] = [
    rel::GENERIC_ALL,
    rel::GENERIC_WRITE,
    rel::WRITE_GP_LINK,
    rel::OWNS,
    rel::WRITE_OWNER,
    rel::WRITE_DACL,
];

const LINK_TARGETS: [Kind; 2] = [node::DOMAIN, node::OU];

fn is_enforced(link: &Relationship) -> bool {
    link.properties
        .get(prop::ENFORCED)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

/// Users and computers a GPO linked to `container` applies to.
///
/// Descends through `Contains`. An OU below `container` that blocks
/// inheritance is not entered unless the link is enforced.
pub fn affected_objects(tx: &dyn Transaction, container: NodeId, enforced: bool) -> Result<ReachabilitySet> {
    let mut affected = ReachabilitySet::new();
    let mut visited = ReachabilitySet::of(&[container.get()]);
    let mut queue = VecDeque::from([container]);

    while let Some(next) = queue.pop_front() {
        for child in fetch_outbound(tx, next, &[rel::CONTAINS])? {
            if !visited.checked_add(child.id.get()) {
                continue;
            }
            if child.kinds.contains_one_of(&[node::USER, node::COMPUTER]) {
                affected.add(child.id.get());
            } else if enforced || !(child.has_kind(&node::OU) && child.bool_or(prop::BLOCKS_INHERITANCE, false)) {
                queue.push_back(child.id);
            }
        }
    }
    Ok(affected)
}

/// GPOAppliesTo from `gpo` through each of its links.
pub fn post_gpo_applies_to(tx: &dyn Transaction, outbox: &Outbox<'_>, gpo: NodeId) -> Result<()> {
    let links = tx
        .relationships()
        .filter(query::and([
            query::id_equals(Target::Start, gpo),
            query::kind(Target::Relationship, rel::GP_LINK),
            query::kind_in(Target::End, &LINK_TARGETS),
        ]))
        .fetch()?;

    let mut affected = ReachabilitySet::new();
    for link in &links {
        affected.or(&affected_objects(tx, link.end, is_enforced(link))?);
    }
    affected.each(|object| outbox.emit(gpo, NodeId(object), rel::GPO_APPLIES_TO));
    Ok(())
}

/// CanApplyGPO from every principal able to link a GPO to `container`.
pub fn post_can_apply_gpo(tx: &dyn Transaction, outbox: &Outbox<'_>, container: NodeId) -> Result<()> {
    let controllers = fetch_first_degree(tx, container, &GP_LINK_CONTROL)?;
    if controllers.is_empty() {
        return Ok(());
    }
    // A newly linked GPO is not enforced.
    let affected = affected_objects(tx, container, false)?;
    for controller in &controllers {
        let mut open = true;
        affected.each(|object| {
            open = outbox.emit(controller.id, NodeId(object), rel::CAN_APPLY_GPO);
            open
        });
        if !open {
            break;
        }
    }
    Ok(())
}

/// Paths from `root` through one relationship matching `link` into a domain
/// or OU, then down `Contains` to `object`. Paths entering an OU below the
/// linked container that blocks inheritance are dropped unless `enforced`
/// accepts the link.
fn containment_paths(
    ctx: &CancellationToken,
    tx: &dyn Transaction,
    root: NodeId,
    link: query::Criteria,
    object: NodeId,
    enforced: impl Fn(&Relationship) -> bool,
) -> Result<PathSet> {
    let pattern = Pattern::new()
        .outbound(query::and([link, query::kind_in(Target::End, &LINK_TARGETS)]))
        .outbound_with_depth(1, 0, query::kind(Target::Relationship, rel::CONTAINS));
    let mut paths = PathSet::new();
    pattern.run_in(ctx, tx, &tx.node(root)?, |terminal| {
        if terminal.node().id != object {
            return Ok(());
        }
        let path = Path::from(terminal);
        let open = path.edges.first().is_some_and(&enforced)
            || path.nodes.len() < 4
            || !path.nodes[2..path.nodes.len() - 1]
                .iter()
                .any(|between| between.has_kind(&node::OU) && between.bool_or(prop::BLOCKS_INHERITANCE, false));
        if open {
            paths.add(path);
        }
        Ok(())
    })?;
    Ok(paths)
}

/// Paths behind a GPOAppliesTo relationship: each link of the GPO and the
/// containment chain down to the object.
pub fn gpo_applies_to_composition(
    ctx: &CancellationToken,
    tx: &dyn Transaction,
    edge: &Relationship,
) -> Result<PathSet> {
    containment_paths(
        ctx,
        tx,
        edge.start,
        query::kind(Target::Relationship, rel::GP_LINK),
        edge.end,
        is_enforced,
    )
}

/// Paths behind a CanApplyGPO relationship: the principal's link control
/// right on a domain or OU and the containment chain down to the object.
pub fn can_apply_gpo_composition(
    ctx: &CancellationToken,
    tx: &dyn Transaction,
    edge: &Relationship,
) -> Result<PathSet> {
    containment_paths(
        ctx,
        tx,
        edge.start,
        query::kind_in(Target::Relationship, &GP_LINK_CONTROL),
        edge.end,
        |_| false,
    )
}

/// Derives GPOAppliesTo for every GPO and CanApplyGPO for every domain and OU.
pub fn post_gpos(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
) -> Result<OperationReport> {
    let _measure = measure(Level::INFO, "post_gpos");
    let (gpos, containers) = db.read(ctx, |tx| {
        let gpos = tx.nodes().filter(query::kind(Target::Node, node::GPO)).fetch_ids()?;
        let containers = tx.nodes().filter(query::kind_in(Target::Node, &LINK_TARGETS)).fetch_ids()?;
        Ok((gpos, containers))
    })?;
    debug!(gpos = gpos.len(), containers = containers.len(), "ad.gpo.loaded");

    let operation = Operation::start(ctx, Arc::clone(db), config, "gpo")?;
    for gpo in gpos {
        operation.submit_reader(move |_, tx, outbox| post_gpo_applies_to(tx, outbox, gpo));
    }
    for container in containers {
        operation.submit_reader(move |_, tx, outbox| post_can_apply_gpo(tx, outbox, container));
    }
    operation.done()
}
