//! Computer-local rights derived from local group membership: AdminTo,
//! CanPSRemote, ExecuteDCOM and CanRDP.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use super::schema::{node, prop, rel};
use super::wellknown;
use crate::analysis::{measure, AnalysisConfig, Operation, OperationReport, PathAggregator};
use crate::graph::ops::fetch_start_nodes;
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, GraphStoreExt, Node, Transaction, TransactionExt};
use crate::primitives::bitmap::ReachabilitySet;
use crate::types::{Kind, NodeId, PenumbraError, Result};

/// Local group rights granted by first-degree membership.
const FIRST_DEGREE_RIGHTS: [(&str, Kind); 3] = [
    (wellknown::DISTRIBUTED_COM_USERS_SUFFIX, rel::EXECUTE_DCOM),
    (wellknown::REMOTE_MANAGEMENT_USERS_SUFFIX, rel::CAN_PS_REMOTE),
    (wellknown::ADMINISTRATORS_SUFFIX, rel::ADMIN_TO),
];

const PRINCIPALS: [Kind; 3] = [node::USER, node::GROUP, node::COMPUTER];

fn local_group_by(tx: &dyn Transaction, computer: NodeId, start: query::Criteria) -> Result<Node> {
    let link = tx
        .relationships()
        .filter(query::and([
            start,
            query::kind(Target::Relationship, rel::LOCAL_TO_COMPUTER),
            query::id_equals(Target::End, computer),
        ]))
        .first()?;
    tx.node(link.start)
}

/// Local group of `computer` whose SID ends with `suffix`.
pub fn fetch_computer_local_group_by_sid_suffix(tx: &dyn Transaction, computer: NodeId, suffix: &str) -> Result<Node> {
    local_group_by(tx, computer, query::ends_with(Target::Start, prop::OBJECT_ID, suffix))
}

/// Local group of `computer` whose name starts with `name`, ignoring case.
pub fn fetch_computer_local_group_by_name(tx: &dyn Transaction, computer: NodeId, name: &str) -> Result<Node> {
    local_group_by(
        tx,
        computer,
        query::and([
            query::kind(Target::Start, node::LOCAL_GROUP),
            query::case_insensitive_starts_with(Target::Start, prop::NAME, name),
        ]),
    )
}

fn first_degree_members(tx: &dyn Transaction, group: NodeId) -> Result<ReachabilitySet> {
    let mut members = ReachabilitySet::new();
    tx.relationships()
        .filter(query::and([
            query::kind_in(Target::Start, &PRINCIPALS),
            query::kind(Target::Relationship, rel::MEMBER_OF_LOCAL_GROUP),
            query::id_equals(Target::End, group),
        ]))
        .each(|membership| {
            members.add(membership.start.get());
            Ok(true)
        })?;
    Ok(members)
}

/// First-degree user, group and computer members of the local group with
/// `suffix` on `computer`. A missing group yields an empty set.
pub fn fetch_local_group_bitmap_for_computer(
    tx: &dyn Transaction,
    computer: NodeId,
    suffix: &str,
) -> Result<ReachabilitySet> {
    match fetch_computer_local_group_by_sid_suffix(tx, computer, suffix) {
        Ok(group) => first_degree_members(tx, group.id),
        Err(err) if err.is_not_found() => Ok(ReachabilitySet::new()),
        Err(err) => Err(err),
    }
}

fn has_remote_interactive_logon_right(tx: &dyn Transaction, principal: NodeId, computer: NodeId) -> Result<bool> {
    let count = tx
        .relationships()
        .filter(query::and([
            query::id_equals(Target::Start, principal),
            query::id_equals(Target::End, computer),
            query::kind(Target::Relationship, rel::REMOTE_INTERACTIVE_LOGON_RIGHT),
        ]))
        .limit(1)
        .count()?;
    Ok(count > 0)
}

fn computer_has_ura_collection(tx: &dyn Transaction, computer: NodeId) -> bool {
    tx.node(computer)
        .map(|node| node.bool_or(prop::HAS_URA, false))
        .unwrap_or(false)
}

/// Remote Desktop Users members that also hold the Remote Interactive Logon
/// right on `computer`, directly or through a group.
pub fn process_rdp_with_ura(
    tx: &dyn Transaction,
    rdp_group: &Node,
    computer: NodeId,
    expansions: &dyn PathAggregator,
) -> Result<ReachabilitySet> {
    // The whole group holds the right, so every first-degree member does too.
    if has_remote_interactive_logon_right(tx, rdp_group.id, computer)? {
        return first_degree_members(tx, rdp_group.id);
    }

    let rdp_members = expansions.cardinality(rdp_group.id.get());
    let holders = fetch_start_nodes(
        tx,
        query::and([
            query::kind(Target::Relationship, rel::REMOTE_INTERACTIVE_LOGON_RIGHT),
            query::id_equals(Target::End, computer),
        ]),
    )?;

    let mut entities = ReachabilitySet::new();
    let mut secondary = ReachabilitySet::new();
    for holder in &holders {
        let id = holder.id.get();
        if rdp_members.contains(id) {
            entities.add(id);
        } else if holder.kinds.contains_one_of(&[node::GROUP, node::LOCAL_GROUP]) {
            secondary.or(&expansions.cardinality(id));
        }
    }
    secondary.and(&rdp_members);
    entities.or(&secondary);
    Ok(entities)
}

/// Principals with remote desktop access to `computer` through Remote
/// Desktop Users.
pub fn fetch_remote_desktop_users_bitmap_for_computer(
    tx: &dyn Transaction,
    computer: NodeId,
    expansions: &dyn PathAggregator,
    enforce_ura: bool,
) -> Result<ReachabilitySet> {
    let rdp_group =
        match fetch_computer_local_group_by_sid_suffix(tx, computer, wellknown::REMOTE_DESKTOP_USERS_SUFFIX) {
            Ok(group) => group,
            Err(err) if err.is_not_found() => return Ok(ReachabilitySet::new()),
            Err(err) => return Err(err),
        };
    if enforce_ura || computer_has_ura_collection(tx, computer) {
        process_rdp_with_ura(tx, &rdp_group, computer, expansions)
    } else {
        first_degree_members(tx, rdp_group.id)
    }
}

/// CanRDP holders of `computer`.
///
/// With `citrix_enabled`, a present "Direct Access Users" group narrows the
/// result to its expanded members.
pub fn fetch_can_rdp_entity_bitmap_for_computer(
    tx: &dyn Transaction,
    computer: NodeId,
    expansions: &dyn PathAggregator,
    enforce_ura: bool,
    citrix_enabled: bool,
) -> Result<ReachabilitySet> {
    let remote_desktop_users = fetch_remote_desktop_users_bitmap_for_computer(tx, computer, expansions, enforce_ura)?;
    if remote_desktop_users.is_empty() || !citrix_enabled {
        return Ok(remote_desktop_users);
    }
    match fetch_computer_local_group_by_name(tx, computer, wellknown::DIRECT_ACCESS_USERS_NAME) {
        Ok(direct_access) => {
            let mut members = expansions.cardinality(direct_access.id.get());
            members.and(&remote_desktop_users);
            Ok(members)
        }
        // No Citrix on this computer.
        Err(err) if err.is_not_found() => Ok(remote_desktop_users),
        Err(err) => Err(err),
    }
}

fn emit_all(outbox: &crate::analysis::Outbox<'_>, principals: &ReachabilitySet, computer: NodeId, kind: &Kind) {
    principals.each(|principal| outbox.emit(NodeId(principal), computer, kind.clone()));
}

/// Submits four readers per computer: one per local right.
///
/// `rdp_expansions` should come from the membership variant that skips the
/// Administrators group.
pub fn post_local_groups(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
    rdp_expansions: &Arc<dyn PathAggregator>,
) -> Result<OperationReport> {
    let _measure = measure(Level::INFO, "post_local_groups");
    let computers = db.read(ctx, |tx| {
        tx.nodes().filter(query::kind(Target::Node, node::COMPUTER)).fetch_ids()
    })?;
    let operation = Operation::start(ctx, Arc::clone(db), config, "local_groups")?;
    let (enforce_ura, citrix_enabled) = (config.enforce_ura, config.citrix_enabled);

    for (index, computer) in computers.iter().copied().enumerate() {
        if index > 0 && index % 10_000 == 0 {
            info!(computers = index, "ad.local_groups.progress");
        }
        for (suffix, kind) in FIRST_DEGREE_RIGHTS {
            let accepted = operation.submit_reader(move |_, tx, outbox| {
                let members = fetch_local_group_bitmap_for_computer(tx, computer, suffix)?;
                emit_all(outbox, &members, computer, &kind);
                Ok(())
            });
            if !accepted {
                return operation.done().and(Err(PenumbraError::Cancelled));
            }
        }

        let expansions = Arc::clone(rdp_expansions);
        operation.submit_reader(move |_, tx, outbox| {
            let members = fetch_can_rdp_entity_bitmap_for_computer(
                tx,
                computer,
                expansions.as_ref(),
                enforce_ura,
                citrix_enabled,
            )?;
            emit_all(outbox, &members, computer, &rel::CAN_RDP);
            Ok(())
        });
    }

    info!(computers = computers.len(), "ad.local_groups.submitted");
    operation.done()
}
