//! Domain-level derivers: DCSync, SyncLAPSPassword and HasTrustKeys.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Level};

use super::bootstrap::fetch_collected_domains;
use super::cross_product::calculate_cross_product_node_sets;
use super::schema::{node, prop, rel};
use crate::analysis::{measure, AnalysisConfig, Operation, OperationReport, PathAggregator};
use crate::graph::ops::{fetch_end_nodes, fetch_first_degree};
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, Node, Transaction, TransactionExt};
use crate::primitives::bitmap::ReachabilitySet;
use crate::types::{Kind, NodeId, Result};

fn replication_cross_product(
    tx: &dyn Transaction,
    expansions: &dyn PathAggregator,
    domain: NodeId,
    second: Kind,
) -> Result<ReachabilitySet> {
    let get_changes = fetch_first_degree(tx, domain, &[rel::GET_CHANGES])?;
    let other = fetch_first_degree(tx, domain, &[second])?;
    Ok(calculate_cross_product_node_sets(tx, expansions, &[&get_changes, &other]))
}

/// Principals holding both GetChanges and GetChangesAll on `domain`.
pub fn dcsyncers(tx: &dyn Transaction, expansions: &dyn PathAggregator, domain: NodeId) -> Result<ReachabilitySet> {
    replication_cross_product(tx, expansions, domain, rel::GET_CHANGES_ALL)
}

/// Principals holding both GetChanges and GetChangesInFilteredSet on `domain`.
pub fn laps_syncers(tx: &dyn Transaction, expansions: &dyn PathAggregator, domain: NodeId) -> Result<ReachabilitySet> {
    replication_cross_product(tx, expansions, domain, rel::GET_CHANGES_IN_FILTERED_SET)
}

/// Emits DCSync from every replicating principal to its collected domain.
pub fn post_dcsync(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
    expansions: &Arc<dyn PathAggregator>,
) -> Result<OperationReport> {
    let _measure = measure(Level::INFO, "post_dcsync");
    let domains = fetch_collected_domains(ctx, db.as_ref())?;
    let operation = Operation::start(ctx, Arc::clone(db), config, "dcsync")?;

    for domain in domains {
        let expansions = Arc::clone(expansions);
        operation.submit_reader(move |_, tx, outbox| {
            let syncers = dcsyncers(tx, expansions.as_ref(), domain.id)?;
            syncers.each(|principal| outbox.emit(NodeId(principal), domain.id, rel::DC_SYNC));
            Ok(())
        });
    }

    operation.done()
}

/// Emits SyncLAPSPassword from every filtered-set replicator to each LAPS
/// computer of its domain. Domains without `domainsid` are skipped.
pub fn post_sync_laps_password(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
    expansions: &Arc<dyn PathAggregator>,
) -> Result<OperationReport> {
    let _measure = measure(Level::INFO, "post_sync_laps_password");
    let domains = fetch_collected_domains(ctx, db.as_ref())?;
    let operation = Operation::start(ctx, Arc::clone(db), config, "sync_laps_password")?;

    for domain in domains {
        let expansions = Arc::clone(expansions);
        operation.submit_reader(move |_, tx, outbox| {
            let syncers = laps_syncers(tx, expansions.as_ref(), domain.id)?;
            if syncers.is_empty() {
                return Ok(());
            }
            let computers = match laps_computers(tx, &domain) {
                Ok(computers) => computers,
                Err(err) if err.is_not_found() => {
                    debug!(domain = domain.id.get(), error = %err, "ad.post.laps_domain_skipped");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            for computer in computers {
                let mut open = true;
                syncers.each(|principal| {
                    open = outbox.emit(NodeId(principal), computer, rel::SYNC_LAPS_PASSWORD);
                    open
                });
                if !open {
                    break;
                }
            }
            Ok(())
        });
    }

    operation.done()
}

fn laps_computers(tx: &dyn Transaction, domain: &Node) -> Result<Vec<NodeId>> {
    let domain_sid = domain.str_prop(prop::DOMAIN_SID)?;
    tx.nodes()
        .filter(query::and([
            query::kind(Target::Node, node::COMPUTER),
            query::equals(Target::Node, prop::HAS_LAPS, true),
            query::equals(Target::Node, prop::DOMAIN_SID, domain_sid),
        ]))
        .fetch_ids()
}

/// Emits HasTrustKeys from each collected domain to the trust account that an
/// outbound-trusted domain keeps for it.
///
/// Domains without `netbios`, trusted domains without `domainsid`, and trust
/// accounts that were not collected are skipped.
pub fn post_has_trust_keys(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
) -> Result<OperationReport> {
    let _measure = measure(Level::INFO, "post_has_trust_keys");
    let domains = fetch_collected_domains(ctx, db.as_ref())?;
    let operation = Operation::start(ctx, Arc::clone(db), config, "has_trust_keys")?;

    operation.submit_reader(move |_, tx, outbox| {
        for domain in &domains {
            let Ok(netbios) = domain.str_prop(prop::NETBIOS) else {
                debug!(domain = domain.id.get(), "ad.post.trust_keys_missing_netbios");
                continue;
            };
            let trusted = match outbound_trust_domains(tx, domain.id) {
                Ok(trusted) => trusted,
                Err(err) => {
                    error!(domain = domain.id.get(), error = %err, "ad.post.trust_edges_failed");
                    continue;
                }
            };
            for trusting in trusted {
                let Ok(trusting_sid) = trusting.str_prop(prop::DOMAIN_SID) else {
                    debug!(domain = trusting.id.get(), "ad.post.trust_keys_missing_sid");
                    continue;
                };
                match trust_account(tx, trusting_sid, netbios) {
                    Ok(account) => {
                        if !outbox.emit(domain.id, account, rel::HAS_TRUST_KEYS) {
                            return Ok(());
                        }
                    }
                    Err(err) if err.is_not_found() => {
                        debug!(sid = trusting_sid, netbios, "ad.post.trust_account_not_found");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    });

    operation.done()
}

fn outbound_trust_domains(tx: &dyn Transaction, domain: NodeId) -> Result<Vec<Node>> {
    fetch_end_nodes(
        tx,
        query::and([
            query::id_equals(Target::Start, domain),
            query::kind_in(Target::Relationship, &[rel::SAME_FOREST_TRUST, rel::CROSS_FOREST_TRUST]),
            query::kind(Target::End, node::DOMAIN),
        ]),
    )
}

fn trust_account(tx: &dyn Transaction, domain_sid: &str, netbios: &str) -> Result<NodeId> {
    tx.nodes()
        .filter(query::and([
            query::kind(Target::Node, node::USER),
            query::equals(Target::Node, prop::DOMAIN_SID, domain_sid),
            query::equals(Target::Node, prop::SAM_ACCOUNT_NAME, format!("{netbios}$")),
        ]))
        .first()
        .map(|account| account.id)
}
