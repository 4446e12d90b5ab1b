//! NTLM coercion and relay derivers.
//!
//! Every relationship starts at the victim domain's Authenticated Users group:
//! any authenticated principal can coerce the victim computer into
//! authenticating, and the relay target decides which kind is emitted.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};

use super::adcs::composition::Explainer;
use super::adcs::{is_eligible_template, AdcsCache};
use super::cross_product::calculate_cross_product_node_sets;
use super::schema::{node, prop, rel};
use super::wellknown;
use crate::analysis::{measure, AnalysisConfig, Operation, OperationReport, Outbox, PathAggregator};
use crate::graph::ops::fetch_first_degree;
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, GraphStoreExt, Node, Relationship, Transaction, TransactionExt};
use crate::primitives::bitmap::ReachabilitySet;
use crate::traversal::{Path, PathSet, Pattern};
use crate::types::{NodeId, PenumbraError, Result};

/// Per-domain facts, keyed by domain SID.
#[derive(Debug, Default)]
pub struct RelayDomains {
    auth_users: FxHashMap<String, NodeId>,
    ldap: FxHashSet<String>,
    ldaps: FxHashSet<String>,
}

impl RelayDomains {
    /// Collects Authenticated Users groups and domain controller LDAP posture.
    pub fn load(tx: &dyn Transaction) -> Result<Self> {
        let mut domains = RelayDomains::default();

        for domain in tx.nodes().filter(query::kind(Target::Node, node::DOMAIN)).fetch()? {
            let (Ok(sid), Ok(name)) = (domain.str_prop(prop::DOMAIN_SID), domain.str_prop(prop::NAME)) else {
                debug!(domain = domain.id.get(), "ad.ntlm.domain_skipped");
                continue;
            };
            let object_id = wellknown::define_sid(name, wellknown::AUTHENTICATED_USERS_SUFFIX);
            match tx
                .nodes()
                .filter(query::and([
                    query::kind(Target::Node, node::GROUP),
                    query::equals(Target::Node, prop::OBJECT_ID, object_id.as_str()),
                ]))
                .first()
            {
                Ok(group) => {
                    domains.auth_users.insert(sid.to_owned(), group.id);
                }
                Err(err) if err.is_not_found() => debug!(domain = domain.id.get(), "ad.ntlm.no_authenticated_users"),
                Err(err) => return Err(err),
            }
        }

        for dc_for in tx.relationships().filter(query::kind(Target::Relationship, rel::DC_FOR)).fetch()? {
            let (controller, domain) = (tx.node(dc_for.start)?, tx.node(dc_for.end)?);
            let Ok(sid) = domain.str_prop(prop::DOMAIN_SID) else {
                continue;
            };
            if !controller.bool_or(prop::LDAP_SIGNING, true) {
                domains.ldap.insert(sid.to_owned());
            }
            if controller.bool_or(prop::LDAPS_AVAILABLE, false) && !controller.bool_or(prop::LDAPS_EPA, true) {
                domains.ldaps.insert(sid.to_owned());
            }
        }
        Ok(domains)
    }

    /// Authenticated Users group of the domain with `sid`.
    pub fn source(&self, sid: &str) -> Option<NodeId> {
        self.auth_users.get(sid).copied()
    }
}

fn restricts_outbound_ntlm(computer: &Node) -> bool {
    computer.bool_or(prop::RESTRICT_OUTBOUND_NTLM, false)
}

fn unrestricted_computers(criteria: query::Criteria) -> query::Criteria {
    query::and([
        criteria,
        query::kind(Target::Node, node::COMPUTER),
        query::not(query::equals(Target::Node, prop::RESTRICT_OUTBOUND_NTLM, true)),
    ])
}

/// Another computer able to authenticate to `victim` as a local administrator,
/// directly or through a group.
pub fn has_relaying_admin(tx: &dyn Transaction, expansions: &dyn PathAggregator, victim: NodeId) -> Result<bool> {
    let mut admins = ReachabilitySet::new();
    for holder in fetch_first_degree(tx, victim, &[rel::ADMIN_TO])? {
        admins.add(holder.id.get());
        if holder.kinds.contains_one_of(&[node::GROUP, node::LOCAL_GROUP]) {
            admins.or(&expansions.cardinality(holder.id.get()));
        }
    }
    admins.remove(victim.get());
    if admins.is_empty() {
        return Ok(false);
    }
    let found = tx
        .nodes()
        .filter(unrestricted_computers(query::id_in(Target::Node, admins.iter())))
        .limit(1)
        .count()?;
    Ok(found > 0)
}

/// SMB, LDAP and LDAPS relay relationships onto `victim`.
pub fn post_relay_to_computer(
    tx: &dyn Transaction,
    outbox: &Outbox<'_>,
    domains: &RelayDomains,
    expansions: &dyn PathAggregator,
    victim: NodeId,
) -> Result<()> {
    let computer = tx.node(victim)?;
    let Ok(sid) = computer.str_prop(prop::DOMAIN_SID) else {
        return Ok(());
    };
    let Some(source) = domains.source(sid) else {
        return Ok(());
    };

    if !computer.bool_or(prop::SMB_SIGNING, true)
        && has_relaying_admin(tx, expansions, victim)?
        && !outbox.emit(source, victim, rel::COERCE_AND_RELAY_NTLM_TO_SMB)
    {
        return Ok(());
    }

    if restricts_outbound_ntlm(&computer) || !computer.bool_or(prop::WEB_CLIENT_RUNNING, false) {
        return Ok(());
    }
    if domains.ldap.contains(sid) && !outbox.emit(source, victim, rel::COERCE_AND_RELAY_NTLM_TO_LDAP) {
        return Ok(());
    }
    if domains.ldaps.contains(sid) {
        outbox.emit(source, victim, rel::COERCE_AND_RELAY_NTLM_TO_LDAPS);
    }
    Ok(())
}

/// Computers of each target domain of `ca` that can enroll in one of its
/// authentication templates, relayed to the CA's web enrollment endpoint.
pub fn post_relay_to_adcs(
    tx: &dyn Transaction,
    outbox: &Outbox<'_>,
    domains: &RelayDomains,
    expansions: &dyn PathAggregator,
    cache: &AdcsCache,
    ca: &Node,
) -> Result<()> {
    let ca_enrollers = cache.enterprise_ca_enrollers(ca.id);
    let mut enrollers = ReachabilitySet::new();
    for template in cache.published_templates(ca.id) {
        match is_eligible_template(template) {
            Ok(true) => enrollers.or(&calculate_cross_product_node_sets(
                tx,
                expansions,
                &[cache.template_enrollers(template.id), ca_enrollers],
            )),
            Ok(false) => {}
            Err(err) => warn!(template = template.id.get(), error = %err, "ad.ntlm.template_skipped"),
        }
    }
    if enrollers.is_empty() {
        return Ok(());
    }

    let mut principals = enrollers.clone();
    enrollers.each(|id| {
        principals.or(&expansions.cardinality(id));
        true
    });

    for domain in cache.target_domains(ca.id) {
        let Ok(sid) = domain.str_prop(prop::DOMAIN_SID) else {
            continue;
        };
        let Some(source) = domains.source(sid) else {
            continue;
        };
        let victims = tx
            .nodes()
            .filter(unrestricted_computers(query::and([
                query::id_in(Target::Node, principals.iter()),
                query::equals(Target::Node, prop::DOMAIN_SID, sid),
            ])))
            .fetch_ids()?;
        for victim in victims {
            if !outbox.emit(source, victim, rel::COERCE_AND_RELAY_NTLM_TO_ADCS) {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Paths from each computer able to relay authentication to `victim` over
/// SMB: the computer holds AdminTo on the victim, directly or through groups.
pub fn smb_relay_paths(ctx: &CancellationToken, tx: &dyn Transaction, victim: &Node) -> Result<PathSet> {
    let admins = Pattern::new()
        .inbound(query::kind(Target::Relationship, rel::ADMIN_TO))
        .inbound_with_depth(0, 0, query::kind_in(Target::Relationship, &rel::MEMBERSHIP));
    let mut paths = PathSet::new();
    admins.run_in(ctx, tx, victim, |terminal| {
        let computer = terminal.node();
        if computer.id != victim.id && computer.has_kind(&node::COMPUTER) && !restricts_outbound_ntlm(&computer) {
            paths.add(Path::from(terminal).reversed());
        }
        Ok(())
    })?;
    Ok(paths)
}

/// Paths behind a CoerceAndRelayNTLMToSMB relationship. Empty when the victim
/// requires SMB signing.
pub fn smb_relay_composition(ctx: &CancellationToken, tx: &dyn Transaction, edge: &Relationship) -> Result<PathSet> {
    let victim = tx.node(edge.end)?;
    if victim.bool_or(prop::SMB_SIGNING, true) {
        return Ok(PathSet::new());
    }
    smb_relay_paths(ctx, tx, &victim)
}

/// Domain controllers of the victim's domain accepting relayed LDAP
/// (`ldaps == false`) or LDAPS (`ldaps == true`) authentication.
pub fn vulnerable_domain_controllers(tx: &dyn Transaction, victim: &Node, ldaps: bool) -> Result<Vec<Node>> {
    let Ok(sid) = victim.str_prop(prop::DOMAIN_SID) else {
        return Ok(Vec::new());
    };
    let mut controllers = Vec::new();
    for dc_for in tx
        .relationships()
        .filter(query::and([
            query::kind(Target::Relationship, rel::DC_FOR),
            query::kind(Target::Start, node::COMPUTER),
            query::kind(Target::End, node::DOMAIN),
            query::equals(Target::End, prop::DOMAIN_SID, sid),
        ]))
        .fetch()?
    {
        let controller = tx.node(dc_for.start)?;
        let vulnerable = if ldaps {
            controller.bool_or(prop::LDAPS_AVAILABLE, false) && !controller.bool_or(prop::LDAPS_EPA, true)
        } else {
            !controller.bool_or(prop::LDAP_SIGNING, true)
        };
        if vulnerable && !controllers.iter().any(|known: &Node| known.id == controller.id) {
            controllers.push(controller);
        }
    }
    Ok(controllers)
}

/// Nodes authentication is relayed to for a CoerceAndRelayNTLM relationship:
/// vulnerable domain controllers for LDAP and LDAPS, vulnerable enterprise
/// CAs for AD CS, and the computers relaying to the victim for SMB. Other
/// kinds have none.
pub fn relay_targets(ctx: &CancellationToken, tx: &dyn Transaction, edge: &Relationship) -> Result<Vec<Node>> {
    let victim = tx.node(edge.end)?;
    let targets = if edge.kind == rel::COERCE_AND_RELAY_NTLM_TO_LDAP {
        vulnerable_domain_controllers(tx, &victim, false)?
    } else if edge.kind == rel::COERCE_AND_RELAY_NTLM_TO_LDAPS {
        vulnerable_domain_controllers(tx, &victim, true)?
    } else if edge.kind == rel::COERCE_AND_RELAY_NTLM_TO_ADCS {
        Explainer::new(ctx, tx)?
            .relay_cas(&victim)?
            .into_iter()
            .map(|(ca, _)| ca)
            .collect()
    } else if edge.kind == rel::COERCE_AND_RELAY_NTLM_TO_SMB {
        smb_relay_paths(ctx, tx, &victim)?
            .iter()
            .filter_map(|path| path.root().cloned())
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };
    debug!(edge = edge.id.get(), kind = edge.kind.as_str(), targets = targets.len(), "ad.ntlm.relay_targets");
    Ok(targets)
}

/// Derives the four CoerceAndRelayNTLM kinds.
///
/// Run after the local group pass: SMB relay needs AdminTo, and ADCS relay
/// needs the certificate infrastructure relationships.
pub fn post_coerce_and_relay_ntlm(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
    expansions: &Arc<dyn PathAggregator>,
) -> Result<OperationReport> {
    let _measure = measure(Level::INFO, "post_coerce_and_relay_ntlm");
    let (domains, computers) = db.read(ctx, |tx| {
        let domains = RelayDomains::load(tx)?;
        let computers = tx.nodes().filter(query::kind(Target::Node, node::COMPUTER)).fetch_ids()?;
        Ok((Arc::new(domains), computers))
    })?;
    let cache = Arc::new(AdcsCache::build(ctx, db.as_ref())?);
    let operation = Operation::start(ctx, Arc::clone(db), config, "coerce_and_relay_ntlm")?;

    for &victim in &computers {
        let (domains, expansions) = (Arc::clone(&domains), Arc::clone(expansions));
        let accepted = operation.submit_reader(move |_, tx, outbox| {
            post_relay_to_computer(tx, outbox, &domains, expansions.as_ref(), victim)
        });
        if !accepted {
            return operation.done().and(Err(PenumbraError::Cancelled));
        }
    }

    let vulnerable: Vec<NodeId> = cache
        .enterprise_cas()
        .iter()
        .filter(|ca| ca.bool_or(prop::HAS_VULNERABLE_ENDPOINT, false) && !cache.target_domains(ca.id).is_empty())
        .map(|ca| ca.id)
        .collect();
    for &ca_id in &vulnerable {
        let (domains, expansions, cache) = (Arc::clone(&domains), Arc::clone(expansions), Arc::clone(&cache));
        operation.submit_reader(move |_, tx, outbox| {
            let Some(ca) = cache.enterprise_cas().iter().find(|ca| ca.id == ca_id) else {
                return Err(PenumbraError::Invariant("enterprise CA missing from cache"));
            };
            post_relay_to_adcs(tx, outbox, &domains, expansions.as_ref(), &cache, ca)
        });
    }

    info!(
        computers = computers.len(),
        vulnerable_cas = vulnerable.len(),
        "ad.ntlm.submitted"
    );
    operation.done()
}
