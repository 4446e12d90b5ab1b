//! Relationships between certificate authorities, NTAuth stores and templates.

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::cache::{chain_to_domain, nt_auth_to_domain};
use super::{is_enroll_on_behalf_of_target, is_enrollment_agent_template, AdcsCache};
use crate::ad::schema::{node, prop, rel};
use crate::analysis::Outbox;
use crate::graph::ops::{fetch_relationship_nodes, fetch_start_nodes};
use crate::graph::query::{self, Target};
use crate::graph::{Node, Relationship, Transaction, TransactionExt};
use crate::traversal::{Path, PathSet, Pattern};
use crate::types::{Kind, NodeId, Result};

const CA_LIKE: [Kind; 3] = [node::ENTERPRISE_CA, node::AIA_CA, node::ROOT_CA];

/// EnterpriseCA → NTAuthStore whose `certthumbprints` hold the CA thumbprint.
pub fn post_trusted_for_nt_auth(tx: &dyn Transaction, outbox: &Outbox<'_>) -> Result<()> {
    let stores = tx.nodes().filter(query::kind(Target::Node, node::NT_AUTH_STORE)).fetch()?;
    if stores.is_empty() {
        return Ok(());
    }
    let cas = tx.nodes().filter(query::kind(Target::Node, node::ENTERPRISE_CA)).fetch()?;

    for store in &stores {
        let thumbprints = match store.string_list(prop::CERT_THUMBPRINTS) {
            Ok(thumbprints) => thumbprints,
            Err(err) => {
                debug!(store = store.id.get(), error = %err, "ad.adcs.nt_auth_store_skipped");
                continue;
            }
        };
        for ca in &cas {
            let Ok(thumbprint) = ca.str_prop(prop::CERT_THUMBPRINT) else {
                continue;
            };
            if thumbprints.iter().any(|trusted| trusted == thumbprint)
                && !outbox.emit(ca.id, store.id, rel::TRUSTED_FOR_NT_AUTH)
            {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn by_thumbprint(nodes: &[Node]) -> FxHashMap<&str, Vec<NodeId>> {
    let mut index: FxHashMap<&str, Vec<NodeId>> = FxHashMap::default();
    for candidate in nodes {
        if let Ok(thumbprint) = candidate.str_prop(prop::CERT_THUMBPRINT) {
            index.entry(thumbprint).or_default().push(candidate.id);
        }
    }
    index
}

/// CA-like node → the CA-like node holding the next certificate of its chain.
///
/// The issuer is `certchain[1]`; single-element chains are self-signed and
/// emit nothing.
pub fn post_issued_signed_by(tx: &dyn Transaction, outbox: &Outbox<'_>) -> Result<()> {
    let cas = tx.nodes().filter(query::kind_in(Target::Node, &CA_LIKE)).fetch()?;
    let index = by_thumbprint(&cas);

    for ca in &cas {
        let chain = match ca.string_list(prop::CERT_CHAIN) {
            Ok(chain) => chain,
            Err(err) => {
                debug!(ca = ca.id.get(), error = %err, "ad.adcs.cert_chain_missing");
                continue;
            }
        };
        let Some(issuer) = chain.get(1) else {
            continue;
        };
        if ca.str_prop(prop::CERT_THUMBPRINT).is_ok_and(|own| own == issuer) {
            continue;
        }
        for &signer in index.get(issuer.as_str()).map(Vec::as_slice).unwrap_or_default() {
            if signer != ca.id && !outbox.emit(ca.id, signer, rel::ISSUED_SIGNED_BY) {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// EnterpriseCA → RootCA or AIACA carrying the same certificate.
pub fn post_enterprise_ca_for(tx: &dyn Transaction, outbox: &Outbox<'_>) -> Result<()> {
    let published = tx
        .nodes()
        .filter(query::kind_in(Target::Node, &[node::ROOT_CA, node::AIA_CA]))
        .fetch()?;
    let index = by_thumbprint(&published);
    if index.is_empty() {
        return Ok(());
    }

    tx.nodes().filter(query::kind(Target::Node, node::ENTERPRISE_CA)).each(|ca| {
        let Ok(thumbprint) = ca.str_prop(prop::CERT_THUMBPRINT) else {
            return Ok(true);
        };
        for &copy in index.get(thumbprint).map(Vec::as_slice).unwrap_or_default() {
            if !outbox.emit(ca.id, copy, rel::ENTERPRISE_CA_FOR) {
                return Ok(false);
            }
        }
        Ok(true)
    })
}

/// Enrollment agent template → template it can request on behalf of others,
/// for every pair published to a common enterprise CA.
pub fn post_enroll_on_behalf_of(tx: &dyn Transaction, outbox: &Outbox<'_>) -> Result<()> {
    for ca in tx.nodes().filter(query::kind(Target::Node, node::ENTERPRISE_CA)).fetch()? {
        let templates = fetch_start_nodes(
            tx,
            query::and([
                query::kind(Target::Start, node::CERT_TEMPLATE),
                query::kind(Target::Relationship, rel::PUBLISHED_TO),
                query::id_equals(Target::End, ca.id),
            ]),
        )?;

        let classify = |predicate: fn(&Node) -> Result<bool>| -> Vec<NodeId> {
            templates
                .iter()
                .filter(|template| {
                    predicate(template).unwrap_or_else(|err| {
                        warn!(template = template.id.get(), error = %err, "ad.adcs.template_skipped");
                        false
                    })
                })
                .map(|template| template.id)
                .collect()
        };
        let agents = classify(is_enrollment_agent_template);
        if agents.is_empty() {
            continue;
        }
        let targets = classify(is_enroll_on_behalf_of_target);

        for &agent in &agents {
            for &target in &targets {
                if agent != target && !outbox.emit(agent, target, rel::ENROLL_ON_BEHALF_OF) {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// Computer hosting an enterprise CA → every domain the CA can authenticate to.
pub fn post_golden_cert(tx: &dyn Transaction, outbox: &Outbox<'_>, cache: &AdcsCache) -> Result<()> {
    for ca in cache.enterprise_cas() {
        let domains = cache.target_domains(ca.id);
        if domains.is_empty() {
            continue;
        }
        let hosts = fetch_start_nodes(
            tx,
            query::and([
                query::kind(Target::Start, node::COMPUTER),
                query::kind(Target::Relationship, rel::HOSTS_CA_SERVICE),
                query::id_equals(Target::End, ca.id),
            ]),
        )?;
        for host in &hosts {
            for domain in domains {
                if !outbox.emit(host.id, domain.id, rel::GOLDEN_CERT) {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

pub(super) fn paths_to(
    ctx: &CancellationToken,
    tx: &dyn Transaction,
    pattern: &Pattern,
    root: &Node,
    goal: NodeId,
) -> Result<PathSet> {
    let mut paths = PathSet::new();
    pattern.run_in(ctx, tx, root, |terminal| {
        if terminal.node().id == goal {
            paths.add(Path::from(terminal));
        }
        Ok(())
    })?;
    Ok(paths)
}

/// Paths behind a GoldenCert relationship: the hosting relationship, the CA
/// chain to the domain's root CA, and the NTAuth trust of the domain.
pub fn golden_cert_edge_composition(
    ctx: &CancellationToken,
    tx: &dyn Transaction,
    edge: &Relationship,
) -> Result<PathSet> {
    let (host, domain) = fetch_relationship_nodes(tx, edge)?;
    let mut composition = PathSet::new();

    let hosted = tx
        .relationships()
        .filter(query::and([
            query::id_equals(Target::Start, host.id),
            query::kind(Target::Relationship, rel::HOSTS_CA_SERVICE),
            query::kind(Target::End, node::ENTERPRISE_CA),
        ]))
        .fetch()?;

    let (chain, nt_auth) = (chain_to_domain(), nt_auth_to_domain());
    for hosting in hosted {
        let ca = match tx.node(hosting.end) {
            Ok(ca) => ca,
            Err(err) => {
                error!(ca = hosting.end.get(), error = %err, "ad.adcs.golden_cert_ca_missing");
                continue;
            }
        };
        let chain_paths = paths_to(ctx, tx, &chain, &ca, domain.id)?;
        if chain_paths.is_empty() {
            continue;
        }
        let trust_paths = paths_to(ctx, tx, &nt_auth, &ca, domain.id)?;
        if trust_paths.is_empty() {
            continue;
        }
        composition.add(Path {
            nodes: vec![host.clone(), ca],
            edges: vec![hosting],
        });
        composition.add_all(chain_paths);
        composition.add_all(trust_paths);
    }
    Ok(composition)
}
