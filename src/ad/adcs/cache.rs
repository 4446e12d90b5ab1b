//! Per-run snapshot of the certificate services topology.

use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, Level};

use crate::ad::schema::{node, rel};
use crate::analysis::measure;
use crate::graph::ops::{fetch_first_degree, fetch_start_nodes};
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, GraphStoreExt, Node, Transaction, TransactionExt};
use crate::traversal::Pattern;
use crate::types::{NodeId, Result};

/// Certificate services facts every ESC deriver consults.
///
/// Built once per run inside a single read transaction, then shared read-only
/// between readers.
#[derive(Debug, Default)]
pub struct AdcsCache {
    enterprise_cas: Vec<Node>,
    published_templates: FxHashMap<NodeId, Vec<Node>>,
    template_enrollers: FxHashMap<NodeId, Vec<Node>>,
    ca_enrollers: FxHashMap<NodeId, Vec<Node>>,
    target_domains: FxHashMap<NodeId, Vec<Node>>,
    domain_controllers: FxHashMap<NodeId, Vec<Node>>,
}

/// Enterprise CA up its chain to a root CA trusted by a domain.
pub(crate) fn chain_to_domain() -> Pattern {
    Pattern::new()
        .outbound_with_depth(
            0,
            0,
            query::and([
                query::kind_in(Target::Relationship, &rel::CERT_CHAIN),
                query::kind_in(Target::End, &[node::ENTERPRISE_CA, node::AIA_CA]),
            ]),
        )
        .outbound(query::and([
            query::kind_in(Target::Relationship, &rel::CERT_CHAIN),
            query::kind(Target::End, node::ROOT_CA),
        ]))
        .outbound(query::and([
            query::kind(Target::Relationship, rel::ROOT_CA_FOR),
            query::kind(Target::End, node::DOMAIN),
        ]))
}

/// Enterprise CA through an NTAuth store to the domain it serves.
pub(crate) fn nt_auth_to_domain() -> Pattern {
    Pattern::new()
        .outbound(query::and([
            query::kind(Target::Relationship, rel::TRUSTED_FOR_NT_AUTH),
            query::kind(Target::End, node::NT_AUTH_STORE),
        ]))
        .outbound(query::and([
            query::kind(Target::Relationship, rel::NT_AUTH_STORE_FOR),
            query::kind(Target::End, node::DOMAIN),
        ]))
}

fn terminal_domains(ctx: &CancellationToken, tx: &dyn Transaction, pattern: &Pattern, ca: &Node) -> Result<Vec<Node>> {
    let mut seen = FxHashSet::default();
    let mut domains = Vec::new();
    pattern.run_in(ctx, tx, ca, |terminal| {
        let domain = terminal.node();
        if seen.insert(domain.id) {
            domains.push(domain);
        }
        Ok(())
    })?;
    Ok(domains)
}

impl AdcsCache {
    /// Builds the cache in its own read transaction.
    pub fn build(ctx: &CancellationToken, db: &dyn GraphStore) -> Result<Self> {
        let _measure = measure(Level::INFO, "adcs_cache_build");
        db.read(ctx, |tx| Self::build_in(ctx, tx))
    }

    /// Builds the cache inside `tx`.
    pub fn build_in(ctx: &CancellationToken, tx: &dyn Transaction) -> Result<Self> {
        let mut cache = AdcsCache {
            enterprise_cas: tx
                .nodes()
                .filter(query::kind(Target::Node, node::ENTERPRISE_CA))
                .fetch()?,
            ..AdcsCache::default()
        };

        let (chain, nt_auth) = (chain_to_domain(), nt_auth_to_domain());
        for ca in &cache.enterprise_cas {
            let templates = fetch_start_nodes(
                tx,
                query::and([
                    query::kind(Target::Start, node::CERT_TEMPLATE),
                    query::kind(Target::Relationship, rel::PUBLISHED_TO),
                    query::id_equals(Target::End, ca.id),
                ]),
            )?;
            for template in &templates {
                if !cache.template_enrollers.contains_key(&template.id) {
                    let enrollers = fetch_first_degree(tx, template.id, &rel::TEMPLATE_ENROLLMENT)?;
                    cache.template_enrollers.insert(template.id, enrollers);
                }
            }
            cache.published_templates.insert(ca.id, templates);
            cache
                .ca_enrollers
                .insert(ca.id, fetch_first_degree(tx, ca.id, &[rel::ENROLL])?);

            let trusted: FxHashSet<NodeId> = terminal_domains(ctx, tx, &nt_auth, ca)?
                .into_iter()
                .map(|domain| domain.id)
                .collect();
            let domains: Vec<Node> = terminal_domains(ctx, tx, &chain, ca)?
                .into_iter()
                .filter(|domain| trusted.contains(&domain.id))
                .collect();
            for domain in &domains {
                if !cache.domain_controllers.contains_key(&domain.id) {
                    let controllers = fetch_start_nodes(
                        tx,
                        query::and([
                            query::kind(Target::Start, node::COMPUTER),
                            query::kind(Target::Relationship, rel::DC_FOR),
                            query::id_equals(Target::End, domain.id),
                        ]),
                    )?;
                    cache.domain_controllers.insert(domain.id, controllers);
                }
            }
            cache.target_domains.insert(ca.id, domains);
        }

        debug!(
            enterprise_cas = cache.enterprise_cas.len(),
            templates = cache.template_enrollers.len(),
            "ad.adcs.cache_built"
        );
        Ok(cache)
    }

    /// Every enterprise CA.
    pub fn enterprise_cas(&self) -> &[Node] {
        &self.enterprise_cas
    }

    /// Templates published to `ca`.
    pub fn published_templates(&self, ca: NodeId) -> &[Node] {
        self.published_templates.get(&ca).map(Vec::as_slice).unwrap_or_default()
    }

    /// First-degree enrollers of `template`.
    pub fn template_enrollers(&self, template: NodeId) -> &[Node] {
        self.template_enrollers.get(&template).map(Vec::as_slice).unwrap_or_default()
    }

    /// First-degree enrollers of `ca`.
    pub fn enterprise_ca_enrollers(&self, ca: NodeId) -> &[Node] {
        self.ca_enrollers.get(&ca).map(Vec::as_slice).unwrap_or_default()
    }

    /// Domains `ca` issues authentication certificates for: the CA chains to a
    /// root CA the domain trusts and sits in the domain's NTAuth store.
    pub fn target_domains(&self, ca: NodeId) -> &[Node] {
        self.target_domains.get(&ca).map(Vec::as_slice).unwrap_or_default()
    }

    /// Domain controllers of `domain`, known for every target domain.
    pub fn domain_controllers(&self, domain: NodeId) -> &[Node] {
        self.domain_controllers.get(&domain).map(Vec::as_slice).unwrap_or_default()
    }
}
