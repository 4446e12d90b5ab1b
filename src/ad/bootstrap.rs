//! Graph repairs that run before membership resolution.
//!
//! Collection can leave well-known groups without their group kind, objects
//! without a display name, and domains without the universal groups every
//! principal implicitly belongs to. These passes patch all three so the
//! membership resolver and the derivers see a consistent graph.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Level};

use super::schema::{node, prop, rel};
use super::wellknown;
use crate::analysis::measure;
use crate::analysis::operation::now_rfc3339;
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, GraphStoreExt, Node, Properties, Transaction, TransactionExt, WriteTransaction};
use crate::primitives::concurrency::ErrorCollector;
use crate::types::{Kinds, PenumbraError, Result};

/// Domains that were collected directly (`collected == true`).
pub fn fetch_collected_domains(ctx: &CancellationToken, db: &dyn GraphStore) -> Result<Vec<Node>> {
    db.read(ctx, |tx| collected_domains(tx))
}

/// [`fetch_collected_domains`] inside an existing transaction.
pub fn collected_domains(tx: &dyn Transaction) -> Result<Vec<Node>> {
    tx.nodes()
        .filter(query::and([
            query::kind(Target::Node, node::DOMAIN),
            query::equals(Target::Node, prop::COLLECTED, true),
        ]))
        .fetch()
}

/// Adds the group kind to well-known groups collected without it.
///
/// Returns the number of nodes updated.
pub fn fix_well_known_node_types(ctx: &CancellationToken, db: &dyn GraphStore) -> Result<u64> {
    let _measure = measure(Level::INFO, "fix_well_known_node_types");
    db.write(ctx, |tx| {
        let mut fixed = 0u64;
        for suffix in wellknown::GROUP_SUFFIXES {
            let nodes = tx
                .nodes()
                .filter(query::and([
                    query::ends_with(Target::Node, prop::OBJECT_ID, suffix),
                    query::not(query::kind_in(Target::Node, &[node::GROUP, node::LOCAL_GROUP])),
                ]))
                .fetch()?;
            for mut next in nodes {
                next.kinds.add(node::GROUP);
                tx.update_node(&next)?;
                fixed += 1;
            }
        }
        debug!(fixed, "ad.bootstrap.fixed_node_types");
        Ok(fixed)
    })
}

/// Names unnamed objects after the domain their SID belongs to.
///
/// An object whose `objectid` prefix matches a domain SID receives
/// `name = "(DOMAIN) objectid"` and `domainsid`. Returns the number of nodes
/// updated.
pub fn run_domain_associations(ctx: &CancellationToken, db: &dyn GraphStore) -> Result<u64> {
    let _measure = measure(Level::INFO, "run_domain_associations");
    db.write(ctx, |tx| {
        let mut domains = rustc_hash::FxHashMap::default();
        for domain in tx.nodes().filter(query::kind(Target::Node, node::DOMAIN)).fetch()? {
            match (domain.str_prop(prop::OBJECT_ID), domain.str_prop(prop::NAME)) {
                (Ok(sid), Ok(name)) => {
                    domains.insert(sid.to_owned(), name.to_owned());
                }
                _ => error!(domain = domain.id.get(), "ad.bootstrap.domain_without_identity"),
            }
        }

        let unnamed = tx
            .nodes()
            .filter(query::not(query::exists(Target::Node, prop::NAME)))
            .fetch()?;
        let mut associated = 0u64;
        for mut next in unnamed {
            let Ok(object_id) = next.str_prop(prop::OBJECT_ID) else {
                continue;
            };
            let object_id = object_id.to_owned();
            let Some(domain_sid) = wellknown::domain_sid_of(&object_id) else {
                continue;
            };
            let Some(domain_name) = domains.get(domain_sid) else {
                continue;
            };
            let name = format!("({domain_name}) {object_id}");
            let domain_sid = domain_sid.to_owned();
            next.properties.set(prop::NAME, name);
            next.properties.set(prop::DOMAIN_SID, domain_sid);
            tx.update_node(&next)?;
            associated += 1;
        }
        debug!(associated, "ad.bootstrap.domain_associations");
        Ok(associated)
    })
}

/// Ensures every collected domain has its universal groups and their links.
///
/// For each domain carrying `domainsid` and `name`, Domain Users,
/// Authenticated Users, Everyone and Domain Computers are fetched or created,
/// then linked DomainUsers→AuthenticatedUsers, DomainComputers→AuthenticatedUsers
/// and AuthenticatedUsers→Everyone. One domain failing does not stop the others;
/// failures are combined into the returned error.
pub fn link_well_known_groups(ctx: &CancellationToken, db: &dyn GraphStore) -> Result<()> {
    let _measure = measure(Level::INFO, "link_well_known_groups");
    let errors = ErrorCollector::new();
    let now = now_rfc3339()?;

    for domain in fetch_collected_domains(ctx, db)? {
        let (sid, name) = match (domain.str_prop(prop::DOMAIN_SID), domain.str_prop(prop::NAME)) {
            (Ok(sid), Ok(name)) => (sid.to_owned(), name.to_owned()),
            (Err(err), _) | (_, Err(err)) => {
                error!(domain = domain.id.get(), error = %err, "ad.bootstrap.domain_without_identity");
                continue;
            }
        };
        let groups = WellKnownGroups::for_domain(&sid, &name);
        let result = db.write(ctx, |tx| groups.link(tx, &sid, &name, &now));
        if let Err(err) = result {
            error!(domain = domain.id.get(), error = %err, "ad.bootstrap.link_failed");
            errors.add(err);
        }
    }

    errors.combined()
}

struct WellKnownGroup {
    object_id: String,
    name: String,
}

struct WellKnownGroups {
    domain_users: WellKnownGroup,
    authenticated_users: WellKnownGroup,
    everyone: WellKnownGroup,
    domain_computers: WellKnownGroup,
}

impl WellKnownGroups {
    fn for_domain(sid: &str, name: &str) -> Self {
        let group = |qualifier: &str, suffix: &str, prefix: &str| WellKnownGroup {
            object_id: wellknown::define_sid(qualifier, suffix),
            name: wellknown::define_node_name(prefix, name),
        };
        Self {
            domain_users: group(sid, wellknown::DOMAIN_USERS_SUFFIX, wellknown::DOMAIN_USERS_NAME_PREFIX),
            authenticated_users: group(
                name,
                wellknown::AUTHENTICATED_USERS_SUFFIX,
                wellknown::AUTHENTICATED_USERS_NAME_PREFIX,
            ),
            everyone: group(name, wellknown::EVERYONE_SUFFIX, wellknown::EVERYONE_NAME_PREFIX),
            domain_computers: group(
                sid,
                wellknown::DOMAIN_COMPUTERS_SUFFIX,
                wellknown::DOMAIN_COMPUTERS_NAME_PREFIX,
            ),
        }
    }

    fn link(&self, tx: &mut dyn WriteTransaction, sid: &str, domain: &str, now: &str) -> Result<()> {
        let domain_users = get_or_create_group(tx, &self.domain_users, sid, domain, now)?;
        let authenticated_users = get_or_create_group(tx, &self.authenticated_users, sid, domain, now)?;
        let everyone = get_or_create_group(tx, &self.everyone, sid, domain, now)?;
        let domain_computers = get_or_create_group(tx, &self.domain_computers, sid, domain, now)?;

        create_or_update_member_of(tx, &domain_users, &authenticated_users, now)?;
        create_or_update_member_of(tx, &domain_computers, &authenticated_users, now)?;
        create_or_update_member_of(tx, &authenticated_users, &everyone, now)
    }
}

/// Looks a group up by `objectid` regardless of kind, creating it when absent.
/// An existing node without the group kind gains it.
fn get_or_create_group(
    tx: &mut dyn WriteTransaction,
    group: &WellKnownGroup,
    sid: &str,
    domain: &str,
    now: &str,
) -> Result<Node> {
    let existing = tx
        .nodes()
        .filter(query::equals(Target::Node, prop::OBJECT_ID, group.object_id.as_str()))
        .first();
    match existing {
        Ok(mut found) => {
            if !found.has_kind(&node::GROUP) {
                found.kinds.add(node::GROUP);
                tx.update_node(&found)?;
            }
            Ok(found)
        }
        Err(PenumbraError::NotFound(_)) => {
            let properties = Properties::new()
                .with(prop::NAME, group.name.as_str())
                .with(prop::OBJECT_ID, group.object_id.as_str())
                .with(prop::DOMAIN_SID, sid)
                .with(prop::LAST_SEEN, now)
                .with(prop::DOMAIN_FQDN, domain);
            tx.create_node(Kinds::from([node::ENTITY, node::GROUP]), properties)
        }
        Err(err) => Err(err),
    }
}

fn create_or_update_member_of(tx: &mut dyn WriteTransaction, start: &Node, end: &Node, now: &str) -> Result<()> {
    let existing = tx
        .relationships()
        .filter(query::and([
            query::id_equals(Target::Start, start.id),
            query::id_equals(Target::End, end.id),
            query::kind(Target::Relationship, rel::MEMBER_OF),
        ]))
        .first();
    match existing {
        Ok(mut found) => {
            found.properties.set(prop::LAST_SEEN, now);
            tx.update_relationship(&found)
        }
        Err(PenumbraError::NotFound(_)) => {
            let properties = Properties::new().with(prop::LAST_SEEN, now);
            tx.create_relationship_by_ids(start.id, end.id, rel::MEMBER_OF, properties)
                .map(|_| ())
        }
        Err(err) => Err(err),
    }
}
