//! ESC1: enrollee-supplied subject on an authentication template.

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Level};

use super::{is_cert_template_valid_for_esc1, EscContext};
use crate::ad::cross_product::fetch_auth_users_and_everyone_groups;
use crate::ad::schema::{node, prop, rel};
use crate::analysis::{measure, Outbox};
use crate::graph::query::{self, Criteria, Target};
use crate::graph::{GraphStore, GraphStoreExt, Node, PathSegment, Relationship};
use crate::primitives::bitmap::ReachabilitySet;
use crate::traversal::{Path, PathSet, Pattern};
use crate::types::{NodeId, Result};

/// Emits ADCSESC1 from every principal able to enroll in a vulnerable template
/// through the CA to each of the CA's target domains.
pub fn post_adcs_esc1(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    let templates = esc.templates_where("esc1", is_cert_template_valid_for_esc1);
    let principals = esc.enrollers_of(&templates);
    esc.emit_to_domains(outbox, &principals, &rel::ADCS_ESC1);
    Ok(())
}

fn optional_group_membership() -> Criteria {
    query::and([
        query::kind(Target::Relationship, rel::MEMBER_OF),
        query::kind(Target::End, node::GROUP),
    ])
}

/// The template predicate of [`is_cert_template_valid_for_esc1`] as criteria on
/// the end node.
fn esc1_template() -> Criteria {
    let common = || {
        [
            query::equals(Target::End, prop::REQUIRES_MANAGER_APPROVAL, false),
            query::equals(Target::End, prop::AUTHENTICATION_ENABLED, true),
            query::equals(Target::End, prop::ENROLLEE_SUPPLIES_SUBJECT, true),
        ]
    };
    query::or([
        query::and(common().into_iter().chain([
            query::greater_than(Target::End, prop::SCHEMA_VERSION, 1.0),
            query::equals(Target::End, prop::AUTHORIZED_SIGNATURES, 0),
        ])),
        query::and(
            common()
                .into_iter()
                .chain([query::equals(Target::End, prop::SCHEMA_VERSION, 1)]),
        ),
    ])
}

/// Principal, optionally through groups, enrolling in a vulnerable template
/// published to a CA that chains to `domain`'s root CA.
pub fn esc1_path1_pattern(domain: NodeId) -> Pattern {
    Pattern::new()
        .outbound_with_depth(0, 0, optional_group_membership())
        .outbound(query::and([
            query::kind_in(Target::Relationship, &rel::TEMPLATE_ENROLLMENT),
            query::kind(Target::End, node::CERT_TEMPLATE),
            esc1_template(),
        ]))
        .outbound(query::and([
            query::kind(Target::Relationship, rel::PUBLISHED_TO),
            query::kind(Target::End, node::ENTERPRISE_CA),
        ]))
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
            query::id_equals(Target::End, domain),
        ]))
}

/// Principal, optionally through groups, enrolling on one of
/// `enterprise_cas` that sits in `domain`'s NTAuth store.
pub fn esc1_path2_pattern(domain: NodeId, enterprise_cas: &ReachabilitySet) -> Pattern {
    Pattern::new()
        .outbound_with_depth(0, 0, optional_group_membership())
        .outbound(query::and([
            query::kind(Target::Relationship, rel::ENROLL),
            query::id_in(Target::End, enterprise_cas.iter()),
        ]))
        .outbound(query::and([
            query::kind(Target::Relationship, rel::TRUSTED_FOR_NT_AUTH),
            query::kind(Target::End, node::NT_AUTH_STORE),
        ]))
        .outbound(query::and([
            query::kind(Target::Relationship, rel::NT_AUTH_STORE_FOR),
            query::id_equals(Target::End, domain),
        ]))
}

#[derive(Default)]
struct Candidates {
    segments: FxHashMap<NodeId, Vec<PathSegment>>,
    enterprise_cas: ReachabilitySet,
}

impl Candidates {
    fn track(&mut self, terminal: &PathSegment) {
        let Some(ca) = terminal.search(|hop| hop.has_kind(&node::ENTERPRISE_CA)) else {
            return;
        };
        let ca = ca.node().id;
        self.enterprise_cas.add(ca.get());
        self.segments.entry(ca).or_default().push(terminal.clone());
    }
}

fn collect_candidates(
    ctx: &CancellationToken,
    db: &dyn GraphStore,
    pattern: &Pattern,
    roots: &[Node],
    candidates: &mut Candidates,
) -> Result<()> {
    for root in roots {
        pattern.run(ctx, db, root, |terminal| {
            candidates.track(terminal);
            Ok(())
        })?;
    }
    Ok(())
}

/// Paths explaining an ADCSESC1 relationship.
///
/// Both path shapes are explored from the relationship's start node and from the
/// Authenticated Users and Everyone groups. Only enterprise CAs reached by both
/// shapes contribute their paths. An empty result is not an error.
pub fn esc1_edge_composition(ctx: &CancellationToken, db: &dyn GraphStore, edge: &Relationship) -> Result<PathSet> {
    let _measure = measure(Level::DEBUG, "esc1_edge_composition");
    let roots = db.read(ctx, |tx| {
        let mut roots = fetch_auth_users_and_everyone_groups(tx)?;
        roots.push(tx.node(edge.start)?);
        Ok(roots)
    })?;

    let mut first = Candidates::default();
    collect_candidates(ctx, db, &esc1_path1_pattern(edge.end), &roots, &mut first)?;
    if first.enterprise_cas.is_empty() {
        return Ok(PathSet::new());
    }

    let mut second = Candidates::default();
    collect_candidates(
        ctx,
        db,
        &esc1_path2_pattern(edge.end, &first.enterprise_cas),
        &roots,
        &mut second,
    )?;

    let mut reached = first.enterprise_cas.clone();
    reached.and(&second.enterprise_cas);
    debug!(
        edge = edge.id.get(),
        path1_cas = first.enterprise_cas.cardinality(),
        both = reached.cardinality(),
        "ad.adcs.esc1_composition"
    );

    let mut paths = PathSet::new();
    for ca in reached.iter() {
        let ca = NodeId(ca);
        for candidates in [&first, &second] {
            for segment in candidates.segments.get(&ca).into_iter().flatten() {
                paths.add(Path::from(segment));
            }
        }
    }
    Ok(paths)
}
