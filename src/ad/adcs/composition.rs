//! Paths explaining derived certificate relationships.
//!
//! Each composition re-checks the conditions its deriver used against the same
//! [`AdcsCache`] topology and returns the hydrated paths that satisfied them.
//! Rights paths start at the relationship's principal, optionally through
//! nested groups, or at the Authenticated Users and Everyone groups, whose
//! rights every principal inherits.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cache::{chain_to_domain, nt_auth_to_domain};
use super::esc10::esc10_template;
use super::esc3::is_esc3_target_template;
use super::esc4::FULL_CONTROL;
use super::esc6::{san_enabled, without_security_extension};
use super::esc9::{esc9_template, NameTakeover, DNS, UPN};
use super::infra::paths_to;
use super::{
    has_upn_certificate_mapping, has_weak_binding_enforcement, is_eligible_template, is_enrollment_agent_template,
    AdcsCache,
};
use crate::ad::cross_product::fetch_auth_users_and_everyone_groups;
use crate::ad::schema::{node, prop, rel};
use crate::graph::query::{self, Criteria, Target};
use crate::graph::{Node, Relationship, Transaction, TransactionExt};
use crate::traversal::{Path, PathSet, Pattern};
use crate::types::{Kind, NodeId, Result};

type TemplateCheck<'f> = &'f dyn Fn(&Node) -> Result<bool>;

fn membership() -> Criteria {
    query::and([
        query::kind(Target::Relationship, rel::MEMBER_OF),
        query::kind(Target::End, node::GROUP),
    ])
}

/// Optional group nesting followed by one `step`.
fn through_groups(step: Criteria) -> Pattern {
    Pattern::new().outbound_with_depth(0, 0, membership()).outbound(step)
}

/// Certificate topology and sentinel groups read inside one transaction.
pub struct Explainer<'a> {
    ctx: &'a CancellationToken,
    tx: &'a dyn Transaction,
    cache: AdcsCache,
    sentinels: Vec<Node>,
}

impl<'a> Explainer<'a> {
    /// Snapshots the topology visible to `tx`.
    pub fn new(ctx: &'a CancellationToken, tx: &'a dyn Transaction) -> Result<Self> {
        Ok(Self {
            ctx,
            tx,
            cache: AdcsCache::build_in(ctx, tx)?,
            sentinels: fetch_auth_users_and_everyone_groups(tx)?,
        })
    }

    /// Paths behind `edge`, or `None` for kinds without a certificate composition.
    pub fn compose(&self, edge: &Relationship) -> Result<Option<PathSet>> {
        let kind = &edge.kind;
        let paths = if *kind == rel::ADCS_ESC3 {
            self.esc3(edge)?
        } else if *kind == rel::ADCS_ESC4 {
            self.esc4(edge)?
        } else if *kind == rel::ADCS_ESC6A {
            self.esc6(edge, &without_security_extension, |dcs| has_weak_binding_enforcement(dcs, &[0, 1]))?
        } else if *kind == rel::ADCS_ESC6B {
            self.esc6(edge, &is_eligible_template, has_upn_certificate_mapping)?
        } else if *kind == rel::ADCS_ESC9A {
            self.takeover(edge, &UPN, esc9_template, |dcs| has_weak_binding_enforcement(dcs, &[0, 1]))?
        } else if *kind == rel::ADCS_ESC9B {
            self.takeover(edge, &DNS, esc9_template, |dcs| has_weak_binding_enforcement(dcs, &[0, 1]))?
        } else if *kind == rel::ADCS_ESC10A {
            self.takeover(edge, &UPN, esc10_template, |dcs| has_weak_binding_enforcement(dcs, &[0]))?
        } else if *kind == rel::ADCS_ESC10B {
            self.takeover(edge, &DNS, esc10_template, has_upn_certificate_mapping)?
        } else if *kind == rel::ADCS_ESC13 {
            self.esc13(edge)?
        } else if *kind == rel::COERCE_AND_RELAY_NTLM_TO_ADCS {
            let victim = self.tx.node(edge.end)?;
            let mut paths = PathSet::new();
            for (_, explained) in self.relay_cas(&victim)? {
                paths.add_all(explained);
            }
            paths
        } else {
            return Ok(None);
        };
        debug!(edge = edge.id.get(), kind = kind.as_str(), paths = paths.len(), "ad.adcs.composition");
        Ok(Some(paths))
    }

    fn roots(&self, principal: &Node) -> Vec<Node> {
        let mut roots = self.sentinels.clone();
        if !roots.iter().any(|root| root.id == principal.id) {
            roots.push(principal.clone());
        }
        roots
    }

    fn collect(&self, pattern: &Pattern, roots: &[Node]) -> Result<Vec<Path>> {
        let mut paths = Vec::new();
        for root in roots {
            pattern.run_in(self.ctx, self.tx, root, |terminal| {
                paths.push(Path::from(terminal));
                Ok(())
            })?;
        }
        Ok(paths)
    }

    fn rights_on(&self, roots: &[Node], kinds: &[Kind], target: NodeId) -> Result<Vec<Path>> {
        let pattern = through_groups(query::and([
            query::kind_in(Target::Relationship, kinds),
            query::id_equals(Target::End, target),
        ]));
        self.collect(&pattern, roots)
    }

    fn publication(&self, template: &Node, ca: NodeId) -> Result<Vec<Path>> {
        let pattern = Pattern::new().outbound(query::and([
            query::kind(Target::Relationship, rel::PUBLISHED_TO),
            query::id_equals(Target::End, ca),
        ]));
        self.collect(&pattern, std::slice::from_ref(template))
    }

    /// Chain and NTAuth paths from `ca` to `domain`; empty unless both exist.
    fn ca_for_domain(&self, ca: &Node, domain: NodeId) -> Result<PathSet> {
        let mut paths = paths_to(self.ctx, self.tx, &chain_to_domain(), ca, domain)?;
        if paths.is_empty() {
            return Ok(paths);
        }
        let trust = paths_to(self.ctx, self.tx, &nt_auth_to_domain(), ca, domain)?;
        if trust.is_empty() {
            return Ok(trust);
        }
        paths.add_all(trust);
        Ok(paths)
    }

    /// DCFor relationships of the controllers of `domain` passing `accept`.
    fn controllers(&self, domain: NodeId, accept: impl Fn(&[Node]) -> bool) -> Result<Vec<Path>> {
        let target = self.tx.node(domain)?;
        let mut paths = Vec::new();
        for dc_for in self
            .tx
            .relationships()
            .filter(query::and([
                query::kind(Target::Relationship, rel::DC_FOR),
                query::kind(Target::Start, node::COMPUTER),
                query::id_equals(Target::End, domain),
            ]))
            .fetch()?
        {
            let controller = self.tx.node(dc_for.start)?;
            if accept(std::slice::from_ref(&controller)) {
                paths.push(Path {
                    nodes: vec![controller, target.clone()],
                    edges: vec![dc_for],
                });
            }
        }
        Ok(paths)
    }

    fn cas_for(&self, domain: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.cache
            .enterprise_cas()
            .iter()
            .filter(move |ca| self.cache.target_domains(ca.id).iter().any(|target| target.id == domain))
    }

    /// Enrollment of `roots` on a template of `ca` passing `check` together
    /// with enrollment on `ca` itself. Empty unless both exist.
    fn enrollment_on(&self, roots: &[Node], ca: &Node, check: TemplateCheck<'_>) -> Result<PathSet> {
        let mut paths = PathSet::new();
        let ca_paths = self.rights_on(roots, &[rel::ENROLL], ca.id)?;
        if ca_paths.is_empty() {
            return Ok(paths);
        }
        for template in self.cache.published_templates(ca.id) {
            if !check(template).unwrap_or(false) {
                continue;
            }
            let enrolled = self.rights_on(roots, &rel::TEMPLATE_ENROLLMENT, template.id)?;
            if enrolled.is_empty() {
                continue;
            }
            paths.extend(enrolled);
            paths.extend(self.publication(template, ca.id)?);
        }
        if !paths.is_empty() {
            paths.extend(ca_paths);
        }
        Ok(paths)
    }

    fn esc3(&self, edge: &Relationship) -> Result<PathSet> {
        let roots = self.roots(&self.tx.node(edge.start)?);
        let mut composition = PathSet::new();
        for ca in self.cas_for(edge.end) {
            if ca.bool_or(prop::HAS_ENROLLMENT_AGENT_RESTRICTIONS, false) {
                continue;
            }
            let agents = self.enrollment_on(&roots, ca, &is_enrollment_agent_template)?;
            if agents.is_empty() {
                continue;
            }
            let targets = self.enrollment_on(&roots, ca, &is_esc3_target_template)?;
            if targets.is_empty() {
                continue;
            }
            composition.add_all(agents);
            composition.add_all(targets);
            composition.add_all(self.ca_for_domain(ca, edge.end)?);
        }
        Ok(composition)
    }

    fn esc4(&self, edge: &Relationship) -> Result<PathSet> {
        let roots = self.roots(&self.tx.node(edge.start)?);
        let mut composition = PathSet::new();
        for ca in self.cas_for(edge.end) {
            let ca_paths = self.rights_on(&roots, &[rel::ENROLL], ca.id)?;
            if ca_paths.is_empty() {
                continue;
            }
            let mut found = PathSet::new();
            for template in self.cache.published_templates(ca.id) {
                let mut control = self.rights_on(&roots, &FULL_CONTROL, template.id)?;
                if control.is_empty() {
                    // GenericWrite alone also needs enrollment on the template.
                    let writers = self.rights_on(&roots, &[rel::GENERIC_WRITE], template.id)?;
                    let enrolled = self.rights_on(&roots, &rel::TEMPLATE_ENROLLMENT, template.id)?;
                    if writers.is_empty() || enrolled.is_empty() {
                        continue;
                    }
                    control = writers.into_iter().chain(enrolled).collect();
                }
                found.extend(control);
                found.extend(self.publication(template, ca.id)?);
            }
            if found.is_empty() {
                continue;
            }
            composition.add_all(found);
            composition.extend(ca_paths);
            composition.add_all(self.ca_for_domain(ca, edge.end)?);
        }
        Ok(composition)
    }

    fn esc6(&self, edge: &Relationship, check: TemplateCheck<'_>, dc: fn(&[Node]) -> bool) -> Result<PathSet> {
        let mut composition = PathSet::new();
        let controllers = self.controllers(edge.end, dc)?;
        if controllers.is_empty() {
            return Ok(composition);
        }
        let roots = self.roots(&self.tx.node(edge.start)?);
        for ca in self.cas_for(edge.end).filter(|ca| san_enabled(ca)) {
            let enrolled = self.enrollment_on(&roots, ca, check)?;
            if enrolled.is_empty() {
                continue;
            }
            composition.add_all(enrolled);
            composition.add_all(self.ca_for_domain(ca, edge.end)?);
        }
        if !composition.is_empty() {
            composition.extend(controllers);
        }
        Ok(composition)
    }

    /// ESC9 and ESC10: the principal controls a victim that can enroll.
    fn takeover(
        &self,
        edge: &Relationship,
        takeover: &NameTakeover,
        template: fn(&Node, &NameTakeover) -> Result<bool>,
        dc: fn(&[Node]) -> bool,
    ) -> Result<PathSet> {
        let mut composition = PathSet::new();
        let controllers = self.controllers(edge.end, dc)?;
        if controllers.is_empty() {
            return Ok(composition);
        }
        let attacker = self.tx.node(edge.start)?;
        let control = Pattern::new().outbound(query::and([
            query::kind_in(Target::Relationship, &rel::OBJECT_CONTROL),
            query::kind(Target::End, takeover.victim.clone()),
        ]));
        let check = |candidate: &Node| template(candidate, takeover);

        for path in self.collect(&control, std::slice::from_ref(&attacker))? {
            let Some(victim) = path.terminal() else {
                continue;
            };
            let roots = self.roots(victim);
            let mut enrolled = PathSet::new();
            for ca in self.cas_for(edge.end) {
                let paths = self.enrollment_on(&roots, ca, &check)?;
                if !paths.is_empty() {
                    enrolled.add_all(paths);
                    enrolled.add_all(self.ca_for_domain(ca, edge.end)?);
                }
            }
            if !enrolled.is_empty() {
                composition.add(path);
                composition.add_all(enrolled);
            }
        }
        if !composition.is_empty() {
            composition.extend(controllers);
        }
        Ok(composition)
    }

    fn esc13(&self, edge: &Relationship) -> Result<PathSet> {
        let roots = self.roots(&self.tx.node(edge.start)?);
        let policy = Pattern::new()
            .outbound(query::and([
                query::kind(Target::Relationship, rel::EXTENDED_BY_POLICY),
                query::kind(Target::End, node::ISSUANCE_POLICY),
            ]))
            .outbound(query::and([
                query::kind(Target::Relationship, rel::OID_GROUP_LINK),
                query::id_equals(Target::End, edge.end),
            ]));

        let mut composition = PathSet::new();
        for ca in self.cache.enterprise_cas() {
            if self.cache.target_domains(ca.id).is_empty() {
                continue;
            }
            let ca_paths = self.rights_on(&roots, &[rel::ENROLL], ca.id)?;
            if ca_paths.is_empty() {
                continue;
            }
            let mut found = PathSet::new();
            for template in self.cache.published_templates(ca.id) {
                if !is_eligible_template(template).unwrap_or(false) {
                    continue;
                }
                let links = self.collect(&policy, std::slice::from_ref(template))?;
                if links.is_empty() {
                    continue;
                }
                let enrolled = self.rights_on(&roots, &rel::TEMPLATE_ENROLLMENT, template.id)?;
                if enrolled.is_empty() {
                    continue;
                }
                found.extend(enrolled);
                found.extend(self.publication(template, ca.id)?);
                found.extend(links);
            }
            if !found.is_empty() {
                composition.add_all(found);
                composition.extend(ca_paths);
            }
        }
        Ok(composition)
    }

    /// Enterprise CAs with a vulnerable web enrollment endpoint that `victim`
    /// can enroll through for its own domain, each with the paths showing it.
    pub fn relay_cas(&self, victim: &Node) -> Result<Vec<(Node, PathSet)>> {
        let mut found = Vec::new();
        let Ok(sid) = victim.str_prop(prop::DOMAIN_SID) else {
            return Ok(found);
        };
        let roots = self.roots(victim);
        for ca in self.cache.enterprise_cas() {
            if !ca.bool_or(prop::HAS_VULNERABLE_ENDPOINT, false) {
                continue;
            }
            let domains: Vec<&Node> = self
                .cache
                .target_domains(ca.id)
                .iter()
                .filter(|domain| domain.str_prop(prop::DOMAIN_SID).is_ok_and(|domain_sid| domain_sid == sid))
                .collect();
            if domains.is_empty() {
                continue;
            }
            let mut paths = self.enrollment_on(&roots, ca, &is_eligible_template)?;
            if paths.is_empty() {
                continue;
            }
            for domain in domains {
                paths.add_all(self.ca_for_domain(ca, domain.id)?);
            }
            found.push((ca.clone(), paths));
        }
        Ok(found)
    }
}
