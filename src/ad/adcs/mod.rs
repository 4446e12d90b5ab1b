//! Active Directory Certificate Services derivers.
//!
//! [`post_adcs_infrastructure`] derives the trust relationships between CAs,
//! NTAuth stores and templates from certificate properties. [`post_adcs`] then
//! snapshots the resulting topology into an [`AdcsCache`] and fans one reader per
//! enterprise CA and ESC variant out through the scheduler.

pub mod cache;
pub mod composition;
pub mod esc1;
pub mod esc10;
pub mod esc13;
pub mod esc3;
pub mod esc4;
pub mod esc6;
pub mod esc9;
pub mod infra;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{warn, Level};

use super::schema::{oid, prop, rel};
use crate::analysis::{measure, AnalysisConfig, Operation, OperationReport, Outbox, PathAggregator};
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, Node, Transaction, TransactionExt};
use crate::primitives::bitmap::ReachabilitySet;
use crate::types::{Kind, NodeId, PenumbraError, Result};

pub use cache::AdcsCache;

/// ESC variants derived per enterprise CA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscDeriver {
    /// Enrollee-supplied subject on an authentication template.
    Esc1,
    /// Enrollment agent templates.
    Esc3,
    /// Template access control.
    Esc4,
    /// SAN flag on the CA with weak binding enforcement.
    Esc6a,
    /// SAN flag on the CA with UPN certificate mapping.
    Esc6b,
    /// No security extension, UPN victims.
    Esc9a,
    /// No security extension, DNS victims.
    Esc9b,
    /// Weak certificate mapping, UPN victims.
    Esc10a,
    /// Weak certificate mapping, DNS victims.
    Esc10b,
    /// Issuance policy linked to a group.
    Esc13,
}

impl EscDeriver {
    /// Every variant, in submission order.
    pub const ALL: [EscDeriver; 10] = [
        EscDeriver::Esc1,
        EscDeriver::Esc3,
        EscDeriver::Esc4,
        EscDeriver::Esc6a,
        EscDeriver::Esc6b,
        EscDeriver::Esc9a,
        EscDeriver::Esc9b,
        EscDeriver::Esc10a,
        EscDeriver::Esc10b,
        EscDeriver::Esc13,
    ];

    /// Relationship kind the variant emits.
    pub fn kind(self) -> Kind {
        match self {
            EscDeriver::Esc1 => rel::ADCS_ESC1,
            EscDeriver::Esc3 => rel::ADCS_ESC3,
            EscDeriver::Esc4 => rel::ADCS_ESC4,
            EscDeriver::Esc6a => rel::ADCS_ESC6A,
            EscDeriver::Esc6b => rel::ADCS_ESC6B,
            EscDeriver::Esc9a => rel::ADCS_ESC9A,
            EscDeriver::Esc9b => rel::ADCS_ESC9B,
            EscDeriver::Esc10a => rel::ADCS_ESC10A,
            EscDeriver::Esc10b => rel::ADCS_ESC10B,
            EscDeriver::Esc13 => rel::ADCS_ESC13,
        }
    }

    /// Runs the variant for `ca`.
    pub fn derive(self, ctx: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
        match self {
            EscDeriver::Esc1 => esc1::post_adcs_esc1(ctx, outbox),
            EscDeriver::Esc3 => esc3::post_adcs_esc3(ctx, outbox),
            EscDeriver::Esc4 => esc4::post_adcs_esc4(ctx, outbox),
            EscDeriver::Esc6a => esc6::post_adcs_esc6a(ctx, outbox),
            EscDeriver::Esc6b => esc6::post_adcs_esc6b(ctx, outbox),
            EscDeriver::Esc9a => esc9::post_adcs_esc9a(ctx, outbox),
            EscDeriver::Esc9b => esc9::post_adcs_esc9b(ctx, outbox),
            EscDeriver::Esc10a => esc10::post_adcs_esc10a(ctx, outbox),
            EscDeriver::Esc10b => esc10::post_adcs_esc10b(ctx, outbox),
            EscDeriver::Esc13 => esc13::post_adcs_esc13(ctx, outbox),
        }
    }
}

/// Inputs shared by the ESC derivers of one enterprise CA.
pub struct EscContext<'a> {
    /// Cancellation context of the run.
    pub ctx: &'a CancellationToken,
    /// Read transaction of the reader.
    pub tx: &'a dyn Transaction,
    /// Membership expansions.
    pub expansions: &'a dyn PathAggregator,
    /// Enterprise CA under analysis.
    pub enterprise_ca: &'a Node,
    /// Domains the CA issues authentication certificates for.
    pub target_domains: &'a [Node],
    /// Topology snapshot.
    pub cache: &'a AdcsCache,
}

impl EscContext<'_> {
    /// Cross product of `template` enrollers and enterprise CA enrollers.
    pub fn template_cross_product(&self, template: &Node) -> ReachabilitySet {
        super::cross_product::calculate_cross_product_node_sets(
            self.tx,
            self.expansions,
            &[
                self.cache.template_enrollers(template.id),
                self.cache.enterprise_ca_enrollers(self.enterprise_ca.id),
            ],
        )
    }

    /// Emits `kind` from every principal in `principals` to every target domain.
    pub fn emit_to_domains(&self, outbox: &Outbox<'_>, principals: &ReachabilitySet, kind: &Kind) {
        let domains: Vec<&Node> = self.target_domains.iter().collect();
        emit_to(outbox, principals, &domains, kind);
    }

    /// Target domains with a domain controller satisfying `predicate`.
    pub fn domains_with_controller(&self, predicate: impl Fn(&[Node]) -> bool) -> Vec<&Node> {
        self.target_domains
            .iter()
            .filter(|domain| predicate(self.cache.domain_controllers(domain.id)))
            .collect()
    }

    /// Union of the template cross products over `templates`.
    pub fn enrollers_of(&self, templates: &[&Node]) -> ReachabilitySet {
        let mut principals = ReachabilitySet::new();
        for template in templates {
            principals.or(&self.template_cross_product(template));
        }
        principals
    }

    /// Published templates passing `predicate`. Templates whose properties are
    /// missing or malformed are logged and skipped.
    pub fn templates_where(&self, variant: &'static str, predicate: impl Fn(&Node) -> Result<bool>) -> Vec<&Node> {
        self.cache
            .published_templates(self.enterprise_ca.id)
            .iter()
            .filter(|template| match predicate(*template) {
                Ok(valid) => valid,
                Err(err) => {
                    warn!(variant, template = template.id.get(), error = %err, "ad.adcs.template_skipped");
                    false
                }
            })
            .collect()
    }
}

/// Emits `kind` from every principal in `principals` to every node of `targets`.
pub fn emit_to(outbox: &Outbox<'_>, principals: &ReachabilitySet, targets: &[&Node], kind: &Kind) {
    if targets.is_empty() {
        return;
    }
    principals.each(|principal| {
        targets
            .iter()
            .all(|target| outbox.emit(NodeId(principal), target.id, kind.clone()))
    });
}

fn schema_allows_signatureless(template: &Node) -> Result<bool> {
    let schema_version = template.int_prop(prop::SCHEMA_VERSION)?;
    Ok(schema_version <= 1 || template.int_prop(prop::AUTHORIZED_SIGNATURES)? == 0)
}

/// Template usable for ESC1: no manager approval, authentication enabled,
/// enrollee-supplied subject, and no authorized signatures past schema 1.
pub fn is_cert_template_valid_for_esc1(template: &Node) -> Result<bool> {
    if template.bool_prop(prop::REQUIRES_MANAGER_APPROVAL)?
        || !template.bool_prop(prop::AUTHENTICATION_ENABLED)?
        || !template.bool_prop(prop::ENROLLEE_SUPPLIES_SUBJECT)?
    {
        return Ok(false);
    }
    schema_allows_signatureless(template)
}

/// Authentication template any enroller can obtain without approval or
/// co-signature.
pub fn is_eligible_template(template: &Node) -> Result<bool> {
    if template.bool_prop(prop::REQUIRES_MANAGER_APPROVAL)? || !template.bool_prop(prop::AUTHENTICATION_ENABLED)? {
        return Ok(false);
    }
    schema_allows_signatureless(template)
}

/// Template issuing enrollment agent certificates.
pub fn is_enrollment_agent_template(template: &Node) -> Result<bool> {
    if template.bool_prop(prop::REQUIRES_MANAGER_APPROVAL)? || !schema_allows_signatureless(template)? {
        return Ok(false);
    }
    let ekus = template.string_list_or_empty(prop::EFFECTIVE_EKUS)?;
    Ok(ekus.is_empty()
        || ekus
            .iter()
            .any(|eku| eku == oid::CERTIFICATE_REQUEST_AGENT || eku == oid::ANY_PURPOSE))
}

/// Template an enrollment agent may request on behalf of someone else.
pub fn is_enroll_on_behalf_of_target(template: &Node) -> Result<bool> {
    match template.int_prop(prop::SCHEMA_VERSION)? {
        1 => Ok(true),
        version if version > 1 => Ok(template.int_prop(prop::AUTHORIZED_SIGNATURES)? == 1
            && template
                .string_list_or_empty(prop::APPLICATION_POLICIES)?
                .iter()
                .any(|policy| policy == oid::CERTIFICATE_REQUEST_AGENT)),
        _ => Ok(false),
    }
}

/// Domain controller with `StrongCertificateBindingEnforcement` in `allowed`.
pub fn has_weak_binding_enforcement(controllers: &[Node], allowed: &[i64]) -> bool {
    controllers.iter().any(|dc| {
        dc.int_prop(prop::STRONG_CERTIFICATE_BINDING_ENFORCEMENT)
            .map(|value| allowed.contains(&value))
            .unwrap_or(false)
    })
}

/// Domain controller mapping certificates by UPN (`CertificateMappingMethods` bit 0x4).
pub fn has_upn_certificate_mapping(controllers: &[Node]) -> bool {
    controllers.iter().any(|dc| {
        dc.int_prop(prop::CERTIFICATE_MAPPING_METHODS)
            .map(|value| value & 0x4 != 0)
            .unwrap_or(false)
    })
}

/// Principals holding object control rights on any node of `victims`.
pub fn fetch_attackers(tx: &dyn Transaction, victims: &ReachabilitySet) -> Result<ReachabilitySet> {
    let mut attackers = ReachabilitySet::new();
    if victims.is_empty() {
        return Ok(attackers);
    }
    tx.relationships()
        .filter(query::and([
            query::kind_in(Target::Relationship, &rel::OBJECT_CONTROL),
            query::id_in(Target::End, victims.iter()),
        ]))
        .each(|control| {
            attackers.add(control.start.get());
            Ok(true)
        })?;
    Ok(attackers)
}

/// Members of `ids` carrying `kind`.
pub fn filter_by_kind(tx: &dyn Transaction, ids: &ReachabilitySet, kind: Kind) -> Result<ReachabilitySet> {
    if ids.is_empty() {
        return Ok(ReachabilitySet::new());
    }
    let mut out = ReachabilitySet::new();
    tx.nodes()
        .filter(query::and([query::id_in(Target::Node, ids.iter()), query::kind(Target::Node, kind)]))
        .each(|found| {
            out.add(found.id.get());
            Ok(true)
        })?;
    Ok(out)
}

/// Derives GoldenCert and every ESC variant for every enterprise CA.
///
/// Run after [`post_adcs_infrastructure`] so the CA trust relationships exist.
/// A variant missing data it needs is logged and skipped; any other failure
/// fails the pass.
pub fn post_adcs(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
    expansions: &Arc<dyn PathAggregator>,
) -> Result<OperationReport> {
    let _measure = measure(Level::INFO, "post_adcs");
    let cache = Arc::new(AdcsCache::build(ctx, db.as_ref())?);
    let operation = Operation::start(ctx, Arc::clone(db), config, "adcs")?;

    let golden = Arc::clone(&cache);
    operation.submit_reader(move |_, tx, outbox| infra::post_golden_cert(tx, outbox, &golden));

    for ca in cache.enterprise_cas() {
        if cache.target_domains(ca.id).is_empty() {
            continue;
        }
        for deriver in EscDeriver::ALL {
            let (cache, expansions, ca_id) = (Arc::clone(&cache), Arc::clone(expansions), ca.id);
            operation.submit_reader(move |ctx, tx, outbox| {
                let Some(enterprise_ca) = cache.enterprise_cas().iter().find(|ca| ca.id == ca_id) else {
                    return Err(PenumbraError::Invariant("enterprise CA missing from cache"));
                };
                let esc = EscContext {
                    ctx,
                    tx,
                    expansions: expansions.as_ref(),
                    enterprise_ca,
                    target_domains: cache.target_domains(ca_id),
                    cache: &cache,
                };
                match deriver.derive(&esc, outbox) {
                    Err(err) if err.is_not_found() => {
                        warn!(
                            variant = deriver.kind().as_str(),
                            enterprise_ca = ca_id.get(),
                            error = %err,
                            "ad.adcs.variant_skipped"
                        );
                        Ok(())
                    }
                    result => result,
                }
            });
        }
    }

    operation.done()
}

/// Derives TrustedForNTAuth, IssuedSignedBy, EnterpriseCAFor and
/// EnrollOnBehalfOf from certificate properties.
pub fn post_adcs_infrastructure(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
) -> Result<OperationReport> {
    let _measure = measure(Level::INFO, "post_adcs_infrastructure");
    let operation = Operation::start(ctx, Arc::clone(db), config, "adcs_infrastructure")?;
    operation.submit_reader(|_, tx, outbox| infra::post_trusted_for_nt_auth(tx, outbox));
    operation.submit_reader(|_, tx, outbox| infra::post_issued_signed_by(tx, outbox));
    operation.submit_reader(|_, tx, outbox| infra::post_enterprise_ca_for(tx, outbox));
    operation.submit_reader(|_, tx, outbox| infra::post_enroll_on_behalf_of(tx, outbox));
    operation.done()
}
