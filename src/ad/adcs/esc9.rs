//! ESC9: templates without the security extension, abused by rewriting a
//! victim's UPN or DNS name.

use super::{fetch_attackers, filter_by_kind, has_weak_binding_enforcement, is_eligible_template, EscContext};
use crate::ad::schema::{node, prop, rel};
use crate::analysis::Outbox;
use crate::graph::Node;
use crate::primitives::bitmap::ReachabilitySet;
use crate::types::{Kind, Result};

/// Victim variant shared by ESC9 and ESC10.
#[derive(Debug)]
pub(super) struct NameTakeover {
    pub(super) variant: &'static str,
    pub(super) subject_flag: &'static str,
    pub(super) victim: Kind,
}

pub(super) static UPN: NameTakeover = NameTakeover {
    variant: "upn",
    subject_flag: prop::SUBJECT_ALT_REQUIRE_UPN,
    victim: node::USER,
};

pub(super) static DNS: NameTakeover = NameTakeover {
    variant: "dns",
    subject_flag: prop::SUBJECT_ALT_REQUIRE_DNS,
    victim: node::COMPUTER,
};

impl NameTakeover {
    /// Principals controlling a victim that can enroll in one of `templates`.
    pub(super) fn attackers(&self, esc: &EscContext<'_>, templates: &[&Node]) -> Result<ReachabilitySet> {
        if templates.is_empty() {
            return Ok(ReachabilitySet::new());
        }
        let enrollers = esc.enrollers_of(templates);
        let victims = filter_by_kind(esc.tx, &enrollers, self.victim.clone())?;
        fetch_attackers(esc.tx, &victims)
    }
}

pub(super) fn esc9_template(template: &Node, takeover: &NameTakeover) -> Result<bool> {
    Ok(is_eligible_template(template)?
        && template.bool_or(prop::NO_SECURITY_EXTENSION, false)
        && template.bool_or(takeover.subject_flag, false))
}

fn post_esc9(esc: &EscContext<'_>, outbox: &Outbox<'_>, takeover: &NameTakeover, kind: &Kind) -> Result<()> {
    let domains = esc.domains_with_controller(|controllers| has_weak_binding_enforcement(controllers, &[0, 1]));
    if domains.is_empty() {
        return Ok(());
    }
    let templates = esc.templates_where(takeover.variant, |template| esc9_template(template, takeover));
    let attackers = takeover.attackers(esc, &templates)?;
    super::emit_to(outbox, &attackers, &domains, kind);
    Ok(())
}

/// ESC9a: user victims of UPN-subject templates.
pub fn post_adcs_esc9a(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    post_esc9(esc, outbox, &UPN, &rel::ADCS_ESC9A)
}

/// ESC9b: computer victims of DNS-subject templates.
pub fn post_adcs_esc9b(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    post_esc9(esc, outbox, &DNS, &rel::ADCS_ESC9B)
}
