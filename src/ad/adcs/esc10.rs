//! ESC10: weak certificate mapping on the domain controllers.

use super::esc9::{NameTakeover, DNS, UPN};
use super::{has_upn_certificate_mapping, has_weak_binding_enforcement, is_eligible_template, EscContext};
use crate::ad::schema::rel;
use crate::analysis::Outbox;
use crate::graph::Node;
use crate::types::{Kind, Result};

pub(super) fn esc10_template(template: &Node, takeover: &NameTakeover) -> Result<bool> {
    Ok(is_eligible_template(template)? && template.bool_or(takeover.subject_flag, false))
}

fn post_esc10(
    esc: &EscContext<'_>,
    outbox: &Outbox<'_>,
    takeover: &NameTakeover,
    domains: Vec<&Node>,
    kind: &Kind,
) -> Result<()> {
    if domains.is_empty() {
        return Ok(());
    }
    let templates = esc.templates_where(takeover.variant, |template| esc10_template(template, takeover));
    let attackers = takeover.attackers(esc, &templates)?;
    super::emit_to(outbox, &attackers, &domains, kind);
    Ok(())
}

/// ESC10a: user victims where a domain controller disables strong binding.
pub fn post_adcs_esc10a(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    let domains = esc.domains_with_controller(|controllers| has_weak_binding_enforcement(controllers, &[0]));
    post_esc10(esc, outbox, &UPN, domains, &rel::ADCS_ESC10A)
}

/// ESC10b: computer victims where a domain controller maps certificates by UPN.
pub fn post_adcs_esc10b(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    let domains = esc.domains_with_controller(has_upn_certificate_mapping);
    post_esc10(esc, outbox, &DNS, domains, &rel::ADCS_ESC10B)
}
