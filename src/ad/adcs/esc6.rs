//! ESC6: the CA honours requester-supplied subject alternative names.

use super::{has_upn_certificate_mapping, has_weak_binding_enforcement, is_eligible_template, EscContext};
use crate::ad::schema::{prop, rel};
use crate::analysis::Outbox;
use crate::graph::Node;
use crate::types::Result;

pub(super) fn san_enabled(ca: &Node) -> bool {
    ca.bool_or(prop::IS_USER_SPECIFIES_SAN_ENABLED, false)
}

pub(super) fn without_security_extension(template: &Node) -> Result<bool> {
    Ok(is_eligible_template(template)? && template.bool_or(prop::NO_SECURITY_EXTENSION, false))
}

/// ESC6a: eligible template without the security extension, and a domain
/// controller not enforcing strong certificate binding.
pub fn post_adcs_esc6a(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    if !san_enabled(esc.enterprise_ca) {
        return Ok(());
    }
    let domains = esc.domains_with_controller(|controllers| has_weak_binding_enforcement(controllers, &[0, 1]));
    if domains.is_empty() {
        return Ok(());
    }
    let templates = esc.templates_where("esc6a", without_security_extension);
    super::emit_to(outbox, &esc.enrollers_of(&templates), &domains, &rel::ADCS_ESC6A);
    Ok(())
}

/// ESC6b: eligible template, and a domain controller mapping certificates by UPN.
pub fn post_adcs_esc6b(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    if !san_enabled(esc.enterprise_ca) {
        return Ok(());
    }
    let domains = esc.domains_with_controller(has_upn_certificate_mapping);
    if domains.is_empty() {
        return Ok(());
    }
    let templates = esc.templates_where("esc6b", is_eligible_template);
    super::emit_to(outbox, &esc.enrollers_of(&templates), &domains, &rel::ADCS_ESC6B);
    Ok(())
}
