//! ESC3: enrollment agent certificates used to enroll on behalf of others.

use super::{is_enroll_on_behalf_of_target, is_enrollment_agent_template, EscContext};
use crate::ad::schema::{prop, rel};
use crate::analysis::Outbox;
use crate::graph::Node;
use crate::types::Result;

/// Target template an enrollment agent can turn into a logon certificate.
pub fn is_esc3_target_template(template: &Node) -> Result<bool> {
    Ok(is_enroll_on_behalf_of_target(template)?
        && template.bool_prop(prop::AUTHENTICATION_ENABLED)?
        && !template.bool_prop(prop::REQUIRES_MANAGER_APPROVAL)?)
}

/// Emits ADCSESC3 from principals able to obtain an enrollment agent
/// certificate and to enroll in a target template on the same CA.
///
/// CAs enforcing enrollment agent restrictions are skipped.
pub fn post_adcs_esc3(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    if esc
        .enterprise_ca
        .bool_or(prop::HAS_ENROLLMENT_AGENT_RESTRICTIONS, false)
    {
        return Ok(());
    }

    let agents = esc.templates_where("esc3", is_enrollment_agent_template);
    if agents.is_empty() {
        return Ok(());
    }
    let targets = esc.templates_where("esc3", is_esc3_target_template);
    if targets.is_empty() {
        return Ok(());
    }

    let mut principals = esc.enrollers_of(&agents);
    principals.and(&esc.enrollers_of(&targets));
    esc.emit_to_domains(outbox, &principals, &rel::ADCS_ESC3);
    Ok(())
}
