//! ESC13: issuance policies linked to a group.

use super::{emit_to, is_eligible_template, EscContext};
use crate::ad::schema::{node, rel};
use crate::analysis::Outbox;
use crate::graph::ops::fetch_outbound;
use crate::types::Result;

/// Emits ADCSESC13 from every principal able to enroll in an eligible template
/// to the groups its issuance policies are linked to.
pub fn post_adcs_esc13(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    for template in esc.templates_where("esc13", is_eligible_template) {
        let policies = fetch_outbound(esc.tx, template.id, &[rel::EXTENDED_BY_POLICY])?;
        let mut groups = Vec::new();
        for policy in policies.iter().filter(|policy| policy.has_kind(&node::ISSUANCE_POLICY)) {
            groups.extend(
                fetch_outbound(esc.tx, policy.id, &[rel::OID_GROUP_LINK])?
                    .into_iter()
                    .filter(|group| group.has_kind(&node::GROUP)),
            );
        }
        if groups.is_empty() {
            continue;
        }
        let principals = esc.template_cross_product(template);
        let targets: Vec<_> = groups.iter().collect();
        emit_to(outbox, &principals, &targets, &rel::ADCS_ESC13);
    }
    Ok(())
}
