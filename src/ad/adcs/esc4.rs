//! ESC4: control over a published template's security descriptor.

use super::EscContext;
use crate::ad::cross_product::calculate_cross_product_node_sets;
use crate::ad::schema::rel;
use crate::analysis::Outbox;
use crate::graph::ops::fetch_first_degree;
use crate::primitives::bitmap::ReachabilitySet;
use crate::types::{Kind, Result};

/// Rights that let a principal rewrite a template on its own.
pub(super) const FULL_CONTROL: [Kind; 4] = [rel::GENERIC_ALL, rel::WRITE_DACL, rel::WRITE_OWNER, rel::OWNS];

/// Emits ADCSESC4 from principals able to rewrite a template published to the
/// CA and to enroll through it.
///
/// Full control holders only need CA enrollment; GenericWrite holders must
/// also be able to enroll in the template.
pub fn post_adcs_esc4(esc: &EscContext<'_>, outbox: &Outbox<'_>) -> Result<()> {
    let ca_enrollers = esc.cache.enterprise_ca_enrollers(esc.enterprise_ca.id);
    let mut principals = ReachabilitySet::new();

    for template in esc.cache.published_templates(esc.enterprise_ca.id) {
        let controllers = fetch_first_degree(esc.tx, template.id, &FULL_CONTROL)?;
        if !controllers.is_empty() {
            principals.or(&calculate_cross_product_node_sets(
                esc.tx,
                esc.expansions,
                &[&controllers, ca_enrollers],
            ));
        }

        let writers = fetch_first_degree(esc.tx, template.id, &[rel::GENERIC_WRITE])?;
        if !writers.is_empty() {
            principals.or(&calculate_cross_product_node_sets(
                esc.tx,
                esc.expansions,
                &[&writers, esc.cache.template_enrollers(template.id), ca_enrollers],
            ));
        }
    }

    esc.emit_to_domains(outbox, &principals, &rel::ADCS_ESC4);
    Ok(())
}
