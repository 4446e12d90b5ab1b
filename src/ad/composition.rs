//! Explanations for derived relationships.
//!
//! [`edge_composition`] returns the hydrated paths that justify a derived
//! relationship; [`relay_targets`] returns the nodes a CoerceAndRelayNTLM
//! relationship relays authentication to. Kinds without an explanation yield
//! an empty result.

use tokio_util::sync::CancellationToken;

use super::adcs::composition::Explainer;
use super::adcs::{esc1, infra};
use super::schema::rel;
use super::{gpo, ntlm};
use crate::graph::{GraphStore, GraphStoreExt, Node, Relationship};
use crate::traversal::PathSet;
use crate::types::Result;

/// Paths explaining `edge`, read in one transaction.
pub fn edge_composition(ctx: &CancellationToken, db: &dyn GraphStore, edge: &Relationship) -> Result<PathSet> {
    if edge.kind == rel::ADCS_ESC1 {
        return esc1::esc1_edge_composition(ctx, db, edge);
    }
    db.read(ctx, |tx| {
        if edge.kind == rel::GOLDEN_CERT {
            infra::golden_cert_edge_composition(ctx, tx, edge)
        } else if edge.kind == rel::COERCE_AND_RELAY_NTLM_TO_SMB {
            ntlm::smb_relay_composition(ctx, tx, edge)
        } else if edge.kind == rel::GPO_APPLIES_TO {
            gpo::gpo_applies_to_composition(ctx, tx, edge)
        } else if edge.kind == rel::CAN_APPLY_GPO {
            gpo::can_apply_gpo_composition(ctx, tx, edge)
        } else {
            Ok(Explainer::new(ctx, tx)?.compose(edge)?.unwrap_or_default())
        }
    })
}

/// Relay targets of a CoerceAndRelayNTLM relationship, read in one transaction.
pub fn relay_targets(ctx: &CancellationToken, db: &dyn GraphStore, edge: &Relationship) -> Result<Vec<Node>> {
    db.read(ctx, |tx| ntlm::relay_targets(ctx, tx, edge))
}
