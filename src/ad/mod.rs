//! Active Directory attack path derivers.
//!
//! The passes here read primitive AD data (principals, ACL relationships,
//! certificate services objects, local group memberships) and derive the
//! relationships that make attack paths traversable. [`crate::catalog`] runs them
//! in dependency order.

pub mod adcs;
pub mod bootstrap;
pub mod composition;
pub mod cross_product;
pub mod gpo;
pub mod local_groups;
pub mod membership;
pub mod ntlm;
pub mod post;
pub mod schema;
pub mod wellknown;

pub use adcs::{post_adcs, post_adcs_infrastructure, AdcsCache, EscDeriver};
pub use bootstrap::{fix_well_known_node_types, link_well_known_groups, run_domain_associations};
pub use composition::{edge_composition, relay_targets};
pub use cross_product::calculate_cross_product_node_sets;
pub use gpo::post_gpos;
pub use local_groups::post_local_groups;
pub use membership::{expand_all_rdp_local_groups, resolve_all_group_memberships};
pub use ntlm::post_coerce_and_relay_ntlm;
pub use post::{post_dcsync, post_has_trust_keys, post_sync_laps_password};
