#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use common::{add_node, init_tracing, link, named, pki_lab, Esc1Lab, DOMAIN_SID};
use penumbra::ad::schema::{node, oid, prop, rel};
use penumbra::ad::{edge_composition, relay_targets};
use penumbra::graph::{GraphStoreExt, MemoryGraph, Properties, Relationship, WriteTransaction};
use penumbra::traversal::PathSet;
use penumbra::types::{Kind, NodeId, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

fn set(tx: &mut dyn WriteTransaction, id: NodeId, name: &str, value: impl Into<Value>) -> Result<()> {
    let mut found = tx.node(id)?;
    found.properties.set(name, value);
    tx.update_node(&found)
}

fn controller(tx: &mut dyn WriteTransaction, domain: NodeId, name: &'static str, value: i64) -> Result<NodeId> {
    let dc = add_node(
        tx,
        node::COMPUTER,
        named("DC01.CORP.LOCAL", "S-1-5-21-100-1000")
            .with(prop::DOMAIN_SID, DOMAIN_SID)
            .with(name, value),
    )?;
    link(tx, dc, domain, rel::DC_FOR)?;
    Ok(dc)
}

fn enroll(tx: &mut dyn WriteTransaction, lab: &Esc1Lab, principal: NodeId) -> Result<()> {
    link(tx, principal, lab.template, rel::ENROLL)?;
    link(tx, principal, lab.ca, rel::ENROLL)
}

/// Composes a `kind` relationship from `from` to `to` once `build` has
/// shaped the lab.
fn compose(
    build: impl FnOnce(&mut dyn WriteTransaction, &Esc1Lab) -> Result<(NodeId, NodeId)>,
    kind: Kind,
) -> Result<(Esc1Lab, PathSet)> {
    init_tracing();
    let graph = MemoryGraph::new();
    let (lab, edge) = graph.write(&CancellationToken::new(), |tx| {
        let lab = pki_lab(tx, true)?;
        let (from, to) = build(&mut *tx, &lab)?;
        let edge = tx.create_relationship_by_ids(from, to, kind, Properties::new())?;
        Ok((lab, edge))
    })?;
    let paths = edge_composition(&CancellationToken::new(), &graph, &edge)?;
    Ok((lab, paths))
}

fn through(paths: &PathSet) -> Vec<NodeId> {
    paths.all_nodes().iter().map(|n| n.id).collect()
}

fn assert_through(paths: &PathSet, ids: &[NodeId]) {
    let found = through(paths);
    for id in ids {
        assert!(found.contains(id), "{id} missing from {found:?}");
    }
}

#[test]
fn esc3_composes_agent_and_target_enrollment() -> Result<()> {
    let mut target = NodeId::default();
    let (lab, paths) = compose(
        |tx, lab| {
            set(tx, lab.template, prop::EFFECTIVE_EKUS, vec![oid::CERTIFICATE_REQUEST_AGENT])?;
            target = add_node(
                tx,
                node::CERT_TEMPLATE,
                named("USER@CORP.LOCAL", "template-2")
                    .with(prop::REQUIRES_MANAGER_APPROVAL, false)
                    .with(prop::AUTHENTICATION_ENABLED, true)
                    .with(prop::SCHEMA_VERSION, 1)
                    .with(prop::AUTHORIZED_SIGNATURES, 0),
            )?;
            link(tx, target, lab.ca, rel::PUBLISHED_TO)?;
            enroll(tx, lab, lab.user)?;
            link(tx, lab.user, target, rel::ENROLL)?;
            Ok((lab.user, lab.domain))
        },
        rel::ADCS_ESC3,
    )?;
    assert_through(&paths, &[lab.user, lab.template, target, lab.ca, lab.root_ca, lab.store, lab.domain]);
    Ok(())
}

#[test]
fn esc3_respects_agent_restrictions() -> Result<()> {
    let (_, paths) = compose(
        |tx, lab| {
            set(tx, lab.template, prop::EFFECTIVE_EKUS, vec![oid::CERTIFICATE_REQUEST_AGENT])?;
            set(tx, lab.ca, prop::HAS_ENROLLMENT_AGENT_RESTRICTIONS, true)?;
            enroll(tx, lab, lab.user)?;
            Ok((lab.user, lab.domain))
        },
        rel::ADCS_ESC3,
    )?;
    assert!(paths.is_empty());
    Ok(())
}

#[test]
fn esc4_composes_template_control() -> Result<()> {
    let (lab, paths) = compose(
        |tx, lab| {
            link(tx, lab.user, lab.template, rel::GENERIC_ALL)?;
            link(tx, lab.user, lab.ca, rel::ENROLL)?;
            Ok((lab.user, lab.domain))
        },
        rel::ADCS_ESC4,
    )?;
    assert_through(&paths, &[lab.user, lab.template, lab.ca, lab.domain]);
    Ok(())
}

#[test]
fn esc4_generic_write_needs_template_enrollment() -> Result<()> {
    let (_, paths) = compose(
        |tx, lab| {
            link(tx, lab.user, lab.template, rel::GENERIC_WRITE)?;
            link(tx, lab.user, lab.ca, rel::ENROLL)?;
            Ok((lab.user, lab.domain))
        },
        rel::ADCS_ESC4,
    )?;
    assert!(paths.is_empty());
    Ok(())
}

#[test]
fn esc6a_composes_san_ca_and_weak_binding() -> Result<()> {
    let mut dc = NodeId::default();
    let (lab, paths) = compose(
        |tx, lab| {
            set(tx, lab.ca, prop::IS_USER_SPECIFIES_SAN_ENABLED, true)?;
            set(tx, lab.template, prop::NO_SECURITY_EXTENSION, true)?;
            dc = controller(tx, lab.domain, prop::STRONG_CERTIFICATE_BINDING_ENFORCEMENT, 1)?;
            enroll(tx, lab, lab.user)?;
            Ok((lab.user, lab.domain))
        },
        rel::ADCS_ESC6A,
    )?;
    assert_through(&paths, &[lab.user, lab.template, lab.ca, dc, lab.domain]);
    Ok(())
}

#[test]
fn esc6b_composes_upn_mapping() -> Result<()> {
    let mut dc = NodeId::default();
    let (lab, paths) = compose(
        |tx, lab| {
            set(tx, lab.ca, prop::IS_USER_SPECIFIES_SAN_ENABLED, true)?;
            dc = controller(tx, lab.domain, prop::CERTIFICATE_MAPPING_METHODS, 4)?;
            enroll(tx, lab, lab.user)?;
            Ok((lab.user, lab.domain))
        },
        rel::ADCS_ESC6B,
    )?;
    assert_through(&paths, &[lab.user, lab.template, lab.ca, dc]);
    Ok(())
}

#[test]
fn esc6_without_san_flag_is_empty() -> Result<()> {
    let (_, paths) = compose(
        |tx, lab| {
            controller(tx, lab.domain, prop::CERTIFICATE_MAPPING_METHODS, 4)?;
            enroll(tx, lab, lab.user)?;
            Ok((lab.user, lab.domain))
        },
        rel::ADCS_ESC6B,
    )?;
    assert!(paths.is_empty());
    Ok(())
}

/// Attacker with GenericWrite over a victim of `victim_kind` enrolled on the
/// template; the template carries `flags`.
fn takeover_lab(
    kind: Kind,
    victim_kind: Kind,
    flags: &[&'static str],
    dc_setting: (&'static str, i64),
) -> Result<(Esc1Lab, NodeId, NodeId, PathSet)> {
    let (mut victim, mut dc) = (NodeId::default(), NodeId::default());
    let (lab, paths) = compose(
        |tx, lab| {
            for flag in flags {
                set(tx, lab.template, flag, true)?;
            }
            victim = add_node(tx, victim_kind, named("VICTIM@CORP.LOCAL", "S-1-5-21-100-1300"))?;
            enroll(tx, lab, victim)?;
            link(tx, lab.user, victim, rel::GENERIC_WRITE)?;
            dc = controller(tx, lab.domain, dc_setting.0, dc_setting.1)?;
            Ok((lab.user, lab.domain))
        },
        kind,
    )?;
    Ok((lab, victim, dc, paths))
}

#[test]
fn esc9a_composes_user_takeover() -> Result<()> {
    let (lab, victim, dc, paths) = takeover_lab(
        rel::ADCS_ESC9A,
        node::USER,
        &[prop::NO_SECURITY_EXTENSION, prop::SUBJECT_ALT_REQUIRE_UPN],
        (prop::STRONG_CERTIFICATE_BINDING_ENFORCEMENT, 1),
    )?;
    assert_through(&paths, &[lab.user, victim, lab.template, lab.ca, dc, lab.domain]);
    Ok(())
}

#[test]
fn esc9b_composes_computer_takeover() -> Result<()> {
    let (lab, victim, dc, paths) = takeover_lab(
        rel::ADCS_ESC9B,
        node::COMPUTER,
        &[prop::NO_SECURITY_EXTENSION, prop::SUBJECT_ALT_REQUIRE_DNS],
        (prop::STRONG_CERTIFICATE_BINDING_ENFORCEMENT, 0),
    )?;
    assert_through(&paths, &[lab.user, victim, lab.template, dc]);
    Ok(())
}

#[test]
fn esc9a_with_strong_binding_is_empty() -> Result<()> {
    let (_, _, _, paths) = takeover_lab(
        rel::ADCS_ESC9A,
        node::USER,
        &[prop::NO_SECURITY_EXTENSION, prop::SUBJECT_ALT_REQUIRE_UPN],
        (prop::STRONG_CERTIFICATE_BINDING_ENFORCEMENT, 2),
    )?;
    assert!(paths.is_empty());
    Ok(())
}

#[test]
fn esc10a_composes_disabled_binding() -> Result<()> {
    let (lab, victim, dc, paths) = takeover_lab(
        rel::ADCS_ESC10A,
        node::USER,
        &[prop::SUBJECT_ALT_REQUIRE_UPN],
        (prop::STRONG_CERTIFICATE_BINDING_ENFORCEMENT, 0),
    )?;
    assert_through(&paths, &[lab.user, victim, lab.template, lab.ca, dc]);
    Ok(())
}

#[test]
fn esc10b_composes_upn_mapping_for_computers() -> Result<()> {
    let (lab, victim, dc, paths) = takeover_lab(
        rel::ADCS_ESC10B,
        node::COMPUTER,
        &[prop::SUBJECT_ALT_REQUIRE_DNS],
        (prop::CERTIFICATE_MAPPING_METHODS, 4),
    )?;
    assert_through(&paths, &[lab.user, victim, lab.template, dc]);
    Ok(())
}

#[test]
fn esc13_composes_policy_group_link() -> Result<()> {
    let (mut policy, mut group) = (NodeId::default(), NodeId::default());
    let (lab, paths) = compose(
        |tx, lab| {
            policy = add_node(tx, node::ISSUANCE_POLICY, named("PKI ADMINS POLICY", "policy-1"))?;
            group = add_node(tx, node::GROUP, named("PKI ADMINS@CORP.LOCAL", "S-1-5-21-100-1400"))?;
            link(tx, lab.template, policy, rel::EXTENDED_BY_POLICY)?;
            link(tx, policy, group, rel::OID_GROUP_LINK)?;
            enroll(tx, lab, lab.user)?;
            Ok((lab.user, group))
        },
        rel::ADCS_ESC13,
    )?;
    assert_through(&paths, &[lab.user, lab.template, lab.ca, policy, group]);
    Ok(())
}

#[test]
fn template_enrollment_through_authenticated_users_is_explained() -> Result<()> {
    let mut auth_users = NodeId::default();
    let (lab, paths) = compose(
        |tx, lab| {
            auth_users = add_node(tx, node::GROUP, named("AUTHENTICATED USERS@CORP.LOCAL", "CORP.LOCAL-S-1-5-11"))?;
            set(tx, lab.ca, prop::IS_USER_SPECIFIES_SAN_ENABLED, true)?;
            controller(tx, lab.domain, prop::CERTIFICATE_MAPPING_METHODS, 4)?;
            link(tx, auth_users, lab.template, rel::ENROLL)?;
            link(tx, lab.user, lab.ca, rel::ENROLL)?;
            Ok((lab.user, lab.domain))
        },
        rel::ADCS_ESC6B,
    )?;
    assert_through(&paths, &[auth_users, lab.user, lab.template, lab.ca]);
    Ok(())
}

#[test]
fn adcs_relay_composes_vulnerable_ca() -> Result<()> {
    init_tracing();
    let graph = MemoryGraph::new();
    let (lab, victim, edge) = graph.write(&CancellationToken::new(), |tx| {
        let lab = pki_lab(tx, true)?;
        set(tx, lab.ca, prop::HAS_VULNERABLE_ENDPOINT, true)?;
        let auth_users = add_node(tx, node::GROUP, named("AUTHENTICATED USERS@CORP.LOCAL", "CORP.LOCAL-S-1-5-11"))?;
        let victim = add_node(
            tx,
            node::COMPUTER,
            named("WS01.CORP.LOCAL", "S-1-5-21-100-3001").with(prop::DOMAIN_SID, DOMAIN_SID),
        )?;
        enroll(tx, &lab, victim)?;
        let edge =
            tx.create_relationship_by_ids(auth_users, victim, rel::COERCE_AND_RELAY_NTLM_TO_ADCS, Properties::new())?;
        Ok((lab, victim, edge))
    })?;

    let ctx = CancellationToken::new();
    let paths = edge_composition(&ctx, &graph, &edge)?;
    assert_through(&paths, &[victim, lab.template, lab.ca, lab.root_ca, lab.store, lab.domain]);
    let targets: Vec<NodeId> = relay_targets(&ctx, &graph, &edge)?.iter().map(|n| n.id).collect();
    assert_eq!(targets, vec![lab.ca]);
    Ok(())
}

struct RelayLab {
    victim: NodeId,
    relay: NodeId,
    admins: NodeId,
    ldap_dc: NodeId,
    ldaps_dc: NodeId,
    source: NodeId,
}

fn relay_lab(graph: &MemoryGraph, victim_signing: bool) -> Result<RelayLab> {
    graph.write(&CancellationToken::new(), |tx| {
        let lab = pki_lab(tx, false)?;
        let source = add_node(tx, node::GROUP, named("AUTHENTICATED USERS@CORP.LOCAL", "CORP.LOCAL-S-1-5-11"))?;
        let victim = add_node(
            tx,
            node::COMPUTER,
            named("WS01.CORP.LOCAL", "S-1-5-21-100-3001")
                .with(prop::DOMAIN_SID, DOMAIN_SID)
                .with(prop::SMB_SIGNING, victim_signing),
        )?;
        let relay = add_node(
            tx,
            node::COMPUTER,
            named("WS02.CORP.LOCAL", "S-1-5-21-100-3002").with(prop::DOMAIN_SID, DOMAIN_SID),
        )?;
        let admins = add_node(tx, node::GROUP, named("WORKSTATION ADMINS@CORP.LOCAL", "S-1-5-21-100-1500"))?;
        link(tx, relay, admins, rel::MEMBER_OF)?;
        link(tx, admins, victim, rel::ADMIN_TO)?;

        let ldap_dc = add_node(
            tx,
            node::COMPUTER,
            named("DC01.CORP.LOCAL", "S-1-5-21-100-1000").with(prop::LDAP_SIGNING, false),
        )?;
        let ldaps_dc = add_node(
            tx,
            node::COMPUTER,
            named("DC02.CORP.LOCAL", "S-1-5-21-100-1001")
                .with(prop::LDAP_SIGNING, true)
                .with(prop::LDAPS_AVAILABLE, true)
                .with(prop::LDAPS_EPA, false),
        )?;
        link(tx, ldap_dc, lab.domain, rel::DC_FOR)?;
        link(tx, ldaps_dc, lab.domain, rel::DC_FOR)?;
        Ok(RelayLab {
            victim,
            relay,
            admins,
            ldap_dc,
            ldaps_dc,
            source,
        })
    })
}

fn relay_edge(graph: &MemoryGraph, relay: &RelayLab, kind: Kind) -> Result<Relationship> {
    graph.write(&CancellationToken::new(), |tx| {
        tx.create_relationship_by_ids(relay.source, relay.victim, kind, Properties::new())
    })
}

#[test]
fn smb_relay_composes_admin_paths() -> Result<()> {
    init_tracing();
    let graph = MemoryGraph::new();
    let relay = relay_lab(&graph, false)?;
    let edge = relay_edge(&graph, &relay, rel::COERCE_AND_RELAY_NTLM_TO_SMB)?;
    let ctx = CancellationToken::new();

    let paths = edge_composition(&ctx, &graph, &edge)?;
    assert_eq!(paths.len(), 1);
    let path = paths.iter().next().expect("one path");
    let ids: Vec<NodeId> = path.nodes.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![relay.relay, relay.admins, relay.victim]);

    let targets: Vec<NodeId> = relay_targets(&ctx, &graph, &edge)?.iter().map(|n| n.id).collect();
    assert_eq!(targets, vec![relay.relay]);
    Ok(())
}

#[test]
fn smb_relay_against_signing_victim_is_empty() -> Result<()> {
    let graph = MemoryGraph::new();
    let relay = relay_lab(&graph, true)?;
    let edge = relay_edge(&graph, &relay, rel::COERCE_AND_RELAY_NTLM_TO_SMB)?;
    assert!(edge_composition(&CancellationToken::new(), &graph, &edge)?.is_empty());
    Ok(())
}

#[test]
fn ldap_relay_targets_follow_controller_posture() -> Result<()> {
    let graph = MemoryGraph::new();
    let relay = relay_lab(&graph, true)?;
    let ctx = CancellationToken::new();

    let ldap = relay_edge(&graph, &relay, rel::COERCE_AND_RELAY_NTLM_TO_LDAP)?;
    let ids: Vec<NodeId> = relay_targets(&ctx, &graph, &ldap)?.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![relay.ldap_dc]);

    let ldaps = relay_edge(&graph, &relay, rel::COERCE_AND_RELAY_NTLM_TO_LDAPS)?;
    let ids: Vec<NodeId> = relay_targets(&ctx, &graph, &ldaps)?.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![relay.ldaps_dc]);

    let unrelated = relay_edge(&graph, &relay, rel::ADMIN_TO)?;
    assert!(relay_targets(&ctx, &graph, &unrelated)?.is_empty());
    Ok(())
}

struct GpoTree {
    gpo: NodeId,
    user: NodeId,
    blocked_computer: NodeId,
    admin: NodeId,
}

// domain ─ Contains ─> user
//        └ Contains ─> OU (blocks inheritance) ─> computer
fn gpo_tree(graph: &MemoryGraph, enforced: bool) -> Result<GpoTree> {
    graph.write(&CancellationToken::new(), |tx| {
        let domain = add_node(tx, node::DOMAIN, named("CORP.LOCAL", DOMAIN_SID))?;
        let gpo = add_node(tx, node::GPO, named("HARDENING@CORP.LOCAL", "gpo-1"))?;
        let user = add_node(tx, node::USER, named("ALICE@CORP.LOCAL", "S-1-5-21-100-1104"))?;
        let ou = add_node(
            tx,
            node::OU,
            named("SERVERS@CORP.LOCAL", "ou-1").with(prop::BLOCKS_INHERITANCE, true),
        )?;
        let blocked_computer = add_node(tx, node::COMPUTER, named("SRV01.CORP.LOCAL", "S-1-5-21-100-3003"))?;
        let admin = add_node(tx, node::USER, named("OPS@CORP.LOCAL", "S-1-5-21-100-1106"))?;
        tx.create_relationship_by_ids(gpo, domain, rel::GP_LINK, Properties::new().with(prop::ENFORCED, enforced))?;
        link(tx, domain, user, rel::CONTAINS)?;
        link(tx, domain, ou, rel::CONTAINS)?;
        link(tx, ou, blocked_computer, rel::CONTAINS)?;
        link(tx, admin, ou, rel::WRITE_GP_LINK)?;
        Ok(GpoTree {
            gpo,
            user,
            blocked_computer,
            admin,
        })
    })
}

fn compose_between(graph: &MemoryGraph, from: NodeId, to: NodeId, kind: Kind) -> Result<PathSet> {
    let edge = graph.write(&CancellationToken::new(), |tx| {
        tx.create_relationship_by_ids(from, to, kind, Properties::new())
    })?;
    edge_composition(&CancellationToken::new(), graph, &edge)
}

#[test]
fn gpo_applies_to_stops_at_blocked_inheritance() -> Result<()> {
    let graph = MemoryGraph::new();
    let tree = gpo_tree(&graph, false)?;
    let open = compose_between(&graph, tree.gpo, tree.user, rel::GPO_APPLIES_TO)?;
    assert_eq!(open.len(), 1);
    assert_through(&open, &[tree.gpo, tree.user]);

    let blocked = compose_between(&graph, tree.gpo, tree.blocked_computer, rel::GPO_APPLIES_TO)?;
    assert!(blocked.is_empty());
    Ok(())
}

#[test]
fn enforced_gpo_link_composes_through_blocked_ou() -> Result<()> {
    let graph = MemoryGraph::new();
    let tree = gpo_tree(&graph, true)?;
    let paths = compose_between(&graph, tree.gpo, tree.blocked_computer, rel::GPO_APPLIES_TO)?;
    assert_eq!(paths.len(), 1);
    assert_eq!(paths.iter().next().map(|path| path.nodes.len()), Some(4));
    Ok(())
}

#[test]
fn can_apply_gpo_composes_link_control() -> Result<()> {
    let graph = MemoryGraph::new();
    let tree = gpo_tree(&graph, false)?;
    let paths = compose_between(&graph, tree.admin, tree.blocked_computer, rel::CAN_APPLY_GPO)?;
    assert_eq!(paths.len(), 1);
    let ids: Vec<NodeId> = paths.all_nodes().iter().map(|n| n.id).collect();
    assert!(ids.contains(&tree.admin) && ids.contains(&tree.blocked_computer));

    assert!(compose_between(&graph, tree.admin, tree.user, rel::CAN_APPLY_GPO)?.is_empty());
    Ok(())
}

#[test]
fn primitive_kinds_have_no_composition() -> Result<()> {
    let graph = MemoryGraph::new();
    let tree = gpo_tree(&graph, false)?;
    assert!(compose_between(&graph, tree.admin, tree.user, rel::DC_SYNC)?.is_empty());
    Ok(())
}
