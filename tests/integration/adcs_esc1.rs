#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{add_node, collecting, esc1_lab, init_tracing, link, named, pki_lab, with_kind, Esc1Lab};
use penumbra::ad::membership::resolve_all_group_memberships;
use penumbra::ad::schema::{node, prop, rel};
use penumbra::ad::{edge_composition, post_adcs};
use penumbra::graph::{GraphStore, GraphStoreExt, MemoryGraph, Properties, Relationship};
use penumbra::types::{Kind, NodeId, Result};
use penumbra::{EdgeJob, PathAggregator};
use tokio_util::sync::CancellationToken;

fn lab(tweak: impl FnOnce(&mut Properties)) -> Result<(Arc<dyn GraphStore>, Esc1Lab)> {
    let graph = MemoryGraph::new();
    let lab = graph.write(&CancellationToken::new(), |tx| {
        let lab = esc1_lab(tx, true)?;
        let mut template = tx.node(lab.template)?;
        tweak(&mut template.properties);
        tx.update_node(&template)?;
        Ok(lab)
    })?;
    Ok((Arc::new(graph), lab))
}

fn derive(db: &Arc<dyn GraphStore>) -> Result<Vec<EdgeJob>> {
    init_tracing();
    let ctx = CancellationToken::new();
    let config = collecting();
    let expansions: Arc<dyn PathAggregator> = resolve_all_group_memberships(&ctx, db.as_ref(), &config, &[])?;
    Ok(post_adcs(&ctx, db, &config, &expansions)?.jobs)
}

fn persist(db: &Arc<dyn GraphStore>, from: NodeId, to: NodeId, kind: Kind) -> Result<Relationship> {
    db.write(&CancellationToken::new(), |tx| {
        tx.create_relationship_by_ids(from, to, kind, Properties::new())
    })
}

#[test]
fn vulnerable_template_yields_one_esc1_edge() -> Result<()> {
    let (db, lab) = lab(|_| {})?;
    let jobs = derive(&db)?;
    assert_eq!(
        with_kind(&jobs, &rel::ADCS_ESC1),
        vec![EdgeJob::new(lab.user, lab.domain, rel::ADCS_ESC1)]
    );
    assert_eq!(
        with_kind(&jobs, &rel::GOLDEN_CERT),
        vec![EdgeJob::new(lab.ca_host, lab.domain, rel::GOLDEN_CERT)]
    );
    Ok(())
}

#[test]
fn group_template_enrollment_with_direct_ca_enrollment_is_esc1() -> Result<()> {
    let graph = MemoryGraph::new();
    let (lab, group) = graph.write(&CancellationToken::new(), |tx| {
        let lab = pki_lab(tx, true)?;
        let group = add_node(tx, node::GROUP, named("CERT USERS@CORP.LOCAL", "S-1-5-21-100-1200"))?;
        link(tx, lab.user, group, rel::MEMBER_OF)?;
        link(tx, group, lab.template, rel::ENROLL)?;
        link(tx, lab.user, lab.ca, rel::ENROLL)?;
        Ok((lab, group))
    })?;
    let db: Arc<dyn GraphStore> = Arc::new(graph);

    let jobs = derive(&db)?;
    let esc1 = with_kind(&jobs, &rel::ADCS_ESC1);
    assert_eq!(esc1, vec![EdgeJob::new(lab.user, lab.domain, rel::ADCS_ESC1)]);
    assert!(esc1.iter().all(|job| job.from != group && job.from != lab.bystander));
    Ok(())
}

#[test]
fn manager_approval_blocks_esc1() -> Result<()> {
    let (db, _) = lab(|template| template.set(prop::REQUIRES_MANAGER_APPROVAL, true))?;
    assert!(with_kind(&derive(&db)?, &rel::ADCS_ESC1).is_empty());
    Ok(())
}

#[test]
fn template_missing_properties_is_skipped() -> Result<()> {
    let (db, _) = lab(|template| {
        template.remove(prop::AUTHENTICATION_ENABLED);
    })?;
    assert!(with_kind(&derive(&db)?, &rel::ADCS_ESC1).is_empty());
    Ok(())
}

#[test]
fn composition_explains_both_path_shapes() -> Result<()> {
    let (db, lab) = lab(|_| {})?;
    let edge = persist(&db, lab.user, lab.domain, rel::ADCS_ESC1)?;
    let paths = edge_composition(&CancellationToken::new(), db.as_ref(), &edge)?;

    assert_eq!(paths.len(), 2);
    for path in paths.iter() {
        assert_eq!(path.root().map(|n| n.id), Some(lab.user));
        assert_eq!(path.terminal().map(|n| n.id), Some(lab.domain));
        assert!(path.contains_node(lab.ca));
    }
    let through: Vec<NodeId> = paths.all_nodes().iter().map(|n| n.id).collect();
    let mut expected = vec![lab.domain, lab.user, lab.template, lab.ca, lab.root_ca, lab.store];
    expected.sort();
    assert_eq!(through, expected);
    Ok(())
}

#[test]
fn composition_without_enrollment_is_empty() -> Result<()> {
    let (db, lab) = lab(|_| {})?;
    let edge = persist(&db, lab.bystander, lab.domain, rel::ADCS_ESC1)?;
    let paths = edge_composition(&CancellationToken::new(), db.as_ref(), &edge)?;
    assert!(paths.is_empty());
    Ok(())
}

#[test]
fn golden_cert_composition() -> Result<()> {
    let (db, lab) = lab(|_| {})?;
    let edge = persist(&db, lab.ca_host, lab.domain, rel::GOLDEN_CERT)?;
    let paths = edge_composition(&CancellationToken::new(), db.as_ref(), &edge)?;
    assert!(!paths.is_empty());
    let through: Vec<NodeId> = paths.all_nodes().iter().map(|n| n.id).collect();
    for id in [lab.ca_host, lab.ca, lab.root_ca, lab.store, lab.domain] {
        assert!(through.contains(&id), "{id} missing from composition");
    }
    Ok(())
}
