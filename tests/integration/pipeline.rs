#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{collecting, corp_lab, init_tracing, relationships_of, with_kind, CorpLab};
use penumbra::ad::schema::rel;
use penumbra::catalog::{post_processed_relationships, run_passes};
use penumbra::graph::query::{self, Target};
use penumbra::graph::{GraphStore, GraphStoreExt, MemoryGraph, TransactionExt};
use penumbra::types::{Kind, PenumbraError, Result};
use penumbra::{run_post_processing, AnalysisConfig, EdgeJob, PostProcessor};
use tokio_util::sync::CancellationToken;

const DERIVED: [Kind; 8] = [
    rel::DC_SYNC,
    rel::ADMIN_TO,
    rel::ENTERPRISE_CA_FOR,
    rel::TRUSTED_FOR_NT_AUTH,
    rel::GOLDEN_CERT,
    rel::ADCS_ESC1,
    rel::GPO_APPLIES_TO,
    rel::CAN_APPLY_GPO,
];

fn expected(lab: &CorpLab) -> BTreeSet<EdgeJob> {
    let esc1 = &lab.esc1;
    BTreeSet::from([
        EdgeJob::new(lab.replicator, esc1.domain, rel::DC_SYNC),
        EdgeJob::new(lab.helpdesk, lab.workstation, rel::ADMIN_TO),
        EdgeJob::new(esc1.ca, esc1.root_ca, rel::ENTERPRISE_CA_FOR),
        EdgeJob::new(esc1.ca, esc1.store, rel::TRUSTED_FOR_NT_AUTH),
        EdgeJob::new(esc1.ca_host, esc1.domain, rel::GOLDEN_CERT),
        EdgeJob::new(esc1.user, esc1.domain, rel::ADCS_ESC1),
        EdgeJob::new(lab.gpo, lab.workstation, rel::GPO_APPLIES_TO),
        EdgeJob::new(lab.helpdesk, lab.workstation, rel::CAN_APPLY_GPO),
    ])
}

fn derived_relationships(graph: &MemoryGraph) -> Result<BTreeSet<EdgeJob>> {
    let mut found = BTreeSet::new();
    for kind in &DERIVED {
        found.extend(relationships_of(graph, kind)?);
    }
    Ok(found)
}

#[test]
fn second_run_replaces_derived_relationships() -> Result<()> {
    init_tracing();
    let graph = Arc::new(MemoryGraph::new());
    let lab = corp_lab(&graph)?;
    let db: Arc<dyn GraphStore> = graph.clone();
    let ctx = CancellationToken::new();
    let config = AnalysisConfig::single_threaded();

    let first = run_post_processing(&ctx, &db, &config)?;
    let first_stats = first.stats();
    assert_eq!(first.relationships_deleted, 0);
    assert_eq!(first_stats.total_created(), 8);
    assert_eq!(first.passes.len(), PostProcessor::PIPELINE.len());
    let after_first = derived_relationships(&graph)?;
    assert_eq!(after_first, expected(&lab));
    let relationships = graph.stats().relationships;

    let second = run_post_processing(&ctx, &db, &config)?;
    let second_stats = second.stats();
    assert_eq!(second.relationships_deleted, first_stats.total_created());
    assert_eq!(second_stats.total_created(), first_stats.total_created());
    assert_eq!(second_stats.relationships_refreshed, first_stats.relationships_refreshed);
    assert_eq!(derived_relationships(&graph)?, after_first);
    assert_eq!(graph.stats().relationships, relationships);
    Ok(())
}

#[test]
fn revoked_right_removes_derived_relationship() -> Result<()> {
    init_tracing();
    let graph = Arc::new(MemoryGraph::new());
    let lab = corp_lab(&graph)?;
    let db: Arc<dyn GraphStore> = graph.clone();
    let ctx = CancellationToken::new();
    let config = AnalysisConfig::single_threaded();

    run_post_processing(&ctx, &db, &config)?;
    assert_eq!(relationships_of(&graph, &rel::ADCS_ESC1)?.len(), 1);

    graph.write(&ctx, |tx| {
        let enrollment = tx
            .relationships()
            .filter(query::and([
                query::id_equals(Target::Start, lab.esc1.user),
                query::id_equals(Target::End, lab.esc1.template),
                query::kind(Target::Relationship, rel::ENROLL),
            ]))
            .first()?;
        tx.delete_relationship(enrollment.id)
    })?;

    let rerun = run_post_processing(&ctx, &db, &config)?;
    assert!(relationships_of(&graph, &rel::ADCS_ESC1)?.is_empty());
    assert_eq!(rerun.stats().created(&rel::ADCS_ESC1), 0);
    let mut remaining = expected(&lab);
    remaining.remove(&EdgeJob::new(lab.esc1.user, lab.esc1.domain, rel::ADCS_ESC1));
    assert_eq!(derived_relationships(&graph)?, remaining);
    Ok(())
}

#[test]
fn partial_run_clears_only_its_own_kinds() -> Result<()> {
    let graph = Arc::new(MemoryGraph::new());
    let lab = corp_lab(&graph)?;
    let db: Arc<dyn GraphStore> = graph.clone();
    let ctx = CancellationToken::new();
    let config = AnalysisConfig::single_threaded();

    run_post_processing(&ctx, &db, &config)?;
    let rerun = run_passes(&ctx, &db, &config, &[PostProcessor::DcSync])?;
    assert_eq!(rerun.relationships_deleted, 1);
    assert_eq!(derived_relationships(&graph)?, expected(&lab));

    // Accumulator mode never touches what earlier runs wrote.
    let collected = run_passes(&ctx, &db, &collecting(), &PostProcessor::PIPELINE)?;
    assert_eq!(collected.relationships_deleted, 0);
    assert_eq!(derived_relationships(&graph)?, expected(&lab));
    Ok(())
}

#[test]
fn every_pass_kind_is_post_processed() {
    let kinds = post_processed_relationships();
    for pass in PostProcessor::PIPELINE {
        assert!(pass.kinds().iter().all(|kind| kinds.contains(kind)), "{}", pass.name());
    }
    for kind in &DERIVED {
        assert!(kinds.contains(kind), "{kind:?}");
    }
    assert!(!kinds.contains(&rel::MEMBER_OF));
    assert!(!kinds.contains(&rel::OWNS));
}

#[test]
fn bootstrap_links_universal_groups_once() -> Result<()> {
    let graph = Arc::new(MemoryGraph::new());
    corp_lab(&graph)?;
    let db: Arc<dyn GraphStore> = graph.clone();
    let ctx = CancellationToken::new();

    let first = run_passes(&ctx, &db, &collecting(), &[])?;
    // Domain Users, Domain Computers and Authenticated Users each gained a parent.
    assert_eq!(relationships_of(&graph, &rel::MEMBER_OF)?.len(), 1 + 3);
    assert!(first.groups_resolved > 0);
    let nodes = graph.stats().nodes;

    run_passes(&ctx, &db, &collecting(), &[])?;
    assert_eq!(graph.stats().nodes, nodes);
    assert_eq!(relationships_of(&graph, &rel::MEMBER_OF)?.len(), 1 + 3);
    Ok(())
}

#[test]
fn accumulator_mode_leaves_graph_untouched() -> Result<()> {
    let graph = Arc::new(MemoryGraph::new());
    let lab = corp_lab(&graph)?;
    let db: Arc<dyn GraphStore> = graph.clone();

    let report = run_passes(
        &CancellationToken::new(),
        &db,
        &collecting(),
        &[PostProcessor::DcSync, PostProcessor::LocalGroups, PostProcessor::Gpo],
    )?;
    assert_eq!(
        with_kind(&report.jobs, &rel::DC_SYNC),
        vec![EdgeJob::new(lab.replicator, lab.esc1.domain, rel::DC_SYNC)]
    );
    assert_eq!(
        with_kind(&report.jobs, &rel::ADMIN_TO),
        vec![EdgeJob::new(lab.helpdesk, lab.workstation, rel::ADMIN_TO)]
    );
    assert_eq!(with_kind(&report.jobs, &rel::GPO_APPLIES_TO).len(), 1);
    assert!(report.pass(PostProcessor::Adcs).is_none());
    assert!(derived_relationships(&graph)?.is_empty());
    Ok(())
}

#[test]
fn invalid_configuration_is_rejected_up_front() -> Result<()> {
    let graph = Arc::new(MemoryGraph::new());
    corp_lab(&graph)?;
    let db: Arc<dyn GraphStore> = graph.clone();
    let config = AnalysisConfig {
        output_buffer: 0,
        ..AnalysisConfig::default()
    };
    let err = run_post_processing(&CancellationToken::new(), &db, &config).unwrap_err();
    assert!(matches!(err, PenumbraError::InvalidArgument(_)));
    assert_eq!(graph.stats().commits, 1);
    Ok(())
}

#[test]
fn cancellation_names_the_stage() -> Result<()> {
    init_tracing();
    let graph = Arc::new(MemoryGraph::new());
    corp_lab(&graph)?;
    let db: Arc<dyn GraphStore> = graph.clone();
    let ctx = CancellationToken::new();
    ctx.cancel();
    let err = run_post_processing(&ctx, &db, &collecting()).unwrap_err();
    match err {
        PenumbraError::Pass { pass, source } => {
            assert_eq!(pass, "bootstrap");
            assert!(matches!(*source, PenumbraError::Cancelled));
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn pass_names_round_trip() {
    for pass in PostProcessor::PIPELINE {
        assert_eq!(PostProcessor::from_name(pass.name()), Some(pass));
    }
    assert_eq!(PostProcessor::from_name("esc99"), None);
}
