#![allow(dead_code)]

use std::sync::Once;

use penumbra::ad::schema::{node, prop, rel};
use penumbra::graph::query::{self, Target};
use penumbra::graph::{GraphStoreExt, MemoryGraph, Properties, TransactionExt, WriteTransaction};
use penumbra::types::{Kind, Kinds, NodeId, Result};
use penumbra::{AnalysisConfig, EdgeJob};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Routes engine logs to the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("penumbra=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

pub fn add_node(tx: &mut dyn WriteTransaction, kind: Kind, properties: Properties) -> Result<NodeId> {
    tx.create_node(Kinds::from([kind]), properties).map(|created| created.id)
}

pub fn link(tx: &mut dyn WriteTransaction, from: NodeId, to: NodeId, kind: Kind) -> Result<()> {
    tx.create_relationship_by_ids(from, to, kind, Properties::new()).map(|_| ())
}

pub fn named(name: &str, object_id: &str) -> Properties {
    Properties::new().with(prop::NAME, name).with(prop::OBJECT_ID, object_id)
}

/// Accumulator mode: jobs come back in the report instead of being written.
pub fn collecting() -> AnalysisConfig {
    AnalysisConfig {
        num_writers: 0,
        ..AnalysisConfig::single_threaded()
    }
}

pub fn sorted(mut jobs: Vec<EdgeJob>) -> Vec<EdgeJob> {
    jobs.sort();
    jobs
}

pub fn with_kind(jobs: &[EdgeJob], kind: &Kind) -> Vec<EdgeJob> {
    sorted(jobs.iter().filter(|job| &job.kind == kind).cloned().collect())
}

pub const DOMAIN_SID: &str = "S-1-5-21-100";
pub const DOMAIN_NAME: &str = "CORP.LOCAL";

/// Certificate services topology where `user` can exploit ESC1 against `domain`.
pub struct Esc1Lab {
    pub domain: NodeId,
    pub user: NodeId,
    pub bystander: NodeId,
    pub template: NodeId,
    pub ca: NodeId,
    pub root_ca: NodeId,
    pub store: NodeId,
    pub ca_host: NodeId,
}

pub fn vulnerable_template() -> Properties {
    named("USERAUTH@CORP.LOCAL", "template-1")
        .with(prop::REQUIRES_MANAGER_APPROVAL, false)
        .with(prop::AUTHENTICATION_ENABLED, true)
        .with(prop::ENROLLEE_SUPPLIES_SUBJECT, true)
        .with(prop::SCHEMA_VERSION, 2)
        .with(prop::AUTHORIZED_SIGNATURES, 0)
        .with(prop::EFFECTIVE_EKUS, vec![CLIENT_AUTHENTICATION])
}

/// Client Authentication EKU.
pub const CLIENT_AUTHENTICATION: &str = "1.3.6.1.5.5.7.3.2";

/// Every relationship of `kind`, as jobs.
pub fn relationships_of(graph: &MemoryGraph, kind: &Kind) -> Result<Vec<EdgeJob>> {
    graph.read(&CancellationToken::new(), |tx| {
        let found = tx
            .relationships()
            .filter(query::kind(Target::Relationship, kind.clone()))
            .fetch()?;
        Ok(sorted(
            found
                .into_iter()
                .map(|relationship| EdgeJob::new(relationship.start, relationship.end, relationship.kind))
                .collect(),
        ))
    })
}

/// Builds the lab's domain and PKI without any enrollment rights. With
/// `derived_pki` the PKI links the infrastructure pass would add
/// (EnterpriseCAFor, TrustedForNTAuth) are written up front.
pub fn pki_lab(tx: &mut dyn WriteTransaction, derived_pki: bool) -> Result<Esc1Lab> {
    let domain = add_node(
        tx,
        node::DOMAIN,
        named(DOMAIN_NAME, DOMAIN_SID)
            .with(prop::DOMAIN_SID, DOMAIN_SID)
            .with(prop::COLLECTED, true),
    )?;
    let user = add_node(tx, node::USER, named("ALICE@CORP.LOCAL", "S-1-5-21-100-1104"))?;
    let bystander = add_node(tx, node::USER, named("BOB@CORP.LOCAL", "S-1-5-21-100-1105"))?;
    let template = add_node(tx, node::CERT_TEMPLATE, vulnerable_template())?;
    let ca = add_node(
        tx,
        node::ENTERPRISE_CA,
        named("CORP-CA@CORP.LOCAL", "ca-1")
            .with(prop::CERT_THUMBPRINT, "AA11")
            .with(prop::CERT_CHAIN, vec!["AA11"]),
    )?;
    let root_ca = add_node(
        tx,
        node::ROOT_CA,
        named("CORP-CA@CORP.LOCAL", "root-1")
            .with(prop::CERT_THUMBPRINT, "AA11")
            .with(prop::CERT_CHAIN, vec!["AA11"]),
    )?;
    let store = add_node(
        tx,
        node::NT_AUTH_STORE,
        named("NTAUTHCERTIFICATES@CORP.LOCAL", "store-1").with(prop::CERT_THUMBPRINTS, vec!["AA11"]),
    )?;
    let ca_host = add_node(tx, node::COMPUTER, named("PKI01.CORP.LOCAL", "S-1-5-21-100-2001"))?;

    link(tx, root_ca, domain, rel::ROOT_CA_FOR)?;
    link(tx, store, domain, rel::NT_AUTH_STORE_FOR)?;
    link(tx, template, ca, rel::PUBLISHED_TO)?;
    link(tx, ca_host, ca, rel::HOSTS_CA_SERVICE)?;
    if derived_pki {
        link(tx, ca, root_ca, rel::ENTERPRISE_CA_FOR)?;
        link(tx, ca, store, rel::TRUSTED_FOR_NT_AUTH)?;
    }

    Ok(Esc1Lab {
        domain,
        user,
        bystander,
        template,
        ca,
        root_ca,
        store,
        ca_host,
    })
}

/// [`pki_lab`] where the user enrolls on the template and the CA, and the
/// bystander on the CA only.
pub fn esc1_lab(tx: &mut dyn WriteTransaction, derived_pki: bool) -> Result<Esc1Lab> {
    let lab = pki_lab(tx, derived_pki)?;
    link(tx, lab.user, lab.template, rel::ENROLL)?;
    link(tx, lab.user, lab.ca, rel::ENROLL)?;
    link(tx, lab.bystander, lab.ca, rel::ENROLL)?;
    Ok(lab)
}

/// One collected domain with something for most passes to derive.
pub struct CorpLab {
    pub esc1: Esc1Lab,
    pub replicator: NodeId,
    pub helpdesk: NodeId,
    pub tech: NodeId,
    pub workstation: NodeId,
    pub gpo: NodeId,
    pub ou: NodeId,
}

pub fn corp_lab(graph: &MemoryGraph) -> Result<CorpLab> {
    graph.write(&CancellationToken::new(), |tx| {
        let esc1 = esc1_lab(tx, false)?;

        let replicator = add_node(tx, node::USER, named("SYNC@CORP.LOCAL", "S-1-5-21-100-1110"))?;
        link(tx, replicator, esc1.domain, rel::GET_CHANGES)?;
        link(tx, replicator, esc1.domain, rel::GET_CHANGES_ALL)?;

        let helpdesk = add_node(tx, node::GROUP, named("HELPDESK@CORP.LOCAL", "S-1-5-21-100-1200"))?;
        let tech = add_node(tx, node::USER, named("TECH@CORP.LOCAL", "S-1-5-21-100-1201"))?;
        link(tx, tech, helpdesk, rel::MEMBER_OF)?;

        let workstation = add_node(
            tx,
            node::COMPUTER,
            named("WS01.CORP.LOCAL", "S-1-5-21-100-3001").with(prop::SMB_SIGNING, true),
        )?;
        let admins = add_node(
            tx,
            node::LOCAL_GROUP,
            named("ADMINISTRATORS@WS01.CORP.LOCAL", "WS01.CORP.LOCAL-S-1-5-32-544"),
        )?;
        link(tx, admins, workstation, rel::LOCAL_TO_COMPUTER)?;
        link(tx, helpdesk, admins, rel::MEMBER_OF_LOCAL_GROUP)?;

        let ou = add_node(tx, node::OU, named("WORKSTATIONS@CORP.LOCAL", "ou-1"))?;
        let gpo = add_node(tx, node::GPO, named("HARDENING@CORP.LOCAL", "gpo-1"))?;
        link(tx, esc1.domain, ou, rel::CONTAINS)?;
        link(tx, ou, workstation, rel::CONTAINS)?;
        link(tx, gpo, ou, rel::GP_LINK)?;
        link(tx, helpdesk, ou, rel::WRITE_GP_LINK)?;

        Ok(CorpLab {
            esc1,
            replicator,
            helpdesk,
            tech,
            workstation,
            gpo,
            ou,
        })
    })
}
