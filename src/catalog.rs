//! The post-processing pipeline.
//!
//! [`PostProcessor`] is the closed set of derivation passes. [`PostProcessor::PIPELINE`]
//! fixes their order, and each pass declares which membership expansion it
//! consumes so [`run_post_processing`] builds every aggregator at most once.
//! When writing, relationships of the selected passes' kinds are cleared first
//! so a revoked right no longer leaves its derived relationship behind.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use crate::ad;
use crate::ad::schema::rel;
use crate::analysis::{
    measure, AnalysisConfig, EdgeJob, IdAggregator, OperationReport, PathAggregator, PostProcessingStats,
};
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, GraphStoreExt, TransactionExt};
use crate::types::{Kind, Result};

/// Membership expansion a pass consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Expansions {
    /// The pass does not consult group memberships.
    None,
    /// Full transitive group membership.
    Groups,
    /// Membership that skips edges touching the Administrators group.
    RdpGroups,
}

static DC_SYNC_KINDS: [Kind; 1] = [rel::DC_SYNC];
static SYNC_LAPS_KINDS: [Kind; 1] = [rel::SYNC_LAPS_PASSWORD];
static TRUST_KEY_KINDS: [Kind; 1] = [rel::HAS_TRUST_KEYS];
static LOCAL_GROUP_KINDS: [Kind; 4] = [rel::ADMIN_TO, rel::CAN_PS_REMOTE, rel::EXECUTE_DCOM, rel::CAN_RDP];
static ADCS_INFRASTRUCTURE_KINDS: [Kind; 4] = [
    rel::TRUSTED_FOR_NT_AUTH,
    rel::ISSUED_SIGNED_BY,
    rel::ENTERPRISE_CA_FOR,
    rel::ENROLL_ON_BEHALF_OF,
];
static ADCS_KINDS: [Kind; 11] = [
    rel::GOLDEN_CERT,
    rel::ADCS_ESC1,
    rel::ADCS_ESC3,
    rel::ADCS_ESC4,
    rel::ADCS_ESC6A,
    rel::ADCS_ESC6B,
    rel::ADCS_ESC9A,
    rel::ADCS_ESC9B,
    rel::ADCS_ESC10A,
    rel::ADCS_ESC10B,
    rel::ADCS_ESC13,
];
static RELAY_KINDS: [Kind; 4] = [
    rel::COERCE_AND_RELAY_NTLM_TO_SMB,
    rel::COERCE_AND_RELAY_NTLM_TO_LDAP,
    rel::COERCE_AND_RELAY_NTLM_TO_LDAPS,
    rel::COERCE_AND_RELAY_NTLM_TO_ADCS,
];
static GPO_KINDS: [Kind; 2] = [rel::GPO_APPLIES_TO, rel::CAN_APPLY_GPO];

/// Every relationship kind the pipeline derives, in pass order.
pub fn post_processed_relationships() -> Vec<Kind> {
    PostProcessor::PIPELINE
        .iter()
        .flat_map(|pass| pass.kinds().iter().cloned())
        .collect()
}

/// Deletes every relationship of `kinds`, returning how many were removed.
pub fn clear_relationships(ctx: &CancellationToken, db: &dyn GraphStore, kinds: &[Kind]) -> Result<u64> {
    if kinds.is_empty() {
        return Ok(0);
    }
    db.write(ctx, |tx| {
        let stale = tx
            .relationships()
            .filter(query::kind_in(Target::Relationship, kinds))
            .fetch_ids()?;
        for &id in &stale {
            tx.delete_relationship(id)?;
        }
        Ok(stale.len() as u64)
    })
}

/// Derivation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PostProcessor {
    /// DCSync.
    DcSync,
    /// SyncLAPSPassword.
    SyncLapsPassword,
    /// HasTrustKeys.
    HasTrustKeys,
    /// AdminTo, CanPSRemote, ExecuteDCOM and CanRDP.
    LocalGroups,
    /// TrustedForNTAuth, IssuedSignedBy, EnterpriseCAFor and EnrollOnBehalfOf.
    AdcsInfrastructure,
    /// GoldenCert and the ESC variants.
    Adcs,
    /// CoerceAndRelayNTLM to SMB, LDAP, LDAPS and ADCS.
    CoerceAndRelayNtlm,
    /// GPOAppliesTo and CanApplyGPO.
    Gpo,
}

impl PostProcessor {
    /// Every pass, in execution order.
    pub const PIPELINE: [PostProcessor; 8] = [
        PostProcessor::DcSync,
        PostProcessor::SyncLapsPassword,
        PostProcessor::HasTrustKeys,
        PostProcessor::LocalGroups,
        PostProcessor::AdcsInfrastructure,
        PostProcessor::Adcs,
        PostProcessor::CoerceAndRelayNtlm,
        PostProcessor::Gpo,
    ];

    /// Stable pass name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            PostProcessor::DcSync => "dcsync",
            PostProcessor::SyncLapsPassword => "sync_laps_password",
            PostProcessor::HasTrustKeys => "has_trust_keys",
            PostProcessor::LocalGroups => "local_groups",
            PostProcessor::AdcsInfrastructure => "adcs_infrastructure",
            PostProcessor::Adcs => "adcs",
            PostProcessor::CoerceAndRelayNtlm => "coerce_and_relay_ntlm",
            PostProcessor::Gpo => "gpo",
        }
    }

    /// Looks a pass up by [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::PIPELINE.into_iter().find(|pass| pass.name() == name)
    }

    /// Relationship kinds the pass derives.
    pub fn kinds(self) -> &'static [Kind] {
        match self {
            PostProcessor::DcSync => &DC_SYNC_KINDS,
            PostProcessor::SyncLapsPassword => &SYNC_LAPS_KINDS,
            PostProcessor::HasTrustKeys => &TRUST_KEY_KINDS,
            PostProcessor::LocalGroups => &LOCAL_GROUP_KINDS,
            PostProcessor::AdcsInfrastructure => &ADCS_INFRASTRUCTURE_KINDS,
            PostProcessor::Adcs => &ADCS_KINDS,
            PostProcessor::CoerceAndRelayNtlm => &RELAY_KINDS,
            PostProcessor::Gpo => &GPO_KINDS,
        }
    }

    /// Membership expansion the pass consumes.
    pub fn expansions(self) -> Expansions {
        match self {
            PostProcessor::HasTrustKeys | PostProcessor::AdcsInfrastructure | PostProcessor::Gpo => Expansions::None,
            PostProcessor::LocalGroups => Expansions::RdpGroups,
            PostProcessor::DcSync
            | PostProcessor::SyncLapsPassword
            | PostProcessor::Adcs
            | PostProcessor::CoerceAndRelayNtlm => Expansions::Groups,
        }
    }

    /// Runs the pass. `expansions` must match [`Self::expansions`]; passes that
    /// need none ignore it.
    pub fn run(
        self,
        ctx: &CancellationToken,
        db: &Arc<dyn GraphStore>,
        config: &AnalysisConfig,
        expansions: &Arc<dyn PathAggregator>,
    ) -> Result<OperationReport> {
        match self {
            PostProcessor::DcSync => ad::post_dcsync(ctx, db, config, expansions),
            PostProcessor::SyncLapsPassword => ad::post_sync_laps_password(ctx, db, config, expansions),
            PostProcessor::HasTrustKeys => ad::post_has_trust_keys(ctx, db, config),
            PostProcessor::LocalGroups => ad::post_local_groups(ctx, db, config, expansions),
            PostProcessor::AdcsInfrastructure => ad::post_adcs_infrastructure(ctx, db, config),
            PostProcessor::Adcs => ad::post_adcs(ctx, db, config, expansions),
            PostProcessor::CoerceAndRelayNtlm => ad::post_coerce_and_relay_ntlm(ctx, db, config, expansions),
            PostProcessor::Gpo => ad::post_gpos(ctx, db, config),
        }
    }
}

/// Outcome of the bootstrap repairs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Well-known groups that gained the group kind.
    pub node_types_fixed: u64,
    /// Nodes that received a display name.
    pub names_assigned: u64,
}

/// Outcome of one pass.
#[derive(Clone, Debug, Serialize)]
pub struct PassReport {
    /// Pass that ran.
    pub pass: PostProcessor,
    /// Relationship counters.
    pub stats: PostProcessingStats,
    /// Reader jobs that ran.
    pub readers_run: u64,
    /// Jobs emitted by readers.
    pub jobs_submitted: u64,
    /// Wall time.
    pub elapsed: Duration,
}

/// Outcome of [`run_post_processing`].
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Bootstrap repairs.
    pub bootstrap: BootstrapReport,
    /// Relationships of the selected passes' kinds removed before the passes ran.
    pub relationships_deleted: u64,
    /// Groups with resolved memberships.
    pub groups_resolved: usize,
    /// Per-pass outcomes, in execution order.
    pub passes: Vec<PassReport>,
    /// Jobs gathered in accumulator mode, in pass order.
    pub jobs: Vec<EdgeJob>,
}

impl PipelineReport {
    /// Counters merged across passes.
    pub fn stats(&self) -> PostProcessingStats {
        let mut total = PostProcessingStats::default();
        for pass in &self.passes {
            total.merge(&pass.stats);
        }
        total
    }

    /// Report of `pass`, if it ran.
    pub fn pass(&self, pass: PostProcessor) -> Option<&PassReport> {
        self.passes.iter().find(|report| report.pass == pass)
    }
}

struct Aggregators<'a> {
    ctx: &'a CancellationToken,
    db: &'a Arc<dyn GraphStore>,
    config: &'a AnalysisConfig,
    groups: Option<Arc<IdAggregator>>,
    rdp: Option<Arc<IdAggregator>>,
    empty: Arc<IdAggregator>,
}

impl Aggregators<'_> {
    /// Builds `expansions` on first use and shares it afterwards.
    fn get(&mut self, expansions: Expansions) -> Result<Arc<IdAggregator>> {
        let slot = match expansions {
            Expansions::None => return Ok(Arc::clone(&self.empty)),
            Expansions::Groups => &mut self.groups,
            Expansions::RdpGroups => &mut self.rdp,
        };
        if let Some(aggregator) = slot {
            return Ok(Arc::clone(aggregator));
        }
        let aggregator = match expansions {
            Expansions::RdpGroups => ad::expand_all_rdp_local_groups(self.ctx, self.db.as_ref(), self.config)?,
            _ => ad::resolve_all_group_memberships(self.ctx, self.db.as_ref(), self.config, &[])?,
        };
        *slot = Some(Arc::clone(&aggregator));
        Ok(aggregator)
    }
}

/// Runs bootstrap, membership resolution and every pass of
/// [`PostProcessor::PIPELINE`].
///
/// The first failing pass aborts the run; its error names the pass.
pub fn run_post_processing(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
) -> Result<PipelineReport> {
    run_passes(ctx, db, config, &PostProcessor::PIPELINE)
}

/// [`run_post_processing`] restricted to `passes`, which run in the given order.
pub fn run_passes(
    ctx: &CancellationToken,
    db: &Arc<dyn GraphStore>,
    config: &AnalysisConfig,
    passes: &[PostProcessor],
) -> Result<PipelineReport> {
    let _measure = measure(Level::INFO, "run_post_processing");
    config.validate()?;
    let mut report = PipelineReport::default();

    report.bootstrap.node_types_fixed =
        ad::fix_well_known_node_types(ctx, db.as_ref()).map_err(|err| err.in_pass("bootstrap"))?;
    report.bootstrap.names_assigned =
        ad::run_domain_associations(ctx, db.as_ref()).map_err(|err| err.in_pass("bootstrap"))?;
    ad::link_well_known_groups(ctx, db.as_ref()).map_err(|err| err.in_pass("bootstrap"))?;

    // Accumulator mode never writes, so it leaves earlier results in place.
    if config.num_writers > 0 {
        let kinds: Vec<Kind> = passes.iter().flat_map(|pass| pass.kinds().iter().cloned()).collect();
        report.relationships_deleted =
            clear_relationships(ctx, db.as_ref(), &kinds).map_err(|err| err.in_pass("clear"))?;
        info!(deleted = report.relationships_deleted, "catalog.cleared");
    }

    let mut aggregators = Aggregators {
        ctx,
        db,
        config,
        groups: None,
        rdp: None,
        empty: Arc::new(IdAggregator::new()),
    };
    let groups = aggregators
        .get(Expansions::Groups)
        .map_err(|err| err.in_pass("membership"))?;
    report.groups_resolved = groups.len();

    for &pass in passes {
        let timer = measure(Level::DEBUG, pass.name());
        let expansions: Arc<dyn PathAggregator> = aggregators
            .get(pass.expansions())
            .map_err(|err| err.in_pass("membership"))?;
        let outcome = pass
            .run(ctx, db, config, &expansions)
            .map_err(|err| err.in_pass(pass.name()))?;
        info!(
            pass = pass.name(),
            created = outcome.stats.total_created(),
            refreshed = outcome.stats.relationships_refreshed,
            "catalog.pass.complete"
        );
        report.passes.push(PassReport {
            pass,
            stats: outcome.stats,
            readers_run: outcome.readers_run,
            jobs_submitted: outcome.jobs_submitted,
            elapsed: timer.elapsed(),
        });
        report.jobs.extend(outcome.jobs);
    }

    Ok(report)
}
